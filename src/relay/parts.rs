//! Ordered parts of one relayed message.
//!
//! Order is fixed: the primary embed, then attachment follow-ups in original
//! order, then one mention notification, then the bare links.

use serenity::model::id::RoleId;

use crate::common::types::{AttachmentInfo, Author, OutgoingMessage, RichEmbed};
use crate::relay::content::truncate;

/// Platform limit on embed descriptions.
pub const EMBED_DESCRIPTION_LIMIT: usize = 4096;

/// Accent color of relayed embeds.
pub const RELAY_COLOR: u32 = 0x3498DB;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
    File,
}

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "webm"];

/// Classify by content type, falling back to the file extension.
pub fn media_kind(attachment: &AttachmentInfo) -> MediaKind {
    if let Some(content_type) = attachment.content_type.as_deref() {
        if content_type.starts_with("image/") {
            return MediaKind::Image;
        }
        if content_type.starts_with("video/") {
            return MediaKind::Video;
        }
        return MediaKind::File;
    }

    let extension = attachment
        .filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    if IMAGE_EXTENSIONS.contains(&extension.as_str()) {
        MediaKind::Image
    } else if VIDEO_EXTENSIONS.contains(&extension.as_str()) {
        MediaKind::Video
    } else {
        MediaKind::File
    }
}

/// Inputs of the part plan, with text already rewritten for the target.
#[derive(Debug, Clone, Copy)]
pub struct PartsInput<'a> {
    pub author: &'a Author,
    pub text: &'a str,
    /// Set when the message went through the fallback channel.
    pub source_channel_name: Option<&'a str>,
    pub attachments: &'a [AttachmentInfo],
    pub mentions: &'a [RoleId],
    pub urls: &'a [String],
}

pub fn plan_parts(input: PartsInput<'_>) -> Vec<OutgoingMessage> {
    let description = match input.source_channel_name {
        Some(name) => format!("**Source channel:** #{}\n{}", name, input.text),
        None => input.text.to_string(),
    };

    let first_image = input
        .attachments
        .iter()
        .position(|a| media_kind(a) == MediaKind::Image);

    let primary = RichEmbed {
        description: (!description.is_empty())
            .then(|| truncate(&description, EMBED_DESCRIPTION_LIMIT)),
        author: Some(input.author.clone()),
        image_url: first_image.map(|i| input.attachments[i].url.clone()),
        color: Some(RELAY_COLOR),
        ..Default::default()
    };

    let mut parts = vec![OutgoingMessage::Embed(primary)];

    parts.extend(
        input
            .attachments
            .iter()
            .enumerate()
            .filter(|(i, _)| Some(*i) != first_image)
            .map(|(_, a)| OutgoingMessage::Text(a.url.clone())),
    );

    if !input.mentions.is_empty() {
        let pings: Vec<String> = input.mentions.iter().map(|id| format!("<@&{}>", id)).collect();
        parts.push(OutgoingMessage::Text(pings.join(" ")));
    }

    parts.extend(input.urls.iter().map(|url| OutgoingMessage::Text(url.clone())));
    parts
}
