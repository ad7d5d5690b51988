//! Shared types used across the application.
//!
//! These are platform-neutral views of guild entities. The Discord layer
//! converts serenity models into them so the synchronizer, relay and
//! presence logger can run against any `GuildApi`.

use serenity::model::id::{ChannelId, GuildId, RoleId};

/// Kind of a guild channel, as far as mirroring is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    Category,
    Text,
    Voice,
    /// Forums, stages, threads and anything else the mirror does not copy.
    Other,
}

impl ChannelKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Category => "category",
            Self::Text => "text",
            Self::Voice => "voice",
            Self::Other => "other",
        }
    }
}

/// A channel as seen in a guild listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub id: ChannelId,
    pub name: String,
    pub kind: ChannelKind,
    /// Parent category, if any.
    pub parent: Option<ChannelId>,
    pub position: u16,
}

/// Request to create a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewChannel {
    pub name: String,
    pub kind: ChannelKind,
    pub parent: Option<ChannelId>,
}

/// A guild role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleInfo {
    pub id: RoleId,
    pub name: String,
}

/// Author identity shown on relayed messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Author {
    pub name: String,
    pub avatar_url: Option<String>,
}

/// An attachment on an incoming message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentInfo {
    pub url: String,
    pub filename: String,
    pub content_type: Option<String>,
}

/// A user-authored message observed in a guild.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub channel_name: String,
    pub author: Author,
    pub content: String,
    pub attachments: Vec<AttachmentInfo>,
}

/// A field inside a rich embed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

/// Platform-neutral rich message block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RichEmbed {
    pub title: Option<String>,
    pub description: Option<String>,
    pub author: Option<Author>,
    pub image_url: Option<String>,
    pub color: Option<u32>,
    pub fields: Vec<EmbedField>,
    pub footer: Option<String>,
    pub timestamp: bool,
}

impl RichEmbed {
    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>, inline: bool) -> Self {
        self.fields.push(EmbedField {
            name: name.into(),
            value: value.into(),
            inline,
        });
        self
    }
}

/// Something the bot sends to a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutgoingMessage {
    Text(String),
    Embed(RichEmbed),
}

impl OutgoingMessage {
    /// Text content if this is a plain text message.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Embed(_) => None,
        }
    }

    /// Embed if this is a rich message.
    pub fn as_embed(&self) -> Option<&RichEmbed> {
        match self {
            Self::Text(_) => None,
            Self::Embed(embed) => Some(embed),
        }
    }
}
