//! Guild API seam.
//!
//! The synchronizer, relay and presence logger only talk to the platform
//! through `GuildApi`. `SerenityGuildApi` is the production implementation
//! on top of serenity's HTTP client.

use std::sync::Arc;

use async_trait::async_trait;
use serenity::all::{
    ChannelId, ChannelType, CreateChannel, CreateEmbed, CreateEmbedAuthor, CreateEmbedFooter,
    CreateMessage, GuildChannel, GuildId, Http, Timestamp,
};
use tracing::{error, warn};

use crate::common::error::{DiscordError, DiscordResult};
use crate::common::types::{ChannelInfo, ChannelKind, NewChannel, OutgoingMessage, RichEmbed, RoleInfo};

/// Operations the bridge needs from the chat platform.
#[async_trait]
pub trait GuildApi: Send + Sync {
    /// All channels of a guild, categories included.
    async fn channels(&self, guild: GuildId) -> DiscordResult<Vec<ChannelInfo>>;

    async fn roles(&self, guild: GuildId) -> DiscordResult<Vec<RoleInfo>>;

    async fn create_channel(&self, guild: GuildId, channel: NewChannel) -> DiscordResult<ChannelInfo>;

    async fn send(&self, channel: ChannelId, message: OutgoingMessage) -> DiscordResult<()>;
}

/// Post a notice to a pair's debug channel, or the console if there is none
/// or the send fails.
pub async fn send_debug(api: &dyn GuildApi, debug_channel: Option<ChannelId>, text: &str) {
    let Some(channel) = debug_channel else {
        warn!("[debug] {}", text);
        return;
    };
    if let Err(e) = api.send(channel, OutgoingMessage::Text(text.to_string())).await {
        error!(channel = %channel, "Failed to post debug notice ({}): {}", e, text);
    }
}

fn channel_kind(kind: ChannelType) -> ChannelKind {
    match kind {
        ChannelType::Category => ChannelKind::Category,
        ChannelType::Text | ChannelType::News => ChannelKind::Text,
        ChannelType::Voice => ChannelKind::Voice,
        _ => ChannelKind::Other,
    }
}

fn channel_info(channel: &GuildChannel) -> ChannelInfo {
    ChannelInfo {
        id: channel.id,
        name: channel.name.clone(),
        kind: channel_kind(channel.kind),
        parent: channel.parent_id,
        position: channel.position,
    }
}

fn build_embed(embed: RichEmbed) -> CreateEmbed {
    let mut builder = CreateEmbed::new();
    if let Some(title) = embed.title {
        builder = builder.title(title);
    }
    if let Some(description) = embed.description {
        builder = builder.description(description);
    }
    if let Some(author) = embed.author {
        let mut author_builder = CreateEmbedAuthor::new(author.name);
        if let Some(icon) = author.avatar_url {
            author_builder = author_builder.icon_url(icon);
        }
        builder = builder.author(author_builder);
    }
    if let Some(image) = embed.image_url {
        builder = builder.image(image);
    }
    if let Some(color) = embed.color {
        builder = builder.color(color);
    }
    for field in embed.fields {
        builder = builder.field(field.name, field.value, field.inline);
    }
    if let Some(footer) = embed.footer {
        builder = builder.footer(CreateEmbedFooter::new(footer));
    }
    if embed.timestamp {
        builder = builder.timestamp(Timestamp::now());
    }
    builder
}

/// `GuildApi` backed by serenity's REST client.
pub struct SerenityGuildApi {
    http: Arc<Http>,
}

impl SerenityGuildApi {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl GuildApi for SerenityGuildApi {
    async fn channels(&self, guild: GuildId) -> DiscordResult<Vec<ChannelInfo>> {
        let channels = guild.channels(&self.http).await?;
        Ok(channels.values().map(channel_info).collect())
    }

    async fn roles(&self, guild: GuildId) -> DiscordResult<Vec<RoleInfo>> {
        let roles = guild.roles(&self.http).await?;
        Ok(roles
            .into_values()
            .map(|role| RoleInfo {
                id: role.id,
                name: role.name,
            })
            .collect())
    }

    async fn create_channel(&self, guild: GuildId, channel: NewChannel) -> DiscordResult<ChannelInfo> {
        let kind = match channel.kind {
            ChannelKind::Category => ChannelType::Category,
            ChannelKind::Text => ChannelType::Text,
            ChannelKind::Voice => ChannelType::Voice,
            ChannelKind::Other => {
                return Err(DiscordError::Other {
                    message: format!("cannot create channel '{}' of unsupported kind", channel.name),
                })
            }
        };

        let mut builder = CreateChannel::new(channel.name).kind(kind);
        if let Some(parent) = channel.parent {
            builder = builder.category(parent);
        }
        let created = guild.create_channel(&self.http, builder).await?;
        Ok(channel_info(&created))
    }

    async fn send(&self, channel: ChannelId, message: OutgoingMessage) -> DiscordResult<()> {
        let builder = match message {
            OutgoingMessage::Text(text) => CreateMessage::new().content(text),
            OutgoingMessage::Embed(embed) => CreateMessage::new().embed(build_embed(embed)),
        };
        channel.send_message(&self.http, builder).await?;
        Ok(())
    }
}
