//! Relay pipeline.
//!
//! Forwards each user message from a source channel to its mapped
//! destination channel as an ordered multi-part message. Pairs with the
//! `BOTH` direction also relay destination channels back to their source.

pub mod content;
pub mod parts;

use serenity::model::id::{ChannelId, GuildId, RoleId};
use tracing::{debug, info, warn};

use crate::common::types::IncomingMessage;
use crate::discord::api::{send_debug, GuildApi};
use crate::store::{MappingKey, MappingStore, ServerPair};

use content::ContentResolver;
use parts::{plan_parts, PartsInput};

/// Counters for one relayed message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Channels the message was delivered to (successfully or not).
    pub targets: usize,
    pub sent: usize,
    pub failed: usize,
    /// Pairs that had neither a mapping nor a fallback for the channel.
    pub dropped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Forward,
    Reverse,
}

#[derive(Debug, Clone, Copy)]
struct Target {
    guild: GuildId,
    channel: ChannelId,
    fallback: bool,
    route: Route,
}

pub struct RelayPipeline<'a> {
    store: &'a MappingStore,
    api: &'a dyn GuildApi,
    resolver: &'a ContentResolver,
}

impl<'a> RelayPipeline<'a> {
    pub fn new(store: &'a MappingStore, api: &'a dyn GuildApi, resolver: &'a ContentResolver) -> Self {
        Self { store, api, resolver }
    }

    /// Relay one user message to every pair it concerns.
    pub async fn relay(&self, message: &IncomingMessage) -> RelayStats {
        let mut stats = RelayStats::default();

        for pair in self.store.pairs_by_source(message.guild_id).await {
            match pair.resolve_dest_channel(message.channel_id) {
                Some(resolved) => {
                    let target = Target {
                        guild: pair.dest_guild,
                        channel: resolved.channel(),
                        fallback: resolved.is_fallback(),
                        route: Route::Forward,
                    };
                    self.deliver(&pair, message, target, &mut stats).await;
                }
                None => {
                    stats.dropped += 1;
                    debug!(channel = %message.channel_id, dest = %pair.dest_guild, "No destination, dropping message");
                    let notice = format!(
                        "No mapping for #{} ({}) and no OTHER channel set; message from {} dropped.",
                        message.channel_name, message.channel_id, message.author.name
                    );
                    send_debug(self.api, pair.log_channels.debug, &notice).await;
                }
            }
        }

        if let Some(pair) = self.store.pair(message.guild_id).await {
            if let (Some(source_guild), Some(source_channel)) =
                (pair.source_guild, pair.resolve_reverse(message.channel_id))
            {
                let target = Target {
                    guild: source_guild,
                    channel: source_channel,
                    fallback: false,
                    route: Route::Reverse,
                };
                self.deliver(&pair, message, target, &mut stats).await;
            }
        }

        stats
    }

    async fn deliver(&self, pair: &ServerPair, message: &IncomingMessage, target: Target, stats: &mut RelayStats) {
        stats.targets += 1;

        let (text, mentions) = self.rewrite(pair, message, &target).await;
        let urls = self.resolver.extract_urls(&message.content);
        let parts = plan_parts(PartsInput {
            author: &message.author,
            text: &text,
            source_channel_name: target.fallback.then_some(message.channel_name.as_str()),
            attachments: &message.attachments,
            mentions: &mentions,
            urls: &urls,
        });

        let total = parts.len();
        for (index, part) in parts.into_iter().enumerate() {
            match self.api.send(target.channel, part).await {
                Ok(()) => stats.sent += 1,
                Err(e) => {
                    stats.failed += 1;
                    warn!(channel = %target.channel, part = index + 1, total, "Relay send failed: {}", e);
                    let notice = format!(
                        "Relay of a message from #{} to <#{}> failed on part {}/{}: {} ({})",
                        message.channel_name,
                        target.channel,
                        index + 1,
                        total,
                        e.kind(),
                        e
                    );
                    send_debug(self.api, pair.log_channels.debug, &notice).await;
                }
            }
        }

        info!(
            from = %message.channel_id,
            to = %target.channel,
            parts = total,
            reverse = target.route == Route::Reverse,
            "Relayed message"
        );
    }

    /// Rewrite mentions for the target guild and collect roles to ping.
    async fn rewrite(&self, pair: &ServerPair, message: &IncomingMessage, target: &Target) -> (String, Vec<RoleId>) {
        let mut text = message.content.clone();
        let mut mentions = Vec::new();

        if !self.resolver.role_ids(&text).is_empty() {
            let source_roles = self.api.roles(message.guild_id).await.unwrap_or_else(|e| {
                warn!(guild = %message.guild_id, "Failed to list source roles: {}", e);
                Vec::new()
            });
            let target_roles = self.api.roles(target.guild).await.unwrap_or_else(|e| {
                warn!(guild = %target.guild, "Failed to list target roles: {}", e);
                Vec::new()
            });
            let resolved = self
                .resolver
                .resolve_role_mentions(&text, &source_roles, &target_roles);
            text = resolved.text;
            mentions = resolved.active;
        }

        if !self.resolver.channel_ids(&text).is_empty() {
            let source_channels = self.api.channels(message.guild_id).await.unwrap_or_else(|e| {
                warn!(guild = %message.guild_id, "Failed to list source channels: {}", e);
                Vec::new()
            });
            let map = |id: ChannelId| match target.route {
                Route::Forward => pair.mapping.get(&MappingKey::Channel(id)).copied(),
                Route::Reverse => pair.resolve_reverse(id),
            };
            text = self
                .resolver
                .resolve_channel_mentions(&text, map, &source_channels);
        }

        (self.resolver.neutralize_broadcasts(&text), mentions)
    }
}
