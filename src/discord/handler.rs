//! Discord event handling.
//!
//! Converts gateway events into the platform-neutral types of the relay
//! and presence components and hands them over.

use std::sync::Arc;

use serenity::model::channel::Message;
use serenity::model::event::{InviteCreateEvent, InviteDeleteEvent};
use serenity::model::guild::{Guild, Member, PartialGuild};
use serenity::model::id::{ChannelId, GuildId};
use serenity::model::user::User;
use serenity::model::voice::VoiceState;
use serenity::prelude::*;
use tracing::{debug, error, info};

use crate::bridge::BridgeContext;
use crate::common::types::{AttachmentInfo, Author, IncomingMessage};
use crate::discord::client::DiscordBotEvent;
use crate::discord::commands::CommandHandler;
use crate::presence::{
    classify_voice, compute_guild_changes, GuildSettings, InviteInfo, MemberRef, PresenceEvent,
    VoiceChannelRef,
};

/// Name of a channel from the cache, or its ID if the cache misses.
fn channel_name(ctx: &Context, guild_id: GuildId, channel_id: ChannelId) -> String {
    ctx.cache
        .guild(guild_id)
        .and_then(|guild| guild.channels.get(&channel_id).map(|c| c.name.clone()))
        .unwrap_or_else(|| channel_id.to_string())
}

fn user_ref(user: &User) -> MemberRef {
    MemberRef {
        id: user.id,
        name: user.global_name.clone().unwrap_or_else(|| user.name.clone()),
    }
}

fn member_ref(member: &Member) -> MemberRef {
    MemberRef {
        id: member.user.id,
        name: member.display_name().to_string(),
    }
}

fn invite_info(event: &InviteCreateEvent, channel_name: String) -> InviteInfo {
    InviteInfo {
        code: event.code.clone(),
        channel_name,
        inviter: event.inviter.as_ref().map(|u| u.id),
        max_uses: u32::from(event.max_uses),
        max_age: event.max_age,
        temporary: event.temporary,
    }
}

fn guild_settings(name: &str, icon: Option<String>, verification: String, filter: String) -> GuildSettings {
    GuildSettings {
        name: name.to_string(),
        icon,
        verification_level: verification,
        explicit_content_filter: filter,
    }
}

/// Discord event handler.
#[derive(Clone)]
pub struct MirrorHandler {
    bridge: Arc<BridgeContext>,
    command_handler: CommandHandler,
}

impl MirrorHandler {
    pub fn new(bridge: Arc<BridgeContext>) -> Self {
        Self {
            command_handler: CommandHandler::new(bridge.clone()),
            bridge,
        }
    }

    pub async fn handle_event(&self, event: DiscordBotEvent) {
        match event {
            DiscordBotEvent::Message { context, message } => self.handle_message(context, message).await,
            DiscordBotEvent::MemberAdd(member) => {
                if !member.user.bot {
                    self.log(member.guild_id, PresenceEvent::MemberJoined(member_ref(&member)))
                        .await;
                }
            }
            DiscordBotEvent::MemberRemove { guild_id, user, member } => {
                if !user.bot {
                    let who = member.as_ref().map(member_ref).unwrap_or_else(|| user_ref(&user));
                    self.log(guild_id, PresenceEvent::MemberLeft(who)).await;
                }
            }
            DiscordBotEvent::BanAdd { guild_id, user } => {
                self.log(guild_id, PresenceEvent::MemberBanned(user_ref(&user))).await;
            }
            DiscordBotEvent::BanRemove { guild_id, user } => {
                self.log(guild_id, PresenceEvent::MemberUnbanned(user_ref(&user))).await;
            }
            DiscordBotEvent::InviteCreate { context, event } => self.handle_invite_create(&context, event).await,
            DiscordBotEvent::InviteDelete(event) => self.handle_invite_delete(event).await,
            DiscordBotEvent::GuildUpdate { old, new } => self.handle_guild_update(old, new).await,
            DiscordBotEvent::VoiceStateUpdate { context, old, new } => {
                self.handle_voice_state(&context, old, new).await
            }
            DiscordBotEvent::Ready(_) | DiscordBotEvent::Disconnected => {}
        }
    }

    async fn handle_message(&self, ctx: Context, msg: Message) {
        // Ignore our own messages
        if msg.author.id == ctx.cache.current_user().id {
            return;
        }

        // Ignore bots
        if msg.author.bot {
            return;
        }

        // Only handle guild (server) messages
        let Some(guild_id) = msg.guild_id else {
            return;
        };

        let content = msg.content.trim();
        if content.is_empty() && msg.attachments.is_empty() {
            return;
        }

        // Check for commands first
        if content.starts_with(self.bridge.prefix.as_str()) {
            match self.command_handler.handle_command(&ctx, &msg, content).await {
                Ok(true) => return,
                Ok(false) => {}
                Err(e) => {
                    error!("Command handler error: {}", e);
                    return;
                }
            }
        }

        let author_name = msg
            .member
            .as_ref()
            .and_then(|m| m.nick.clone())
            .or_else(|| msg.author.global_name.clone())
            .unwrap_or_else(|| msg.author.name.clone());

        let incoming = IncomingMessage {
            guild_id,
            channel_id: msg.channel_id,
            channel_name: channel_name(&ctx, guild_id, msg.channel_id),
            author: Author {
                name: author_name,
                avatar_url: Some(msg.author.face()),
            },
            content: msg.content.clone(),
            attachments: msg
                .attachments
                .iter()
                .map(|a| AttachmentInfo {
                    url: a.url.clone(),
                    filename: a.filename.clone(),
                    content_type: a.content_type.clone(),
                })
                .collect(),
        };

        let stats = self.bridge.relay().relay(&incoming).await;
        if stats.targets > 0 || stats.dropped > 0 {
            debug!(
                channel = %incoming.channel_id,
                sent = stats.sent,
                failed = stats.failed,
                dropped = stats.dropped,
                "Message processed"
            );
        }
    }

    async fn handle_invite_create(&self, ctx: &Context, event: InviteCreateEvent) {
        let Some(guild_id) = event.guild_id else {
            return;
        };
        let invite = invite_info(&event, channel_name(ctx, guild_id, event.channel_id));
        self.log(guild_id, PresenceEvent::InviteCreated(invite)).await;
    }

    async fn handle_invite_delete(&self, event: InviteDeleteEvent) {
        let Some(guild_id) = event.guild_id else {
            return;
        };
        self.log(guild_id, PresenceEvent::InviteDeleted { code: event.code }).await;
    }

    async fn handle_guild_update(&self, old: Option<Guild>, new: PartialGuild) {
        let Some(old) = old else {
            debug!(guild = %new.id, "Guild update without cached previous state");
            return;
        };
        let before = guild_settings(
            &old.name,
            old.icon.map(|h| h.to_string()),
            format!("{:?}", old.verification_level),
            format!("{:?}", old.explicit_content_filter),
        );
        let after = guild_settings(
            &new.name,
            new.icon.map(|h| h.to_string()),
            format!("{:?}", new.verification_level),
            format!("{:?}", new.explicit_content_filter),
        );

        let changes = compute_guild_changes(&before, &after);
        if changes.is_empty() {
            return;
        }
        self.log(new.id, PresenceEvent::GuildUpdated { changes }).await;
    }

    async fn handle_voice_state(&self, ctx: &Context, old: Option<VoiceState>, new: VoiceState) {
        let Some(guild_id) = new.guild_id else {
            return;
        };
        let Some(member) = new.member.as_ref() else {
            debug!(user = %new.user_id, "Voice state update without member data");
            return;
        };
        if member.user.bot {
            return;
        }

        let channel = |id: ChannelId| VoiceChannelRef {
            id,
            name: channel_name(ctx, guild_id, id),
        };
        let before = old.and_then(|s| s.channel_id).map(channel);
        let after = new.channel_id.map(channel);

        let Some(transition) = classify_voice(before, after) else {
            return;
        };
        let event = PresenceEvent::Voice {
            member: member_ref(member),
            transition,
        };
        self.log(guild_id, event).await;
    }

    async fn log(&self, guild_id: GuildId, event: PresenceEvent) {
        let delivered = self.bridge.presence().log(guild_id, &event).await;
        if delivered > 0 {
            info!(guild = %guild_id, role = event.log_role().name(), delivered, "Presence event logged");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serenity::model::id::UserId;

    #[test]
    fn test_invite_info_keeps_limits() {
        let event: InviteCreateEvent = serde_json::from_value(serde_json::json!({
            "channel_id": "10",
            "code": "abc",
            "created_at": "2026-01-01T00:00:00Z",
            "guild_id": "100",
            "inviter": {
                "id": "7",
                "username": "host",
                "discriminator": "0",
                "global_name": null,
                "avatar": null
            },
            "max_age": 604800,
            "max_uses": 255,
            "target_type": null,
            "target_user": null,
            "target_application": null,
            "temporary": true,
            "uses": 0
        }))
        .unwrap();

        let invite = invite_info(&event, "general".to_string());
        assert_eq!(invite.code, "abc");
        assert_eq!(invite.channel_name, "general");
        assert_eq!(invite.inviter, Some(UserId::new(7)));
        assert_eq!(invite.max_uses, 255);
        assert_eq!(invite.max_age, 604_800);
        assert!(invite.temporary);
    }
}
