//! Presence and audit events observed in a source guild.
//!
//! This module is platform-neutral: the Discord handler converts gateway
//! events into `PresenceEvent` values, and each event knows which log
//! channel it belongs to and how it is rendered.

use serenity::model::id::{ChannelId, UserId};

use crate::common::types::RichEmbed;
use crate::store::LogRole;

pub const COLOR_JOIN: u32 = 0x2ECC71;
pub const COLOR_LEAVE: u32 = 0xE74C3C;
pub const COLOR_MOVE: u32 = 0x3498DB;
pub const COLOR_BAN: u32 = 0xFF0000;
pub const COLOR_INVITE: u32 = 0x00FF7F;
pub const COLOR_SETTINGS: u32 = 0xFFA500;

/// Footer of voice notifications.
const VC_FOOTER: &str = "VC Log";

/// A guild member or user referenced by an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberRef {
    pub id: UserId,
    /// Display name at the time of the event.
    pub name: String,
}

/// A voice channel a member was in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceChannelRef {
    pub id: ChannelId,
    pub name: String,
}

/// Outcome of comparing a member's voice channel before and after an update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceTransition {
    Joined(VoiceChannelRef),
    Left(VoiceChannelRef),
    Moved {
        from: VoiceChannelRef,
        to: VoiceChannelRef,
    },
}

/// Invite metadata shown on creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InviteInfo {
    pub code: String,
    pub channel_name: String,
    pub inviter: Option<UserId>,
    /// 0 means unlimited.
    pub max_uses: u32,
    /// Seconds until expiry, 0 means never.
    pub max_age: u32,
    pub temporary: bool,
}

/// Guild settings tracked for change notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuildSettings {
    pub name: String,
    pub icon: Option<String>,
    pub verification_level: String,
    pub explicit_content_filter: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceEvent {
    MemberJoined(MemberRef),
    MemberLeft(MemberRef),
    MemberBanned(MemberRef),
    MemberUnbanned(MemberRef),
    InviteCreated(InviteInfo),
    InviteDeleted { code: String },
    /// Human-readable change lines, never empty.
    GuildUpdated { changes: Vec<String> },
    Voice {
        member: MemberRef,
        transition: VoiceTransition,
    },
}

/// Classify a voice state update purely by channel identity.
///
/// Returns `None` when the channel did not change (mute, deafen, stream
/// toggles and the like).
pub fn classify_voice(before: Option<VoiceChannelRef>, after: Option<VoiceChannelRef>) -> Option<VoiceTransition> {
    match (before, after) {
        (None, Some(to)) => Some(VoiceTransition::Joined(to)),
        (Some(from), None) => Some(VoiceTransition::Left(from)),
        (Some(from), Some(to)) if from.id != to.id => Some(VoiceTransition::Moved { from, to }),
        _ => None,
    }
}

/// Describe what changed between two settings snapshots.
pub fn compute_guild_changes(before: &GuildSettings, after: &GuildSettings) -> Vec<String> {
    let mut changes = Vec::new();
    if before.name != after.name {
        changes.push(format!("Name: `{}` → `{}`", before.name, after.name));
    }
    if before.icon != after.icon {
        changes.push("Server icon changed".to_string());
    }
    if before.verification_level != after.verification_level {
        changes.push(format!(
            "Verification level: `{}` → `{}`",
            before.verification_level, after.verification_level
        ));
    }
    if before.explicit_content_filter != after.explicit_content_filter {
        changes.push(format!(
            "Explicit content filter: `{}` → `{}`",
            before.explicit_content_filter, after.explicit_content_filter
        ));
    }
    changes
}

fn member_embed(title: &str, description: String, member: &MemberRef, color: u32) -> RichEmbed {
    RichEmbed {
        title: Some(title.to_string()),
        description: Some(description),
        color: Some(color),
        timestamp: true,
        ..Default::default()
    }
    .field("ID", member.id.to_string(), true)
}

impl PresenceEvent {
    /// Which log channel of a pair the event goes to.
    pub fn log_role(&self) -> LogRole {
        match self {
            Self::Voice { .. } => LogRole::VcLog,
            _ => LogRole::Audit,
        }
    }

    pub fn to_embed(&self) -> RichEmbed {
        match self {
            Self::MemberJoined(m) => member_embed("Member joined", format!("{} joined the server", m.name), m, COLOR_JOIN),
            Self::MemberLeft(m) => member_embed("Member left", format!("{} left the server", m.name), m, COLOR_LEAVE),
            Self::MemberBanned(m) => member_embed("Member banned", format!("{} was banned", m.name), m, COLOR_BAN),
            Self::MemberUnbanned(m) => member_embed("Member unbanned", format!("{} was unbanned", m.name), m, COLOR_JOIN),
            Self::InviteCreated(invite) => {
                let inviter = invite
                    .inviter
                    .map(|id| format!("<@{}>", id))
                    .unwrap_or_else(|| "unknown".to_string());
                let max_uses = match invite.max_uses {
                    0 => "unlimited".to_string(),
                    n => n.to_string(),
                };
                let expiry = match invite.max_age {
                    0 => "never".to_string(),
                    secs => format!("{}s", secs),
                };
                RichEmbed {
                    title: Some("Invite created".to_string()),
                    description: Some("A new invite code was created".to_string()),
                    color: Some(COLOR_INVITE),
                    timestamp: true,
                    ..Default::default()
                }
                .field("Code", invite.code.clone(), true)
                .field("Channel", invite.channel_name.clone(), true)
                .field("Inviter", inviter, true)
                .field("Max uses", max_uses, true)
                .field("Expires", expiry, true)
                .field("Temporary", if invite.temporary { "yes" } else { "no" }, true)
            }
            Self::InviteDeleted { code } => RichEmbed {
                title: Some("Invite deleted".to_string()),
                description: Some(format!("Invite code `{}` was deleted", code)),
                color: Some(COLOR_BAN),
                timestamp: true,
                ..Default::default()
            },
            Self::GuildUpdated { changes } => RichEmbed {
                title: Some("Server settings changed".to_string()),
                description: Some("The server settings were changed".to_string()),
                color: Some(COLOR_SETTINGS),
                timestamp: true,
                ..Default::default()
            }
            .field("Changes", changes.join("\n"), false),
            Self::Voice { member, transition } => {
                let (description, color) = match transition {
                    VoiceTransition::Joined(to) => (format!("{} joined {}", member.name, to.name), COLOR_JOIN),
                    VoiceTransition::Left(from) => (format!("{} left {}", member.name, from.name), COLOR_LEAVE),
                    VoiceTransition::Moved { from, to } => (
                        format!("{} moved from {} to {}", member.name, from.name, to.name),
                        COLOR_MOVE,
                    ),
                };
                RichEmbed {
                    description: Some(description),
                    color: Some(color),
                    footer: Some(VC_FOOTER.to_string()),
                    timestamp: true,
                    ..Default::default()
                }
            }
        }
    }
}
