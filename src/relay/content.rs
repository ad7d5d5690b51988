//! Mention, link and broadcast handling for relayed text.

use fancy_regex::Regex;
use serenity::model::id::{ChannelId, RoleId};

use crate::common::types::{ChannelInfo, RoleInfo};

/// Shown in place of a role mention whose role no longer exists.
pub const DELETED_ROLE: &str = "@deleted-role";

/// Shown in place of a channel mention whose channel no longer exists.
pub const DELETED_CHANNEL: &str = "#deleted-channel";

/// Result of rewriting role mentions for the target guild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRoles {
    /// Text with every role token rewritten.
    pub text: String,
    /// Target guild roles to ping, in first-mention order.
    pub active: Vec<RoleId>,
}

/// Rewrites platform tokens in message text for another guild.
#[derive(Debug, Clone)]
pub struct ContentResolver {
    /// Role mentions (<@&123>).
    role_pattern: Regex,
    /// Channel mentions (<#123>).
    channel_pattern: Regex,
    /// @everyone / @here.
    broadcast_pattern: Regex,
    /// Bare links. Links wrapped in <...> have embeds suppressed on purpose.
    url_pattern: Regex,
}

impl ContentResolver {
    pub fn new() -> Result<Self, fancy_regex::Error> {
        Ok(Self {
            role_pattern: Regex::new(r"<@&(\d+)>")?,
            channel_pattern: Regex::new(r"<#(\d+)>")?,
            broadcast_pattern: Regex::new(r"@(everyone|here)\b")?,
            url_pattern: Regex::new(r"(?<![<\w])https?://[^\s<>]+")?,
        })
    }

    fn ids(pattern: &Regex, text: &str) -> Vec<u64> {
        pattern
            .find_iter(text)
            .filter_map(|m| m.ok())
            .filter_map(|m| {
                let digits: String = m.as_str().chars().filter(char::is_ascii_digit).collect();
                digits.parse::<u64>().ok()
            })
            .filter(|id| *id != 0)
            .collect()
    }

    /// Role IDs mentioned in the text.
    pub fn role_ids(&self, text: &str) -> Vec<RoleId> {
        Self::ids(&self.role_pattern, text)
            .into_iter()
            .map(RoleId::new)
            .collect()
    }

    /// Channel IDs mentioned in the text.
    pub fn channel_ids(&self, text: &str) -> Vec<ChannelId> {
        Self::ids(&self.channel_pattern, text)
            .into_iter()
            .map(ChannelId::new)
            .collect()
    }

    /// Rewrite role mentions to the same-named role of the target guild.
    ///
    /// Unresolvable mentions degrade to `@RoleName`, or `@deleted-role` when
    /// the source role itself is unknown.
    pub fn resolve_role_mentions(
        &self,
        text: &str,
        source_roles: &[RoleInfo],
        target_roles: &[RoleInfo],
    ) -> ResolvedRoles {
        let mut active = Vec::new();
        let text = self
            .role_pattern
            .replace_all(text, |caps: &fancy_regex::Captures| -> String {
                let source = caps[1]
                    .parse::<u64>()
                    .ok()
                    .and_then(|id| source_roles.iter().find(|r| r.id.get() == id));
                let Some(source) = source else {
                    return DELETED_ROLE.to_string();
                };
                match target_roles.iter().find(|r| r.name == source.name) {
                    Some(target) => {
                        if !active.contains(&target.id) {
                            active.push(target.id);
                        }
                        format!("<@&{}>", target.id)
                    }
                    None => format!("@{}", source.name),
                }
            })
            .to_string();

        ResolvedRoles { text, active }
    }

    /// Rewrite channel mentions through `map`, degrading unmapped ones to
    /// `#name`.
    pub fn resolve_channel_mentions(
        &self,
        text: &str,
        map: impl Fn(ChannelId) -> Option<ChannelId>,
        source_channels: &[ChannelInfo],
    ) -> String {
        self.channel_pattern
            .replace_all(text, |caps: &fancy_regex::Captures| -> String {
                let Some(id) = caps[1].parse::<u64>().ok().filter(|id| *id != 0) else {
                    return DELETED_CHANNEL.to_string();
                };
                let id = ChannelId::new(id);
                if let Some(target) = map(id) {
                    return format!("<#{}>", target);
                }
                source_channels
                    .iter()
                    .find(|c| c.id == id)
                    .map(|c| format!("#{}", c.name))
                    .unwrap_or_else(|| DELETED_CHANNEL.to_string())
            })
            .to_string()
    }

    /// Break @everyone / @here so they render but never ping.
    pub fn neutralize_broadcasts(&self, text: &str) -> String {
        self.broadcast_pattern
            .replace_all(text, "@\u{200B}$1")
            .to_string()
    }

    /// Bare URL tokens in order of appearance.
    pub fn extract_urls(&self, text: &str) -> Vec<String> {
        self.url_pattern
            .find_iter(text)
            .filter_map(|m| m.ok())
            .map(|m| m.as_str().to_string())
            .collect()
    }
}

/// Cut `text` to at most `max_chars` characters, marking the cut.
pub fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    cut.push('…');
    cut
}
