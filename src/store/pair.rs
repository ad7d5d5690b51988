//! Server pair records.
//!
//! A `ServerPair` is everything the bridge knows about one
//! (source guild, destination guild) relationship: the channel mapping,
//! who may administer it and where its notifications go.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serenity::model::id::{ChannelId, GuildId, UserId};

use crate::common::error::{StoreError, StoreResult};

/// Suffix of synthetic keys used for voice companion text channels.
const VOICE_TEXT_SUFFIX: &str = "_text";

/// Key of a channel mapping entry.
///
/// Canonical form is the decimal source channel ID (`"10"`), or for the
/// companion text channel of a voice channel without a same-named source
/// text channel, the voice channel ID plus `_text` (`"20_text"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MappingKey {
    Channel(ChannelId),
    VoiceText(ChannelId),
}

impl fmt::Display for MappingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Channel(id) => write!(f, "{}", id.get()),
            Self::VoiceText(id) => write!(f, "{}{}", id.get(), VOICE_TEXT_SUFFIX),
        }
    }
}

impl FromStr for MappingKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (digits, voice_text) = match s.strip_suffix(VOICE_TEXT_SUFFIX) {
            Some(rest) => (rest, true),
            None => (s, false),
        };
        let id = digits
            .parse::<u64>()
            .ok()
            .filter(|id| *id != 0)
            .map(ChannelId::new)
            .ok_or_else(|| format!("invalid mapping key '{}'", s))?;
        Ok(if voice_text {
            Self::VoiceText(id)
        } else {
            Self::Channel(id)
        })
    }
}

/// Designated log channel roles of a pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogRole {
    Debug,
    Audit,
    VcLog,
    Other,
}

impl LogRole {
    /// Parse the role name used by `set_channel`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "DEBUG" => Some(Self::Debug),
            "AUDIT" | "AUDIT_LOG" => Some(Self::Audit),
            "VC_LOG" | "VC" => Some(Self::VcLog),
            "OTHER" => Some(Self::Other),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Audit => "AUDIT",
            Self::VcLog => "VC_LOG",
            Self::Other => "OTHER",
        }
    }
}

/// Log channel assignments of a pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogChannels {
    pub debug: Option<ChannelId>,
    pub audit: Option<ChannelId>,
    pub vc_log: Option<ChannelId>,
    pub other: Option<ChannelId>,
}

impl LogChannels {
    pub fn get(&self, role: LogRole) -> Option<ChannelId> {
        match role {
            LogRole::Debug => self.debug,
            LogRole::Audit => self.audit,
            LogRole::VcLog => self.vc_log,
            LogRole::Other => self.other,
        }
    }

    pub fn set(&mut self, role: LogRole, channel: Option<ChannelId>) {
        match role {
            LogRole::Debug => self.debug = channel,
            LogRole::Audit => self.audit = channel,
            LogRole::VcLog => self.vc_log = channel,
            LogRole::Other => self.other = channel,
        }
    }
}

/// Which way messages flow for a pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RelayDirection {
    /// Source guild to destination guild only.
    #[default]
    AToB,
    /// Also relay destination channels back to their source channel.
    Both,
}

impl RelayDirection {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "A_TO_B" | "ONE_WAY" => Some(Self::AToB),
            "BOTH" => Some(Self::Both),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::AToB => "A_TO_B",
            Self::Both => "BOTH",
        }
    }
}

/// Outcome of resolving a source channel to its destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolved {
    /// The channel has its own mapping entry.
    Mapped(ChannelId),
    /// No entry; the pair's "other" channel catches it.
    Fallback(ChannelId),
}

impl Resolved {
    pub fn channel(&self) -> ChannelId {
        match self {
            Self::Mapped(id) | Self::Fallback(id) => *id,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback(_))
    }
}

/// A saved configuration block of a pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairPreset {
    pub source_guild: Option<GuildId>,
    pub mapping: BTreeMap<MappingKey, ChannelId>,
    pub admins: BTreeSet<UserId>,
    pub read_users: BTreeSet<UserId>,
    pub log_channels: LogChannels,
    pub direction: RelayDirection,
}

/// Result of restoring a preset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PresetOutcome {
    /// Mapping entries added from the preset.
    pub merged: usize,
    /// Preset entries that disagreed with the current mapping and were left alone.
    pub conflicts: usize,
}

/// One registered guild pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerPair {
    pub source_guild: Option<GuildId>,
    pub dest_guild: GuildId,
    pub mapping: BTreeMap<MappingKey, ChannelId>,
    pub admins: BTreeSet<UserId>,
    pub log_channels: LogChannels,
    pub read_users: BTreeSet<UserId>,
    pub direction: RelayDirection,
    pub presets: BTreeMap<String, PairPreset>,
}

impl ServerPair {
    /// Create a freshly claimed pair with a single admin.
    pub fn new(dest_guild: GuildId, admin: UserId) -> Self {
        Self {
            source_guild: None,
            dest_guild,
            mapping: BTreeMap::new(),
            admins: BTreeSet::from([admin]),
            log_channels: LogChannels::default(),
            read_users: BTreeSet::new(),
            direction: RelayDirection::default(),
            presets: BTreeMap::new(),
        }
    }

    pub fn is_admin(&self, user: UserId) -> bool {
        self.admins.contains(&user)
    }

    /// Whether the user may view the pair configuration.
    pub fn can_read(&self, user: UserId) -> bool {
        self.is_admin(user) || self.read_users.contains(&user)
    }

    pub fn is_mapped(&self, key: &MappingKey) -> bool {
        self.mapping.contains_key(key)
    }

    /// Resolve where a message from a source channel goes.
    ///
    /// A voice channel's companion text mapping wins over its voice mapping.
    pub fn resolve_dest_channel(&self, source_channel: ChannelId) -> Option<Resolved> {
        self.mapping
            .get(&MappingKey::VoiceText(source_channel))
            .or_else(|| self.mapping.get(&MappingKey::Channel(source_channel)))
            .map(|id| Resolved::Mapped(*id))
            .or_else(|| self.log_channels.other.map(Resolved::Fallback))
    }

    /// Resolve a destination channel back to its source channel.
    ///
    /// Only plain channel mappings participate and only for `BOTH` pairs.
    pub fn resolve_reverse(&self, dest_channel: ChannelId) -> Option<ChannelId> {
        if self.direction != RelayDirection::Both {
            return None;
        }
        self.mapping.iter().find_map(|(key, dest)| match key {
            MappingKey::Channel(source) if *dest == dest_channel => Some(*source),
            _ => None,
        })
    }

    /// Record a mapping entry.
    ///
    /// Returns `Ok(true)` when a new entry was added, `Ok(false)` when the
    /// identical entry already existed. Entries are never overwritten.
    pub fn record_mapping(&mut self, key: MappingKey, dest: ChannelId) -> StoreResult<bool> {
        match self.mapping.get(&key) {
            Some(existing) if *existing == dest => Ok(false),
            Some(existing) => Err(StoreError::MappingConflict {
                key,
                existing: existing.get(),
                requested: dest.get(),
            }),
            None => {
                self.mapping.insert(key, dest);
                Ok(true)
            }
        }
    }

    /// Snapshot the configuration block (everything but the presets).
    pub fn snapshot(&self) -> PairPreset {
        PairPreset {
            source_guild: self.source_guild,
            mapping: self.mapping.clone(),
            admins: self.admins.clone(),
            read_users: self.read_users.clone(),
            log_channels: self.log_channels,
            direction: self.direction,
        }
    }

    /// Restore a preset onto this pair.
    ///
    /// The mapping is merged append-only. The source guild is only taken
    /// from the preset when none is linked yet.
    pub fn apply_preset(&mut self, preset: &PairPreset) -> StoreResult<PresetOutcome> {
        if let (Some(current), Some(saved)) = (self.source_guild, preset.source_guild) {
            if current != saved {
                return Err(StoreError::PresetMismatch {
                    message: format!(
                        "preset is for source guild {} but pair is linked to {}",
                        saved, current
                    ),
                });
            }
        }

        let mut outcome = PresetOutcome::default();
        for (key, dest) in &preset.mapping {
            match self.record_mapping(*key, *dest) {
                Ok(true) => outcome.merged += 1,
                Ok(false) => {}
                Err(_) => outcome.conflicts += 1,
            }
        }

        if self.source_guild.is_none() {
            self.source_guild = preset.source_guild;
        }
        if !preset.admins.is_empty() {
            self.admins = preset.admins.clone();
        }
        self.read_users = preset.read_users.clone();
        self.log_channels = preset.log_channels;
        self.direction = preset.direction;

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> ServerPair {
        ServerPair::new(GuildId::new(500), UserId::new(1))
    }

    #[test]
    fn test_mapping_key_round_trip_forms() {
        assert_eq!(MappingKey::Channel(ChannelId::new(10)).to_string(), "10");
        assert_eq!(MappingKey::VoiceText(ChannelId::new(20)).to_string(), "20_text");
        assert_eq!(
            "20_text".parse::<MappingKey>(),
            Ok(MappingKey::VoiceText(ChannelId::new(20)))
        );
        assert!("abc".parse::<MappingKey>().is_err());
        assert!("0".parse::<MappingKey>().is_err());
        assert!("_text".parse::<MappingKey>().is_err());
    }

    #[test]
    fn test_record_mapping_is_append_only() {
        let mut pair = pair();
        let key = MappingKey::Channel(ChannelId::new(10));

        assert!(pair.record_mapping(key, ChannelId::new(901)).unwrap());
        assert!(!pair.record_mapping(key, ChannelId::new(901)).unwrap());

        let err = pair.record_mapping(key, ChannelId::new(902)).unwrap_err();
        assert!(matches!(err, StoreError::MappingConflict { existing: 901, requested: 902, .. }));
        assert_eq!(pair.mapping[&key], ChannelId::new(901));
    }

    #[test]
    fn test_resolve_prefers_exact_then_fallback() {
        let mut pair = pair();
        pair.record_mapping(MappingKey::Channel(ChannelId::new(10)), ChannelId::new(901))
            .unwrap();

        assert_eq!(
            pair.resolve_dest_channel(ChannelId::new(10)),
            Some(Resolved::Mapped(ChannelId::new(901)))
        );
        assert_eq!(pair.resolve_dest_channel(ChannelId::new(11)), None);

        pair.log_channels.other = Some(ChannelId::new(999));
        assert_eq!(
            pair.resolve_dest_channel(ChannelId::new(11)),
            Some(Resolved::Fallback(ChannelId::new(999)))
        );
    }

    #[test]
    fn test_resolve_voice_prefers_companion_text() {
        let mut pair = pair();
        pair.record_mapping(MappingKey::Channel(ChannelId::new(20)), ChannelId::new(902))
            .unwrap();
        pair.record_mapping(MappingKey::VoiceText(ChannelId::new(20)), ChannelId::new(903))
            .unwrap();

        assert_eq!(
            pair.resolve_dest_channel(ChannelId::new(20)),
            Some(Resolved::Mapped(ChannelId::new(903)))
        );
    }

    #[test]
    fn test_resolve_reverse_requires_both() {
        let mut pair = pair();
        pair.record_mapping(MappingKey::Channel(ChannelId::new(10)), ChannelId::new(901))
            .unwrap();
        pair.record_mapping(MappingKey::VoiceText(ChannelId::new(20)), ChannelId::new(903))
            .unwrap();

        assert_eq!(pair.resolve_reverse(ChannelId::new(901)), None);

        pair.direction = RelayDirection::Both;
        assert_eq!(pair.resolve_reverse(ChannelId::new(901)), Some(ChannelId::new(10)));
        assert_eq!(pair.resolve_reverse(ChannelId::new(903)), None);
    }

    #[test]
    fn test_log_role_parse() {
        assert_eq!(LogRole::parse("debug"), Some(LogRole::Debug));
        assert_eq!(LogRole::parse("VC_LOG"), Some(LogRole::VcLog));
        assert_eq!(LogRole::parse("AUDIT"), Some(LogRole::Audit));
        assert_eq!(LogRole::parse("other"), Some(LogRole::Other));
        assert_eq!(LogRole::parse("nope"), None);
    }

    #[test]
    fn test_apply_preset_merges_without_overwriting() {
        let mut pair = pair();
        pair.record_mapping(MappingKey::Channel(ChannelId::new(10)), ChannelId::new(901))
            .unwrap();

        let mut preset = pair.snapshot();
        preset.mapping.insert(MappingKey::Channel(ChannelId::new(10)), ChannelId::new(777));
        preset.mapping.insert(MappingKey::Channel(ChannelId::new(11)), ChannelId::new(902));
        preset.log_channels.debug = Some(ChannelId::new(42));
        preset.source_guild = Some(GuildId::new(100));

        let outcome = pair.apply_preset(&preset).unwrap();
        assert_eq!(outcome, PresetOutcome { merged: 1, conflicts: 1 });
        assert_eq!(pair.mapping[&MappingKey::Channel(ChannelId::new(10))], ChannelId::new(901));
        assert_eq!(pair.log_channels.debug, Some(ChannelId::new(42)));
        assert_eq!(pair.source_guild, Some(GuildId::new(100)));
    }

    #[test]
    fn test_apply_preset_rejects_other_source() {
        let mut pair = pair();
        pair.source_guild = Some(GuildId::new(100));
        let mut preset = pair.snapshot();
        preset.source_guild = Some(GuildId::new(200));

        assert!(pair.apply_preset(&preset).is_err());
    }
}
