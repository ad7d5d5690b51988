//! On-disk layout of the mapping store and the atomic file commit.
//!
//! The JSON layout keeps the historical upper-case field names so existing
//! store files keep loading. Mapping keys are always strings, destination
//! IDs always integers.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serenity::model::id::{ChannelId, GuildId, UserId};
use tokio::fs;
use tracing::{debug, warn};

use crate::common::error::{StoreError, StoreResult};
use crate::store::pair::{LogChannels, MappingKey, PairPreset, RelayDirection, ServerPair};

/// Schema version written by this build.
pub const STORE_VERSION: u32 = 1;

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    /// Files written before versioning carry no field and count as version 1.
    #[serde(default = "default_version")]
    version: u32,
    #[serde(default)]
    server_pairs: Vec<PairRecord>,
}

fn default_version() -> u32 {
    STORE_VERSION
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ChannelMappingRecord {
    #[serde(rename = "A_TO_B", default)]
    a_to_b: BTreeMap<String, u64>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PairRecord {
    #[serde(rename = "A_ID", default)]
    a_id: Option<u64>,
    #[serde(rename = "B_ID", default)]
    b_id: Option<u64>,
    #[serde(rename = "CHANNEL_MAPPING", default)]
    channel_mapping: ChannelMappingRecord,
    #[serde(rename = "ADMIN_IDS", default)]
    admin_ids: Vec<u64>,
    #[serde(rename = "DEBUG_CHANNEL", default)]
    debug_channel: Option<u64>,
    #[serde(rename = "VC_LOG_CHANNEL", default)]
    vc_log_channel: Option<u64>,
    #[serde(rename = "AUDIT_LOG_CHANNEL", default)]
    audit_log_channel: Option<u64>,
    #[serde(rename = "OTHER_CHANNEL", default)]
    other_channel: Option<u64>,
    #[serde(rename = "READ_USERS", default)]
    read_users: Vec<u64>,
    #[serde(rename = "DIRECTION", default, skip_serializing_if = "Option::is_none")]
    direction: Option<String>,
    #[serde(rename = "PRESETS", default, skip_serializing_if = "BTreeMap::is_empty")]
    presets: BTreeMap<String, PresetRecord>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PresetRecord {
    #[serde(rename = "A_ID", default)]
    a_id: Option<u64>,
    #[serde(rename = "CHANNEL_MAPPING", default)]
    channel_mapping: ChannelMappingRecord,
    #[serde(rename = "ADMIN_IDS", default)]
    admin_ids: Vec<u64>,
    #[serde(rename = "DEBUG_CHANNEL", default)]
    debug_channel: Option<u64>,
    #[serde(rename = "VC_LOG_CHANNEL", default)]
    vc_log_channel: Option<u64>,
    #[serde(rename = "AUDIT_LOG_CHANNEL", default)]
    audit_log_channel: Option<u64>,
    #[serde(rename = "OTHER_CHANNEL", default)]
    other_channel: Option<u64>,
    #[serde(rename = "READ_USERS", default)]
    read_users: Vec<u64>,
    #[serde(rename = "DIRECTION", default, skip_serializing_if = "Option::is_none")]
    direction: Option<String>,
}

fn corrupt(message: impl Into<String>) -> StoreError {
    StoreError::ConfigCorrupt {
        message: message.into(),
    }
}

/// Reject zero, which no platform ID can be.
fn nonzero(value: u64, field: &str) -> StoreResult<u64> {
    if value == 0 {
        Err(corrupt(format!("{} must be non-zero", field)))
    } else {
        Ok(value)
    }
}

fn channel(value: Option<u64>, field: &str) -> StoreResult<Option<ChannelId>> {
    value
        .map(|v| nonzero(v, field).map(ChannelId::new))
        .transpose()
}

fn users(values: &[u64], field: &str) -> StoreResult<BTreeSet<UserId>> {
    values
        .iter()
        .map(|v| nonzero(*v, field).map(UserId::new))
        .collect()
}

fn direction(value: Option<&str>) -> StoreResult<RelayDirection> {
    match value {
        None => Ok(RelayDirection::default()),
        Some(s) => RelayDirection::parse(s).ok_or_else(|| corrupt(format!("unknown DIRECTION '{}'", s))),
    }
}

fn mapping(record: &ChannelMappingRecord) -> StoreResult<BTreeMap<MappingKey, ChannelId>> {
    record
        .a_to_b
        .iter()
        .map(|(key, dest)| {
            let key = key.parse::<MappingKey>().map_err(corrupt)?;
            let dest = nonzero(*dest, "CHANNEL_MAPPING destination")?;
            Ok((key, ChannelId::new(dest)))
        })
        .collect()
}

fn log_channels(
    debug: Option<u64>,
    audit: Option<u64>,
    vc_log: Option<u64>,
    other: Option<u64>,
) -> StoreResult<LogChannels> {
    Ok(LogChannels {
        debug: channel(debug, "DEBUG_CHANNEL")?,
        audit: channel(audit, "AUDIT_LOG_CHANNEL")?,
        vc_log: channel(vc_log, "VC_LOG_CHANNEL")?,
        other: channel(other, "OTHER_CHANNEL")?,
    })
}

fn mapping_record(mapping: &BTreeMap<MappingKey, ChannelId>) -> ChannelMappingRecord {
    ChannelMappingRecord {
        a_to_b: mapping
            .iter()
            .map(|(key, dest)| (key.to_string(), dest.get()))
            .collect(),
    }
}

impl PresetRecord {
    fn into_preset(self) -> StoreResult<PairPreset> {
        Ok(PairPreset {
            source_guild: self
                .a_id
                .map(|v| nonzero(v, "preset A_ID").map(GuildId::new))
                .transpose()?,
            mapping: mapping(&self.channel_mapping)?,
            admins: users(&self.admin_ids, "preset ADMIN_IDS")?,
            read_users: users(&self.read_users, "preset READ_USERS")?,
            log_channels: log_channels(
                self.debug_channel,
                self.audit_log_channel,
                self.vc_log_channel,
                self.other_channel,
            )?,
            direction: direction(self.direction.as_deref())?,
        })
    }

    fn from_preset(preset: &PairPreset) -> Self {
        Self {
            a_id: preset.source_guild.map(|g| g.get()),
            channel_mapping: mapping_record(&preset.mapping),
            admin_ids: preset.admins.iter().map(|u| u.get()).collect(),
            debug_channel: preset.log_channels.debug.map(|c| c.get()),
            vc_log_channel: preset.log_channels.vc_log.map(|c| c.get()),
            audit_log_channel: preset.log_channels.audit.map(|c| c.get()),
            other_channel: preset.log_channels.other.map(|c| c.get()),
            read_users: preset.read_users.iter().map(|u| u.get()).collect(),
            direction: Some(preset.direction.name().to_string()),
        }
    }
}

impl PairRecord {
    fn into_pair(self, dest: u64) -> StoreResult<ServerPair> {
        let presets = self
            .presets
            .into_iter()
            .map(|(name, preset)| Ok((name, preset.into_preset()?)))
            .collect::<StoreResult<_>>()?;

        Ok(ServerPair {
            source_guild: self
                .a_id
                .map(|v| nonzero(v, "A_ID").map(GuildId::new))
                .transpose()?,
            dest_guild: GuildId::new(nonzero(dest, "B_ID")?),
            mapping: mapping(&self.channel_mapping)?,
            admins: users(&self.admin_ids, "ADMIN_IDS")?,
            log_channels: log_channels(
                self.debug_channel,
                self.audit_log_channel,
                self.vc_log_channel,
                self.other_channel,
            )?,
            read_users: users(&self.read_users, "READ_USERS")?,
            direction: direction(self.direction.as_deref())?,
            presets,
        })
    }

    fn from_pair(pair: &ServerPair) -> Self {
        Self {
            a_id: pair.source_guild.map(|g| g.get()),
            b_id: Some(pair.dest_guild.get()),
            channel_mapping: mapping_record(&pair.mapping),
            admin_ids: pair.admins.iter().map(|u| u.get()).collect(),
            debug_channel: pair.log_channels.debug.map(|c| c.get()),
            vc_log_channel: pair.log_channels.vc_log.map(|c| c.get()),
            audit_log_channel: pair.log_channels.audit.map(|c| c.get()),
            other_channel: pair.log_channels.other.map(|c| c.get()),
            read_users: pair.read_users.iter().map(|u| u.get()).collect(),
            direction: Some(pair.direction.name().to_string()),
            presets: pair
                .presets
                .iter()
                .map(|(name, preset)| (name.clone(), PresetRecord::from_preset(preset)))
                .collect(),
        }
    }
}

/// Decode and validate a persisted store.
///
/// Records without a destination guild are skipped. Anything else that does
/// not describe a valid pair makes the whole document `ConfigCorrupt`.
pub fn decode(bytes: &[u8]) -> StoreResult<Vec<ServerPair>> {
    let file: StoreFile = serde_json::from_slice(bytes).map_err(|e| corrupt(e.to_string()))?;

    if file.version > STORE_VERSION {
        return Err(corrupt(format!(
            "store version {} is newer than supported version {}",
            file.version, STORE_VERSION
        )));
    }

    let mut seen = HashSet::new();
    let mut pairs = Vec::with_capacity(file.server_pairs.len());
    for (index, record) in file.server_pairs.into_iter().enumerate() {
        let Some(dest) = record.b_id else {
            warn!(index, "Skipping server pair without B_ID");
            continue;
        };
        if !seen.insert(dest) {
            return Err(corrupt(format!("duplicate B_ID {}", dest)));
        }
        pairs.push(record.into_pair(dest)?);
    }
    Ok(pairs)
}

/// Encode pairs into the persisted layout.
pub fn encode<'a>(pairs: impl IntoIterator<Item = &'a ServerPair>) -> StoreResult<Vec<u8>> {
    let file = StoreFile {
        version: STORE_VERSION,
        server_pairs: pairs.into_iter().map(PairRecord::from_pair).collect(),
    };
    serde_json::to_vec_pretty(&file).map_err(|e| corrupt(e.to_string()))
}

fn io_error(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Read the store file, `None` if it does not exist.
pub async fn read_file(path: &Path) -> StoreResult<Option<Vec<u8>>> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(io_error(path, e)),
    }
}

fn stamped_path(path: &Path, stamp: &str, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".{}.{}", stamp, suffix));
    PathBuf::from(name)
}

/// Backups of `path`, newest first. The UTC stamp sorts lexically.
async fn list_backups(path: &Path) -> StoreResult<Vec<PathBuf>> {
    let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
        return Ok(Vec::new());
    };
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let prefix = format!("{}.", file_name);

    let mut entries = match fs::read_dir(&dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(io_error(&dir, e)),
    };
    let mut backups = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(|e| io_error(&dir, e))? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if name.starts_with(&prefix) && name.ends_with(".bak") {
            backups.push(entry.path());
        }
    }
    backups.sort_unstable_by(|a, b| b.cmp(a));
    Ok(backups)
}

/// Remove every backup of `path` other than `keep`.
async fn prune_backups(path: &Path, keep: &Path) -> StoreResult<()> {
    for backup in list_backups(path).await? {
        if backup.file_name() == keep.file_name() {
            continue;
        }
        if let Err(e) = fs::remove_file(&backup).await {
            warn!(backup = %backup.display(), "Failed to remove old backup: {}", e);
        }
    }
    Ok(())
}

/// Newest backup of `path` that still decodes.
pub async fn read_latest_backup(path: &Path) -> StoreResult<Option<(PathBuf, Vec<ServerPair>)>> {
    for backup in list_backups(path).await? {
        let bytes = match fs::read(&backup).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(backup = %backup.display(), "Failed to read backup: {}", e);
                continue;
            }
        };
        match decode(&bytes) {
            Ok(pairs) => return Ok(Some((backup, pairs))),
            Err(e) => warn!(backup = %backup.display(), "Backup unusable: {}", e),
        }
    }
    Ok(None)
}

/// Commit bytes to `path`.
///
/// A current file that decodes is copied to `<path>.<UTC timestamp>.bak` and
/// older backups are pruned. One that does not decode is set aside as
/// `<path>.<UTC timestamp>.corrupt` and the backups are left alone. The new
/// content then goes to a temp file which is renamed over the target.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> StoreResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| io_error(parent, e))?;
    }

    if let Some(existing) = read_file(path).await? {
        let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%.3fZ").to_string();
        if decode(&existing).is_ok() {
            let backup = stamped_path(path, &stamp, "bak");
            fs::write(&backup, &existing).await.map_err(|e| io_error(&backup, e))?;
            prune_backups(path, &backup).await?;
        } else {
            let kept = stamped_path(path, &stamp, "corrupt");
            fs::write(&kept, &existing).await.map_err(|e| io_error(&kept, e))?;
            warn!(path = %path.display(), kept = %kept.display(), "Overwriting undecodable store, previous content kept");
        }
    }

    let mut temp = path.as_os_str().to_owned();
    temp.push(".tmp");
    let temp = PathBuf::from(temp);

    fs::write(&temp, bytes).await.map_err(|e| io_error(&temp, e))?;
    fs::rename(&temp, path).await.map_err(|e| io_error(path, e))?;

    debug!(path = %path.display(), bytes = bytes.len(), "Store committed");
    Ok(())
}
