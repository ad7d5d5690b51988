//! Mapping store.
//!
//! Holds one `ServerPair` per destination guild. Every mutation is applied
//! to a copy of the pair, committed to disk, and only then made visible to
//! readers. Mutations are serialized by a single write lock; readers always
//! get cloned snapshots and never hold a pair across an await.

pub mod pair;
pub mod persist;
pub mod remote;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serenity::model::id::{ChannelId, GuildId, UserId};
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{error, info, warn};

use crate::common::error::{StoreError, StoreResult};

pub use pair::{
    LogChannels, LogRole, MappingKey, PairPreset, PresetOutcome, RelayDirection, Resolved,
    ServerPair,
};
pub use remote::{HttpBlobBackend, RemoteBackend};

/// Where the initial state came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadedFrom {
    Local,
    /// Newest decodable `.bak` next to an undecodable local file.
    Backup,
    Remote,
    Empty,
}

pub struct MappingStore {
    pairs: RwLock<BTreeMap<GuildId, ServerPair>>,
    write_lock: Mutex<()>,
    path: PathBuf,
    /// Latest committed bytes, drained by the remote push task.
    remote_tx: Option<watch::Sender<Option<Vec<u8>>>>,
    loaded_from: LoadedFrom,
}

impl MappingStore {
    /// Load the store from `path`.
    ///
    /// An undecodable file falls back to its newest usable backup. A missing
    /// file, or one without a usable backup, falls back to the remote copy,
    /// then to an empty store. Loading never fails.
    pub async fn open(path: impl Into<PathBuf>, remote: Option<Arc<dyn RemoteBackend>>) -> Self {
        let path = path.into();
        let (pairs, loaded_from) = load(&path, remote.as_deref()).await;

        let remote_tx = remote.map(|backend| {
            let (tx, rx) = watch::channel(None);
            tokio::spawn(push_remote(backend, rx));
            tx
        });

        let store = Self {
            pairs: RwLock::new(pairs.into_iter().map(|p| (p.dest_guild, p)).collect()),
            write_lock: Mutex::new(()),
            path,
            remote_tx,
            loaded_from,
        };

        if matches!(loaded_from, LoadedFrom::Backup | LoadedFrom::Remote) {
            if let Err(e) = store.persist().await {
                error!("Failed to write restored store locally: {}", e);
            }
        }

        store
    }

    pub fn loaded_from(&self) -> LoadedFrom {
        self.loaded_from
    }

    /// Snapshot of the pair whose destination is `dest`.
    pub async fn pair(&self, dest: GuildId) -> Option<ServerPair> {
        self.pairs.read().await.get(&dest).cloned()
    }

    /// Snapshots of every pair mirroring `source`.
    pub async fn pairs_by_source(&self, source: GuildId) -> Vec<ServerPair> {
        self.pairs
            .read()
            .await
            .values()
            .filter(|p| p.source_guild == Some(source))
            .cloned()
            .collect()
    }

    pub async fn pair_count(&self) -> usize {
        self.pairs.read().await.len()
    }

    /// Register `dest` as a destination guild with `user` as its first admin.
    ///
    /// Idempotent: an existing pair is returned untouched. The flag is `true`
    /// when the pair was created by this call.
    pub async fn claim(&self, dest: GuildId, user: UserId) -> StoreResult<(ServerPair, bool)> {
        self.update(dest, |slot| {
            if let Some(existing) = slot.as_ref() {
                return Ok(((existing.clone(), false), false));
            }
            let pair = ServerPair::new(dest, user);
            *slot = Some(pair.clone());
            info!(guild = %dest, admin = %user, "Server pair claimed");
            Ok(((pair, true), true))
        })
        .await
    }

    /// Attach the source guild. Channel creation is left to the synchronizer.
    pub async fn link(&self, dest: GuildId, source: GuildId) -> StoreResult<ServerPair> {
        self.update_pair(dest, |pair| {
            if pair.source_guild == Some(source) {
                return Ok((pair.clone(), false));
            }
            if let Some(previous) = pair.source_guild {
                warn!(guild = %dest, previous = %previous, source = %source, "Relinking pair to a new source");
            }
            pair.source_guild = Some(source);
            Ok((pair.clone(), true))
        })
        .await
    }

    /// Resolve a source channel for the pair of `dest`.
    pub async fn resolve_dest_channel(&self, dest: GuildId, source_channel: ChannelId) -> Option<Resolved> {
        self.pairs
            .read()
            .await
            .get(&dest)
            .and_then(|p| p.resolve_dest_channel(source_channel))
    }

    /// Record a mapping entry. Fails with `MappingConflict` on a re-map.
    pub async fn record_mapping(&self, dest: GuildId, key: MappingKey, channel: ChannelId) -> StoreResult<bool> {
        self.update_pair(dest, |pair| {
            let added = pair.record_mapping(key, channel)?;
            Ok((added, added))
        })
        .await
    }

    pub async fn set_log_channel(&self, dest: GuildId, role: LogRole, channel: Option<ChannelId>) -> StoreResult<()> {
        self.update_pair(dest, |pair| {
            let changed = pair.log_channels.get(role) != channel;
            pair.log_channels.set(role, channel);
            Ok(((), changed))
        })
        .await
    }

    pub async fn set_direction(&self, dest: GuildId, direction: RelayDirection) -> StoreResult<()> {
        self.update_pair(dest, |pair| {
            let changed = pair.direction != direction;
            pair.direction = direction;
            Ok(((), changed))
        })
        .await
    }

    /// Returns `false` if the user already was an admin.
    pub async fn add_admin(&self, dest: GuildId, user: UserId) -> StoreResult<bool> {
        self.update_pair(dest, |pair| {
            let added = pair.admins.insert(user);
            Ok((added, added))
        })
        .await
    }

    /// Returns `false` if the user already was a reader.
    pub async fn add_reader(&self, dest: GuildId, user: UserId) -> StoreResult<bool> {
        self.update_pair(dest, |pair| {
            let added = pair.read_users.insert(user);
            Ok((added, added))
        })
        .await
    }

    /// Snapshot the pair's configuration under `name`, replacing any preset
    /// of the same name.
    pub async fn save_preset(&self, dest: GuildId, name: &str) -> StoreResult<PairPreset> {
        self.update_pair(dest, |pair| {
            let preset = pair.snapshot();
            pair.presets.insert(name.to_string(), preset.clone());
            Ok((preset, true))
        })
        .await
    }

    pub async fn load_preset(&self, dest: GuildId, name: &str) -> StoreResult<PresetOutcome> {
        self.update_pair(dest, |pair| {
            let preset = pair
                .presets
                .get(name)
                .cloned()
                .ok_or_else(|| StoreError::PresetNotFound {
                    name: name.to_string(),
                })?;
            let outcome = pair.apply_preset(&preset)?;
            Ok((outcome, true))
        })
        .await
    }

    /// Write the current state to disk (and queue a remote push).
    pub async fn persist(&self) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;
        let bytes = persist::encode(self.pairs.read().await.values())?;
        self.commit(bytes).await
    }

    async fn update_pair<T, F>(&self, dest: GuildId, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut ServerPair) -> StoreResult<(T, bool)>,
    {
        self.update(dest, |slot| match slot {
            Some(pair) => f(pair),
            None => Err(StoreError::PairNotFound { guild_id: dest.get() }),
        })
        .await
    }

    /// Apply `f` to a copy of the pair slot, commit if it reports a change,
    /// then publish the copy.
    async fn update<T, F>(&self, dest: GuildId, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Option<ServerPair>) -> StoreResult<(T, bool)>,
    {
        let _guard = self.write_lock.lock().await;

        let mut slot = self.pairs.read().await.get(&dest).cloned();
        let (value, changed) = f(&mut slot)?;
        let Some(pair) = slot.filter(|_| changed) else {
            return Ok(value);
        };

        let bytes = {
            let pairs = self.pairs.read().await;
            let mut view: BTreeMap<GuildId, &ServerPair> = pairs.iter().map(|(k, v)| (*k, v)).collect();
            view.insert(dest, &pair);
            persist::encode(view.into_values())?
        };
        self.commit(bytes).await?;

        self.pairs.write().await.insert(dest, pair);
        Ok(value)
    }

    async fn commit(&self, bytes: Vec<u8>) -> StoreResult<()> {
        persist::write_atomic(&self.path, &bytes).await?;
        if let Some(tx) = &self.remote_tx {
            tx.send_replace(Some(bytes));
        }
        Ok(())
    }
}

async fn load(path: &Path, remote: Option<&dyn RemoteBackend>) -> (Vec<ServerPair>, LoadedFrom) {
    match persist::read_file(path).await {
        Ok(Some(bytes)) => match persist::decode(&bytes) {
            Ok(pairs) => {
                info!(path = %path.display(), pairs = pairs.len(), "Store loaded");
                return (pairs, LoadedFrom::Local);
            }
            Err(e) => {
                error!(path = %path.display(), "Local store unusable: {}", e);
                if let Some(pairs) = load_backup(path).await {
                    return (pairs, LoadedFrom::Backup);
                }
            }
        },
        Ok(None) => info!(path = %path.display(), "No local store file"),
        Err(e) => {
            error!("{}", e);
            if let Some(pairs) = load_backup(path).await {
                return (pairs, LoadedFrom::Backup);
            }
        }
    }

    if let Some(remote) = remote {
        match remote.pull().await {
            Ok(Some(bytes)) => match persist::decode(&bytes) {
                Ok(pairs) => {
                    info!(pairs = pairs.len(), "Store bootstrapped from remote copy");
                    return (pairs, LoadedFrom::Remote);
                }
                Err(e) => error!("Remote store unusable: {}", e),
            },
            Ok(None) => info!("Remote store is empty"),
            Err(e) => warn!("Failed to pull remote store: {}", e),
        }
    }

    warn!("Starting with an empty store");
    (Vec::new(), LoadedFrom::Empty)
}

async fn load_backup(path: &Path) -> Option<Vec<ServerPair>> {
    match persist::read_latest_backup(path).await {
        Ok(Some((backup, pairs))) => {
            warn!(backup = %backup.display(), pairs = pairs.len(), "Store restored from backup");
            Some(pairs)
        }
        Ok(None) => None,
        Err(e) => {
            error!("Failed to look for store backups: {}", e);
            None
        }
    }
}

/// Push the most recent commit whenever one lands. Intermediate commits
/// that arrive during a push are coalesced.
async fn push_remote(backend: Arc<dyn RemoteBackend>, mut rx: watch::Receiver<Option<Vec<u8>>>) {
    while rx.changed().await.is_ok() {
        let Some(bytes) = rx.borrow_and_update().clone() else {
            continue;
        };
        if let Err(e) = backend.push(bytes).await {
            warn!("Remote store push failed, local copy is unaffected: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::remote::testing::MemoryBackend;
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio_test::{assert_err, assert_ok};

    const DEST: GuildId = GuildId::new(500);
    const ADMIN: UserId = UserId::new(1);

    async fn open(dir: &TempDir) -> MappingStore {
        MappingStore::open(dir.path().join("store.json"), None).await
    }

    async fn wait_for_push(backend: &MemoryBackend, done: impl Fn(&[ServerPair]) -> bool) {
        for _ in 0..200 {
            if let Some(bytes) = backend.contents() {
                if persist::decode(&bytes).map(|p| done(&p)).unwrap_or(false) {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("remote push never happened");
    }

    #[tokio::test]
    async fn test_claim_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;

        let (pair, created) = store.claim(DEST, ADMIN).await.unwrap();
        assert!(created);
        assert!(pair.is_admin(ADMIN));

        let (again, created) = store.claim(DEST, UserId::new(2)).await.unwrap();
        assert!(!created);
        assert!(!again.is_admin(UserId::new(2)));
        assert_eq!(store.pair_count().await, 1);
    }

    #[tokio::test]
    async fn test_mutations_survive_reload() {
        let dir = TempDir::new().unwrap();
        {
            let store = open(&dir).await;
            store.claim(DEST, ADMIN).await.unwrap();
            store.link(DEST, GuildId::new(100)).await.unwrap();
            store
                .record_mapping(DEST, MappingKey::Channel(ChannelId::new(10)), ChannelId::new(901))
                .await
                .unwrap();
            store
                .set_log_channel(DEST, LogRole::Debug, Some(ChannelId::new(42)))
                .await
                .unwrap();
            assert!(store.add_reader(DEST, UserId::new(7)).await.unwrap());
        }

        let store = open(&dir).await;
        assert_eq!(store.loaded_from(), LoadedFrom::Local);
        let pair = store.pair(DEST).await.unwrap();
        assert_eq!(pair.source_guild, Some(GuildId::new(100)));
        assert_eq!(pair.log_channels.debug, Some(ChannelId::new(42)));
        assert!(pair.can_read(UserId::new(7)));
        assert_eq!(
            store.resolve_dest_channel(DEST, ChannelId::new(10)).await,
            Some(Resolved::Mapped(ChannelId::new(901)))
        );
        assert_eq!(store.pairs_by_source(GuildId::new(100)).await.len(), 1);
    }

    #[tokio::test]
    async fn test_conflicting_mapping_is_rejected_and_not_committed() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;
        store.claim(DEST, ADMIN).await.unwrap();

        let key = MappingKey::Channel(ChannelId::new(10));
        assert!(assert_ok!(store.record_mapping(DEST, key, ChannelId::new(901)).await));
        assert!(!assert_ok!(store.record_mapping(DEST, key, ChannelId::new(901)).await));

        let err = assert_err!(store.record_mapping(DEST, key, ChannelId::new(902)).await);
        assert!(matches!(err, StoreError::MappingConflict { .. }));
        assert_eq!(
            store.pair(DEST).await.unwrap().mapping[&key],
            ChannelId::new(901)
        );
    }

    #[tokio::test]
    async fn test_unknown_pair() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;
        let err = assert_err!(store.link(DEST, GuildId::new(100)).await);
        assert!(matches!(err, StoreError::PairNotFound { guild_id: 500 }));
    }

    fn files_ending(dir: &TempDir, suffix: &str) -> usize {
        std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(suffix))
            .count()
    }

    #[tokio::test]
    async fn test_corrupt_file_degrades_to_empty() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("store.json"), b"{ broken").unwrap();

        let store = open(&dir).await;
        assert_eq!(store.loaded_from(), LoadedFrom::Empty);
        assert_eq!(store.pair_count().await, 0);

        // The broken file is set aside on the first commit, not rotated in as a backup.
        store.claim(DEST, ADMIN).await.unwrap();
        assert_eq!(files_ending(&dir, ".corrupt"), 1);
        assert_eq!(files_ending(&dir, ".bak"), 0);
    }

    #[tokio::test]
    async fn test_corrupt_file_restores_from_backup() {
        let dir = TempDir::new().unwrap();
        {
            let store = open(&dir).await;
            store.claim(DEST, ADMIN).await.unwrap();
            store.link(DEST, GuildId::new(100)).await.unwrap();
        }
        assert_eq!(files_ending(&dir, ".bak"), 1);
        std::fs::write(dir.path().join("store.json"), b"{ broken").unwrap();

        let other = GuildId::new(600);
        {
            let store = open(&dir).await;
            assert_eq!(store.loaded_from(), LoadedFrom::Backup);
            assert!(store.pair(DEST).await.is_some());
            store.claim(other, UserId::new(2)).await.unwrap();
        }
        assert_eq!(files_ending(&dir, ".corrupt"), 1);

        let store = open(&dir).await;
        assert_eq!(store.loaded_from(), LoadedFrom::Local);
        assert!(store.pair(DEST).await.unwrap().is_admin(ADMIN));
        assert!(store.pair(other).await.is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_mutations_are_all_committed() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(open(&dir).await);
        store.claim(DEST, ADMIN).await.unwrap();

        let mut tasks = Vec::new();
        for i in 0..25u64 {
            let admins = store.clone();
            tasks.push(tokio::spawn(async move {
                admins.add_admin(DEST, UserId::new(100 + i)).await.map(|_| ())
            }));
            let mappings = store.clone();
            tasks.push(tokio::spawn(async move {
                mappings
                    .record_mapping(DEST, MappingKey::Channel(ChannelId::new(1000 + i)), ChannelId::new(2000 + i))
                    .await
                    .map(|_| ())
            }));
        }
        for task in tasks {
            assert_ok!(task.await.unwrap());
        }

        let reloaded = open(&dir).await;
        let pair = reloaded.pair(DEST).await.unwrap();
        assert_eq!(pair.admins.len(), 26);
        assert_eq!(pair.mapping.len(), 25);
        assert_eq!(
            pair.mapping[&MappingKey::Channel(ChannelId::new(1024))],
            ChannelId::new(2024)
        );
    }

    #[tokio::test]
    async fn test_remote_bootstrap_and_push() {
        let dir = TempDir::new().unwrap();
        let seed = MappingStore::open(dir.path().join("seed.json"), None).await;
        seed.claim(DEST, ADMIN).await.unwrap();
        let seed_bytes = std::fs::read(dir.path().join("seed.json")).unwrap();

        let backend = Arc::new(MemoryBackend::with_blob(&seed_bytes));
        let store = MappingStore::open(dir.path().join("store.json"), Some(backend.clone())).await;
        assert_eq!(store.loaded_from(), LoadedFrom::Remote);
        assert!(store.pair(DEST).await.is_some());
        assert!(dir.path().join("store.json").exists());

        store.add_admin(DEST, UserId::new(2)).await.unwrap();
        wait_for_push(&backend, |pairs| pairs[0].is_admin(UserId::new(2))).await;
    }

    #[tokio::test]
    async fn test_failed_push_does_not_block_local_commit() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(MemoryBackend {
            fail_push: true,
            ..Default::default()
        });
        let store = MappingStore::open(dir.path().join("store.json"), Some(backend)).await;

        store.claim(DEST, ADMIN).await.unwrap();
        let reloaded = open(&dir).await;
        assert!(reloaded.pair(DEST).await.is_some());
    }

    #[tokio::test]
    async fn test_presets_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;
        store.claim(DEST, ADMIN).await.unwrap();
        store
            .set_log_channel(DEST, LogRole::Audit, Some(ChannelId::new(77)))
            .await
            .unwrap();
        store.save_preset(DEST, "base").await.unwrap();

        store.set_log_channel(DEST, LogRole::Audit, None).await.unwrap();
        store.set_direction(DEST, RelayDirection::Both).await.unwrap();

        let outcome = store.load_preset(DEST, "base").await.unwrap();
        assert_eq!(outcome, PresetOutcome::default());
        let pair = store.pair(DEST).await.unwrap();
        assert_eq!(pair.log_channels.audit, Some(ChannelId::new(77)));
        assert_eq!(pair.direction, RelayDirection::AToB);

        let err = store.load_preset(DEST, "missing").await.unwrap_err();
        assert!(matches!(err, StoreError::PresetNotFound { .. }));
    }
}
