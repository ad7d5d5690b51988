//! Structure synchronizer.
//!
//! One-shot walk of the source guild's channel tree that creates the
//! missing counterparts on the destination guild. Every new mapping entry is
//! recorded as soon as its channel exists, so an interrupted run resumes
//! cleanly on the next call.

use std::collections::HashSet;

use serenity::model::id::{ChannelId, GuildId};
use tracing::{debug, info, warn};

use crate::common::error::{StoreError, StoreResult};
use crate::common::types::{ChannelInfo, ChannelKind, NewChannel};
use crate::discord::api::GuildApi;
use crate::store::{MappingKey, MappingStore, ServerPair};

/// Outcome of one synchronization run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Destination channels created by this run.
    pub created: usize,
    /// Existing destination channels adopted instead of creating duplicates.
    pub reused: usize,
    /// Source entities that already had a mapping entry.
    pub skipped: usize,
    /// One line per entity that could not be mirrored.
    pub errors: Vec<String>,
}

impl SyncReport {
    pub fn summary(&self) -> String {
        format!(
            "created {} / reused {} / skipped {} / errors {}",
            self.created,
            self.reused,
            self.skipped,
            self.errors.len()
        )
    }
}

/// Source channels in creation order: categories, then text, then voice.
fn creation_order(channels: &[ChannelInfo]) -> Vec<&ChannelInfo> {
    let rank = |kind: ChannelKind| match kind {
        ChannelKind::Category => 0,
        ChannelKind::Text => 1,
        ChannelKind::Voice => 2,
        ChannelKind::Other => 3,
    };
    let mut ordered: Vec<&ChannelInfo> = channels
        .iter()
        .filter(|c| c.kind != ChannelKind::Other)
        .collect();
    ordered.sort_by_key(|c| (rank(c.kind), c.position, c.id));
    ordered
}

/// Source text channel sharing a voice channel's name and category.
fn companion_key(voice: &ChannelInfo, source_channels: &[ChannelInfo]) -> MappingKey {
    source_channels
        .iter()
        .find(|c| c.kind == ChannelKind::Text && c.name == voice.name && c.parent == voice.parent)
        .map(|text| MappingKey::Channel(text.id))
        .unwrap_or(MappingKey::VoiceText(voice.id))
}

pub struct Synchronizer<'a> {
    store: &'a MappingStore,
    api: &'a dyn GuildApi,
}

impl<'a> Synchronizer<'a> {
    pub fn new(store: &'a MappingStore, api: &'a dyn GuildApi) -> Self {
        Self { store, api }
    }

    /// Mirror the source guild of the pair registered for `dest`.
    ///
    /// Fails only if the pair is unknown or has no source. Everything that
    /// goes wrong per entity ends up in the report.
    pub async fn sync(&self, dest: GuildId) -> StoreResult<SyncReport> {
        let pair = self.current(dest).await?;
        let source = pair.source_guild.ok_or(StoreError::NotLinked {
            guild_id: dest.get(),
        })?;

        let mut report = SyncReport::default();

        let source_channels = match self.api.channels(source).await {
            Ok(channels) => channels,
            Err(e) => {
                report.errors.push(format!("source guild {}: {}", source, e));
                return Ok(report);
            }
        };
        let mut dest_channels = match self.api.channels(dest).await {
            Ok(channels) => channels,
            Err(e) => {
                report.errors.push(format!("destination guild {}: {}", dest, e));
                return Ok(report);
            }
        };

        info!(source = %source, dest = %dest, channels = source_channels.len(), "Synchronizing guild structure");

        for channel in creation_order(&source_channels) {
            self.mirror(dest, channel, channel.kind, MappingKey::Channel(channel.id), &mut dest_channels, &mut report)
                .await?;

            if channel.kind == ChannelKind::Voice {
                match companion_key(channel, &source_channels) {
                    key @ MappingKey::VoiceText(_) => {
                        self.mirror(dest, channel, ChannelKind::Text, key, &mut dest_channels, &mut report)
                            .await?
                    }
                    text_key => self.alias_voice_chat(dest, channel, text_key, &mut report).await?,
                }
            }
        }

        info!(dest = %dest, "Synchronization finished: {}", report.summary());
        Ok(report)
    }

    /// Re-read the pair; other tasks may have changed it while we awaited.
    async fn current(&self, dest: GuildId) -> StoreResult<ServerPair> {
        self.store.pair(dest).await.ok_or(StoreError::PairNotFound {
            guild_id: dest.get(),
        })
    }

    /// Point the voice channel's built-in chat at the destination of its
    /// same-named text channel. Nothing is created, so nothing is counted.
    async fn alias_voice_chat(
        &self,
        dest: GuildId,
        voice: &ChannelInfo,
        text_key: MappingKey,
        report: &mut SyncReport,
    ) -> StoreResult<()> {
        let pair = self.current(dest).await?;
        let alias = MappingKey::VoiceText(voice.id);
        if pair.is_mapped(&alias) {
            return Ok(());
        }
        // The text channel failed this run; the next run picks it up.
        let Some(target) = pair.mapping.get(&text_key).copied() else {
            return Ok(());
        };

        match self.store.record_mapping(dest, alias, target).await {
            Ok(_) => debug!(key = %alias, channel = %target, "Voice chat follows text channel '{}'", voice.name),
            Err(e @ StoreError::MappingConflict { .. }) => {
                report.errors.push(format!("voice chat '{}': {}", voice.name, e));
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }

    /// Ensure the destination counterpart of one source entity exists and is
    /// recorded under `key`.
    async fn mirror(
        &self,
        dest: GuildId,
        source: &ChannelInfo,
        kind: ChannelKind,
        key: MappingKey,
        dest_channels: &mut Vec<ChannelInfo>,
        report: &mut SyncReport,
    ) -> StoreResult<()> {
        let pair = self.current(dest).await?;
        if pair.is_mapped(&key) {
            debug!(key = %key, "Already mapped");
            report.skipped += 1;
            return Ok(());
        }

        // An unmapped source category means the counterpart goes top-level.
        let parent = source
            .parent
            .and_then(|p| pair.mapping.get(&MappingKey::Channel(p)).copied());

        let taken: HashSet<ChannelId> = pair.mapping.values().copied().collect();
        let existing = dest_channels
            .iter()
            .find(|c| c.kind == kind && c.name == source.name && c.parent == parent && !taken.contains(&c.id))
            .map(|c| c.id);

        let (target, reused) = match existing {
            Some(id) => (id, true),
            None => {
                let request = NewChannel {
                    name: source.name.clone(),
                    kind,
                    parent,
                };
                match self.api.create_channel(dest, request).await {
                    Ok(created) => {
                        let id = created.id;
                        dest_channels.push(created);
                        (id, false)
                    }
                    Err(e) => {
                        warn!(key = %key, name = %source.name, "Failed to create {} channel: {}", kind.name(), e);
                        report
                            .errors
                            .push(format!("{} '{}': {}", kind.name(), source.name, e));
                        return Ok(());
                    }
                }
            }
        };

        match self.store.record_mapping(dest, key, target).await {
            Ok(_) => {
                if reused {
                    info!(key = %key, channel = %target, "Reused existing {} channel '{}'", kind.name(), source.name);
                    report.reused += 1;
                } else {
                    info!(key = %key, channel = %target, "Created {} channel '{}'", kind.name(), source.name);
                    report.created += 1;
                }
            }
            Err(e @ StoreError::MappingConflict { .. }) => {
                report.errors.push(format!("{} '{}': {}", kind.name(), source.name, e));
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discord::fake::FakeGuildApi;
    use crate::store::Resolved;
    use serenity::model::id::UserId;
    use tempfile::TempDir;

    const SOURCE: u64 = 100;
    const DEST: GuildId = GuildId::new(500);

    fn fake_guilds() -> FakeGuildApi {
        let api = FakeGuildApi::new(900);
        api.add_channel(SOURCE, 5, "General", ChannelKind::Category, None);
        api.add_channel(SOURCE, 10, "chat", ChannelKind::Text, Some(5));
        api.add_channel(SOURCE, 20, "VC-1", ChannelKind::Voice, Some(5));
        api.add_guild(DEST.get());
        api
    }

    async fn linked_store(dir: &TempDir) -> MappingStore {
        let store = MappingStore::open(dir.path().join("store.json"), None).await;
        store.claim(DEST, UserId::new(1)).await.unwrap();
        store.link(DEST, GuildId::new(SOURCE)).await.unwrap();
        store
    }

    fn mapped(pair: &ServerPair, key: MappingKey) -> u64 {
        pair.mapping[&key].get()
    }

    #[tokio::test]
    async fn test_first_run_mirrors_tree() {
        let dir = TempDir::new().unwrap();
        let store = linked_store(&dir).await;
        let api = fake_guilds();

        let report = Synchronizer::new(&store, &api).sync(DEST).await.unwrap();
        assert_eq!(report.created, 4);
        assert_eq!(report.skipped, 0);
        assert!(report.errors.is_empty());

        let pair = store.pair(DEST).await.unwrap();
        assert_eq!(mapped(&pair, MappingKey::Channel(ChannelId::new(5))), 900);
        assert_eq!(mapped(&pair, MappingKey::Channel(ChannelId::new(10))), 901);
        assert_eq!(mapped(&pair, MappingKey::Channel(ChannelId::new(20))), 902);
        assert_eq!(mapped(&pair, MappingKey::VoiceText(ChannelId::new(20))), 903);

        let dest_channels = api.channels_of(DEST.get());
        let companion = dest_channels.iter().find(|c| c.id == ChannelId::new(903)).unwrap();
        assert_eq!(companion.name, "VC-1");
        assert_eq!(companion.kind, ChannelKind::Text);
        assert_eq!(companion.parent, Some(ChannelId::new(900)));

        for dest_channel in pair.mapping.values() {
            assert!(api.channel_exists(DEST.get(), *dest_channel));
        }
    }

    #[tokio::test]
    async fn test_second_run_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = linked_store(&dir).await;
        let api = fake_guilds();
        let sync = Synchronizer::new(&store, &api);

        sync.sync(DEST).await.unwrap();
        let report = sync.sync(DEST).await.unwrap();

        assert_eq!(report.created, 0);
        assert_eq!(report.skipped, 4);
        assert_eq!(api.created_count(), 4);
    }

    #[tokio::test]
    async fn test_same_named_text_channel_is_the_companion() {
        let dir = TempDir::new().unwrap();
        let store = linked_store(&dir).await;
        let api = fake_guilds();
        api.add_channel(SOURCE, 11, "VC-1", ChannelKind::Text, Some(5));

        let report = Synchronizer::new(&store, &api).sync(DEST).await.unwrap();
        assert_eq!(report.created, 4);

        let pair = store.pair(DEST).await.unwrap();
        let text = pair.mapping[&MappingKey::Channel(ChannelId::new(11))];
        assert_eq!(pair.mapping[&MappingKey::VoiceText(ChannelId::new(20))], text);
        assert_eq!(api.created_count(), 4);

        // Voice chat lands next to the text channel, not in the voice channel.
        assert_eq!(
            store.resolve_dest_channel(DEST, ChannelId::new(20)).await,
            Some(Resolved::Mapped(text))
        );
    }

    #[tokio::test]
    async fn test_voice_chat_alias_is_added_to_existing_mapping() {
        let dir = TempDir::new().unwrap();
        let store = linked_store(&dir).await;
        let api = fake_guilds();
        api.add_channel(SOURCE, 11, "VC-1", ChannelKind::Text, Some(5));
        api.fail_create("VC-1");
        let sync = Synchronizer::new(&store, &api);

        sync.sync(DEST).await.unwrap();
        let pair = store.pair(DEST).await.unwrap();
        assert!(!pair.is_mapped(&MappingKey::VoiceText(ChannelId::new(20))));

        api.allow_create("VC-1");
        let report = sync.sync(DEST).await.unwrap();
        assert_eq!(report.created, 2);
        assert!(report.errors.is_empty());
        let pair = store.pair(DEST).await.unwrap();
        assert_eq!(
            pair.mapping[&MappingKey::VoiceText(ChannelId::new(20))],
            pair.mapping[&MappingKey::Channel(ChannelId::new(11))]
        );
    }

    #[tokio::test]
    async fn test_partial_failure_resumes() {
        let dir = TempDir::new().unwrap();
        let store = linked_store(&dir).await;
        let api = fake_guilds();
        api.fail_create("chat");
        let sync = Synchronizer::new(&store, &api);

        let report = sync.sync(DEST).await.unwrap();
        assert_eq!(report.created, 3);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("'chat'"));
        assert!(!store.pair(DEST).await.unwrap().is_mapped(&MappingKey::Channel(ChannelId::new(10))));

        api.allow_create("chat");
        let report = sync.sync(DEST).await.unwrap();
        assert_eq!(report.created, 1);
        assert_eq!(report.skipped, 3);
        assert!(report.errors.is_empty());
    }

    #[tokio::test]
    async fn test_unmapped_category_goes_top_level() {
        let dir = TempDir::new().unwrap();
        let store = linked_store(&dir).await;
        let api = fake_guilds();
        api.fail_create("General");

        Synchronizer::new(&store, &api).sync(DEST).await.unwrap();

        let chat = api
            .channels_of(DEST.get())
            .into_iter()
            .find(|c| c.name == "chat")
            .unwrap();
        assert_eq!(chat.parent, None);
    }

    #[tokio::test]
    async fn test_existing_destination_channels_are_reused() {
        let dir = TempDir::new().unwrap();
        let store = linked_store(&dir).await;
        let api = fake_guilds();
        api.add_channel(DEST.get(), 700, "General", ChannelKind::Category, None);
        api.add_channel(DEST.get(), 701, "chat", ChannelKind::Text, Some(700));

        let report = Synchronizer::new(&store, &api).sync(DEST).await.unwrap();
        assert_eq!(report.reused, 2);
        assert_eq!(report.created, 2);

        let pair = store.pair(DEST).await.unwrap();
        assert_eq!(mapped(&pair, MappingKey::Channel(ChannelId::new(10))), 701);
    }

    #[tokio::test]
    async fn test_unlinked_pair_is_an_error() {
        let dir = TempDir::new().unwrap();
        let store = MappingStore::open(dir.path().join("store.json"), None).await;
        store.claim(DEST, UserId::new(1)).await.unwrap();
        let api = fake_guilds();

        let err = Synchronizer::new(&store, &api).sync(DEST).await.unwrap_err();
        assert!(matches!(err, StoreError::NotLinked { guild_id: 500 }));
    }

    #[tokio::test]
    async fn test_unreachable_source_is_reported() {
        let dir = TempDir::new().unwrap();
        let store = MappingStore::open(dir.path().join("store.json"), None).await;
        store.claim(DEST, UserId::new(1)).await.unwrap();
        store.link(DEST, GuildId::new(404)).await.unwrap();
        let api = fake_guilds();

        let report = Synchronizer::new(&store, &api).sync(DEST).await.unwrap();
        assert_eq!(report.created, 0);
        assert_eq!(report.errors.len(), 1);
    }
}
