//! Presence and audit logging for source guilds.

pub mod events;

use serenity::model::id::GuildId;
use tracing::{debug, warn};

use crate::common::types::OutgoingMessage;
use crate::discord::api::GuildApi;
use crate::store::MappingStore;

pub use events::{
    classify_voice, compute_guild_changes, GuildSettings, InviteInfo, MemberRef, PresenceEvent,
    VoiceChannelRef, VoiceTransition,
};

pub struct PresenceLogger<'a> {
    store: &'a MappingStore,
    api: &'a dyn GuildApi,
}

impl<'a> PresenceLogger<'a> {
    pub fn new(store: &'a MappingStore, api: &'a dyn GuildApi) -> Self {
        Self { store, api }
    }

    /// Post one notification per pair mirroring `source`.
    ///
    /// Returns how many notifications were delivered. Failed sends are
    /// logged and dropped.
    pub async fn log(&self, source: GuildId, event: &PresenceEvent) -> usize {
        let role = event.log_role();
        let mut delivered = 0;

        for pair in self.store.pairs_by_source(source).await {
            let Some(channel) = pair.log_channels.get(role) else {
                debug!(dest = %pair.dest_guild, role = role.name(), "No log channel set, skipping event");
                continue;
            };
            match self.api.send(channel, OutgoingMessage::Embed(event.to_embed())).await {
                Ok(()) => delivered += 1,
                Err(e) => warn!(channel = %channel, role = role.name(), "Failed to post presence event: {}", e),
            }
        }

        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::ChannelKind;
    use crate::discord::fake::FakeGuildApi;
    use crate::store::LogRole;
    use serenity::model::id::{ChannelId, UserId};
    use tempfile::TempDir;

    const SOURCE: GuildId = GuildId::new(100);

    async fn store_with_pairs(dir: &TempDir) -> MappingStore {
        let store = MappingStore::open(dir.path().join("store.json"), None).await;
        for (dest, audit, vc) in [(500, Some(61), Some(62)), (600, None, Some(72))] {
            let dest = GuildId::new(dest);
            store.claim(dest, UserId::new(1)).await.unwrap();
            store.link(dest, SOURCE).await.unwrap();
            store
                .set_log_channel(dest, LogRole::Audit, audit.map(ChannelId::new))
                .await
                .unwrap();
            store
                .set_log_channel(dest, LogRole::VcLog, vc.map(ChannelId::new))
                .await
                .unwrap();
        }
        store
    }

    fn bob() -> MemberRef {
        MemberRef {
            id: UserId::new(7),
            name: "bob".to_string(),
        }
    }

    #[tokio::test]
    async fn test_audit_event_skips_pairs_without_channel() {
        let dir = TempDir::new().unwrap();
        let store = store_with_pairs(&dir).await;
        let api = FakeGuildApi::new(900);

        let delivered = PresenceLogger::new(&store, &api)
            .log(SOURCE, &PresenceEvent::MemberJoined(bob()))
            .await;
        assert_eq!(delivered, 1);
        assert_eq!(api.sent_to(61).len(), 1);
    }

    #[tokio::test]
    async fn test_voice_event_fans_out() {
        let dir = TempDir::new().unwrap();
        let store = store_with_pairs(&dir).await;
        let api = FakeGuildApi::new(900);
        api.add_channel(SOURCE.get(), 20, "VC-1", ChannelKind::Voice, None);

        let event = PresenceEvent::Voice {
            member: bob(),
            transition: VoiceTransition::Joined(VoiceChannelRef {
                id: ChannelId::new(20),
                name: "VC-1".to_string(),
            }),
        };
        let delivered = PresenceLogger::new(&store, &api).log(SOURCE, &event).await;
        assert_eq!(delivered, 2);
        assert_eq!(api.sent_to(62).len(), 1);
        assert_eq!(api.sent_to(72).len(), 1);
        assert!(api.sent_to(61).is_empty());
    }

    #[tokio::test]
    async fn test_failed_send_is_not_retried() {
        let dir = TempDir::new().unwrap();
        let store = store_with_pairs(&dir).await;
        let api = FakeGuildApi::new(900);
        api.fail_send(61);

        let delivered = PresenceLogger::new(&store, &api)
            .log(SOURCE, &PresenceEvent::InviteDeleted { code: "abc".to_string() })
            .await;
        assert_eq!(delivered, 0);
        assert!(api.sent().is_empty());
    }

    #[tokio::test]
    async fn test_unrelated_guild_is_ignored() {
        let dir = TempDir::new().unwrap();
        let store = store_with_pairs(&dir).await;
        let api = FakeGuildApi::new(900);

        let delivered = PresenceLogger::new(&store, &api)
            .log(GuildId::new(999), &PresenceEvent::MemberLeft(bob()))
            .await;
        assert_eq!(delivered, 0);
    }
}
