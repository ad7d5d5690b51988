//! Application context.
//!
//! Built once at startup and shared by every event task. Components borrow
//! what they need from it for the duration of one event.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use crate::discord::api::GuildApi;
use crate::presence::PresenceLogger;
use crate::relay::content::ContentResolver;
use crate::relay::RelayPipeline;
use crate::store::MappingStore;
use crate::sync::Synchronizer;

pub struct BridgeContext {
    pub store: Arc<MappingStore>,
    pub api: Arc<dyn GuildApi>,
    pub resolver: ContentResolver,
    /// Admin command prefix, e.g. `!`.
    pub prefix: String,
    shutdown_tx: watch::Sender<bool>,
}

impl BridgeContext {
    pub fn new(
        store: Arc<MappingStore>,
        api: Arc<dyn GuildApi>,
        resolver: ContentResolver,
        prefix: impl Into<String>,
        shutdown_tx: watch::Sender<bool>,
    ) -> Self {
        Self {
            store,
            api,
            resolver,
            prefix: prefix.into(),
            shutdown_tx,
        }
    }

    pub fn relay(&self) -> RelayPipeline<'_> {
        RelayPipeline::new(&self.store, self.api.as_ref(), &self.resolver)
    }

    pub fn presence(&self) -> PresenceLogger<'_> {
        PresenceLogger::new(&self.store, self.api.as_ref())
    }

    pub fn synchronizer(&self) -> Synchronizer<'_> {
        Synchronizer::new(&self.store, self.api.as_ref())
    }

    /// Ask the whole process to shut down gracefully.
    pub fn request_shutdown(&self) {
        info!("Shutdown requested");
        self.shutdown_tx.send_replace(true);
    }
}
