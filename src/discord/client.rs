//! Discord bot client abstraction.
//!
//! Provides a high-level interface for creating and running the Discord bot,
//! hiding serenity implementation details from the rest of the application.

use std::sync::Arc;
use std::time::Duration;

use backon::BackoffBuilder;
use serenity::async_trait;
use serenity::http::HttpBuilder;
use serenity::model::channel::Message;
use serenity::model::event::{InviteCreateEvent, InviteDeleteEvent};
use serenity::model::gateway::Ready;
use serenity::model::guild::{Guild, Member, PartialGuild};
use serenity::model::id::GuildId;
use serenity::model::user::User;
use serenity::model::voice::VoiceState;
use serenity::prelude::*;
use serenity::Client;
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::bridge::BridgeContext;
use crate::config::Config;
use crate::discord::api::SerenityGuildApi;
use crate::discord::handler::MirrorHandler;
use crate::relay::content::ContentResolver;
use crate::store::MappingStore;

/// Longest wait between reconnection attempts.
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub enum DiscordBotEvent {
    /// Bot connected and ready.
    Ready(Ready),
    /// Message received.
    Message {
        context: Context,
        message: Message,
    },
    MemberAdd(Member),
    MemberRemove {
        guild_id: GuildId,
        user: User,
        member: Option<Member>,
    },
    BanAdd {
        guild_id: GuildId,
        user: User,
    },
    BanRemove {
        guild_id: GuildId,
        user: User,
    },
    InviteCreate {
        context: Context,
        event: InviteCreateEvent,
    },
    InviteDelete(InviteDeleteEvent),
    GuildUpdate {
        old: Option<Guild>,
        new: PartialGuild,
    },
    VoiceStateUpdate {
        context: Context,
        old: Option<VoiceState>,
        new: VoiceState,
    },
    Disconnected,
}

struct DiscordBotEvents {
    discord_events_tx: mpsc::UnboundedSender<DiscordBotEvent>,
}

impl DiscordBotEvents {
    fn new(discord_events_tx: mpsc::UnboundedSender<DiscordBotEvent>) -> Self {
        Self { discord_events_tx }
    }

    fn forward(&self, event: DiscordBotEvent) {
        if let Err(error) = self.discord_events_tx.send(event) {
            warn!("Failed to process discord event: {}", error);
        }
    }
}

#[async_trait]
impl EventHandler for DiscordBotEvents {
    async fn ready(&self, _context: Context, ready: Ready) {
        self.forward(DiscordBotEvent::Ready(ready));
    }

    async fn message(&self, context: Context, message: Message) {
        self.forward(DiscordBotEvent::Message { context, message });
    }

    async fn guild_member_addition(&self, _context: Context, member: Member) {
        self.forward(DiscordBotEvent::MemberAdd(member));
    }

    async fn guild_member_removal(&self, _context: Context, guild_id: GuildId, user: User, member: Option<Member>) {
        self.forward(DiscordBotEvent::MemberRemove { guild_id, user, member });
    }

    async fn guild_ban_addition(&self, _context: Context, guild_id: GuildId, user: User) {
        self.forward(DiscordBotEvent::BanAdd { guild_id, user });
    }

    async fn guild_ban_removal(&self, _context: Context, guild_id: GuildId, user: User) {
        self.forward(DiscordBotEvent::BanRemove { guild_id, user });
    }

    async fn invite_create(&self, context: Context, event: InviteCreateEvent) {
        self.forward(DiscordBotEvent::InviteCreate { context, event });
    }

    async fn invite_delete(&self, _context: Context, event: InviteDeleteEvent) {
        self.forward(DiscordBotEvent::InviteDelete(event));
    }

    async fn guild_update(&self, _context: Context, old: Option<Guild>, new: PartialGuild) {
        self.forward(DiscordBotEvent::GuildUpdate { old, new });
    }

    async fn voice_state_update(&self, context: Context, old: Option<VoiceState>, new: VoiceState) {
        self.forward(DiscordBotEvent::VoiceStateUpdate { context, old, new });
    }
}

/// Builder for creating the Discord bot.
pub struct DiscordBotBuilder {
    config: Config,
    store: Arc<MappingStore>,
    shutdown_tx: watch::Sender<bool>,
}

impl DiscordBotBuilder {
    pub fn new(config: Config, store: Arc<MappingStore>, shutdown_tx: watch::Sender<bool>) -> Self {
        Self {
            config,
            store,
            shutdown_tx,
        }
    }

    /// Build the Discord bot.
    pub async fn build(self) -> anyhow::Result<DiscordBot> {
        let (discord_events_tx, discord_events_rx) = mpsc::unbounded_channel::<DiscordBotEvent>();

        let token = self.config.discord.token.clone();
        let client = build_client(&token, discord_events_tx.clone()).await?;

        let api = Arc::new(SerenityGuildApi::new(client.http.clone()));
        let resolver = ContentResolver::new()?;
        let bridge = Arc::new(BridgeContext::new(
            self.store,
            api,
            resolver,
            self.config.commands.prefix.clone(),
            self.shutdown_tx.clone(),
        ));

        info!("Command prefix: {}", bridge.prefix);

        Ok(DiscordBot {
            client: Some(client),
            token,
            handler: MirrorHandler::new(bridge),
            discord_events_rx,
            discord_events_tx,
            shutdown_rx: self.shutdown_tx.subscribe(),
        })
    }
}

async fn build_client(token: &str, discord_events_tx: mpsc::UnboundedSender<DiscordBotEvent>) -> anyhow::Result<Client> {
    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT
        | GatewayIntents::GUILD_MEMBERS
        | GatewayIntents::GUILD_MODERATION
        | GatewayIntents::GUILD_INVITES
        | GatewayIntents::GUILD_VOICE_STATES;

    // Build a custom reqwest client with timeout settings
    let reqwest_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(15))
        .connect_timeout(Duration::from_secs(10))
        .build()?;

    let http = HttpBuilder::new(token).client(reqwest_client).build();

    let events = DiscordBotEvents::new(discord_events_tx);
    let client = serenity::client::ClientBuilder::new_with_http(http, intents)
        .event_handler(events)
        .await?;
    Ok(client)
}

pub struct DiscordBot {
    client: Option<Client>,
    token: String,
    handler: MirrorHandler,
    discord_events_rx: mpsc::UnboundedReceiver<DiscordBotEvent>,
    discord_events_tx: mpsc::UnboundedSender<DiscordBotEvent>,
    shutdown_rx: watch::Receiver<bool>,
}

impl DiscordBot {
    pub async fn run(mut self) {
        // Extract shard manager before we move client into run_connection
        let shard_manager = self.client.as_ref().map(|c| c.shard_manager.clone());
        let client = &mut self.client;
        let mut shutdown_rx = self.shutdown_rx.clone();

        tokio::select! {
            _ = Self::run_connection(client, &self.token, &self.discord_events_tx) => {},
            _ = Self::process_events(&mut self.discord_events_rx, &self.handler, &mut self.shutdown_rx) => {},
            _ = async {
                // Wait for shutdown signal
                while !*shutdown_rx.borrow_and_update() {
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
                // Gracefully shutdown Discord gateway
                if let Some(ref manager) = shard_manager {
                    info!("Initiating graceful Discord shutdown...");
                    manager.shutdown_all().await;
                    info!("Discord shutdown complete");
                }
            } => {}
        }
        info!("Discord task ended");
    }

    async fn run_connection(
        client: &mut Option<Client>,
        token: &str,
        discord_events_tx: &mpsc::UnboundedSender<DiscordBotEvent>,
    ) {
        /// Create an exponential backoff iterator for Discord reconnection.
        /// 5s initial, 5min max, factor 1.1, with jitter, unlimited retries.
        fn discord_backoff() -> impl Iterator<Item = Duration> {
            backon::ExponentialBuilder::default()
                .with_min_delay(Duration::from_secs(5))
                .with_max_delay(MAX_RECONNECT_DELAY)
                .with_factor(1.1)
                .with_jitter()
                .without_max_times()
                .build()
        }

        let mut backoff = discord_backoff();

        loop {
            info!("Connecting to Discord...");

            let mut client = match client.take() {
                Some(client) => client,
                None => {
                    // serenity mostly handles reconnections itself.
                    match build_client(token, discord_events_tx.clone()).await {
                        Ok(client) => {
                            backoff = discord_backoff();
                            client
                        }
                        Err(e) => {
                            error!("Failed to rebuild Discord client: {}", e);
                            let delay = backoff.next().unwrap_or(MAX_RECONNECT_DELAY);
                            warn!("Retrying in {:.1}s...", delay.as_secs_f64());
                            sleep(delay).await;
                            continue;
                        }
                    }
                }
            };

            match client.start().await {
                Ok(()) => {
                    info!("Discord client disconnected normally");
                    if let Err(error) = discord_events_tx.send(DiscordBotEvent::Disconnected) {
                        warn!("Failed to process discord event: {}", error);
                    }
                    break;
                }
                Err(e) => {
                    error!("Discord client error: {}", e);
                    let delay = backoff.next().unwrap_or(MAX_RECONNECT_DELAY);
                    warn!(
                        "Discord disconnected. Reconnecting in {:.1}s...",
                        delay.as_secs_f64(),
                    );
                    if let Err(error) = discord_events_tx.send(DiscordBotEvent::Disconnected) {
                        warn!("Failed to process discord event: {}", error);
                    }
                    sleep(delay).await;
                }
            }
        }
    }

    /// Dispatch each event to its own task so a slow send never holds up
    /// the rest.
    async fn process_events(
        discord_events_rx: &mut mpsc::UnboundedReceiver<DiscordBotEvent>,
        handler: &MirrorHandler,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                event = discord_events_rx.recv() => {
                    match event {
                        Some(DiscordBotEvent::Ready(ready)) => {
                            info!("Discord bot connected as {} ({} guilds)", ready.user.name, ready.guilds.len());
                        }
                        Some(DiscordBotEvent::Disconnected) => {
                            debug!("Discord gateway disconnected");
                        }
                        Some(event) => {
                            let handler = handler.clone();
                            tokio::spawn(async move {
                                handler.handle_event(event).await;
                            });
                        }
                        None => {
                            debug!("Discord events channel closed.");
                            break;
                        }
                    }
                }

                // Shutdown signal
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping event processing");
                        break;
                    }
                }
            }
        }
    }
}
