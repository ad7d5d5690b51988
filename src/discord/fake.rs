//! In-memory `GuildApi` for tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use serenity::all::{ChannelId, GuildId, RoleId};

use crate::common::error::{DiscordError, DiscordResult};
use crate::common::types::{ChannelInfo, ChannelKind, NewChannel, OutgoingMessage, RoleInfo};
use crate::discord::api::GuildApi;

#[derive(Default)]
struct FakeState {
    next_id: u64,
    channels: HashMap<GuildId, Vec<ChannelInfo>>,
    roles: HashMap<GuildId, Vec<RoleInfo>>,
    sent: Vec<(ChannelId, OutgoingMessage)>,
    created: usize,
    fail_create: HashSet<String>,
    fail_send: HashSet<ChannelId>,
    fail_text: HashSet<String>,
}

/// Guilds held in memory. Created channels get sequential IDs.
pub struct FakeGuildApi {
    state: Mutex<FakeState>,
}

impl FakeGuildApi {
    pub fn new(first_id: u64) -> Self {
        Self {
            state: Mutex::new(FakeState {
                next_id: first_id,
                ..Default::default()
            }),
        }
    }

    /// Register a guild with no channels yet.
    pub fn add_guild(&self, guild: u64) {
        self.state
            .lock()
            .unwrap()
            .channels
            .entry(GuildId::new(guild))
            .or_default();
    }

    pub fn add_channel(&self, guild: u64, id: u64, name: &str, kind: ChannelKind, parent: Option<u64>) {
        let mut state = self.state.lock().unwrap();
        let list = state.channels.entry(GuildId::new(guild)).or_default();
        let position = list.len() as u16;
        list.push(ChannelInfo {
            id: ChannelId::new(id),
            name: name.to_string(),
            kind,
            parent: parent.map(ChannelId::new),
            position,
        });
    }

    pub fn add_role(&self, guild: u64, id: u64, name: &str) {
        self.state
            .lock()
            .unwrap()
            .roles
            .entry(GuildId::new(guild))
            .or_default()
            .push(RoleInfo {
                id: RoleId::new(id),
                name: name.to_string(),
            });
    }

    /// Make creation of channels with this name fail with `PermissionDenied`.
    pub fn fail_create(&self, name: &str) {
        self.state.lock().unwrap().fail_create.insert(name.to_string());
    }

    pub fn allow_create(&self, name: &str) {
        self.state.lock().unwrap().fail_create.remove(name);
    }

    /// Make sends to this channel fail with `TransientApi`.
    pub fn fail_send(&self, channel: u64) {
        self.state.lock().unwrap().fail_send.insert(ChannelId::new(channel));
    }

    /// Make text sends with exactly this content fail with `TransientApi`.
    pub fn fail_send_text(&self, text: &str) {
        self.state.lock().unwrap().fail_text.insert(text.to_string());
    }

    pub fn channels_of(&self, guild: u64) -> Vec<ChannelInfo> {
        self.state
            .lock()
            .unwrap()
            .channels
            .get(&GuildId::new(guild))
            .cloned()
            .unwrap_or_default()
    }

    pub fn channel_exists(&self, guild: u64, channel: ChannelId) -> bool {
        self.channels_of(guild).iter().any(|c| c.id == channel)
    }

    pub fn created_count(&self) -> usize {
        self.state.lock().unwrap().created
    }

    pub fn sent(&self) -> Vec<(ChannelId, OutgoingMessage)> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn sent_to(&self, channel: u64) -> Vec<OutgoingMessage> {
        self.sent()
            .into_iter()
            .filter(|(id, _)| *id == ChannelId::new(channel))
            .map(|(_, message)| message)
            .collect()
    }
}

#[async_trait]
impl GuildApi for FakeGuildApi {
    async fn channels(&self, guild: GuildId) -> DiscordResult<Vec<ChannelInfo>> {
        self.state
            .lock()
            .unwrap()
            .channels
            .get(&guild)
            .cloned()
            .ok_or_else(|| DiscordError::NotFound {
                what: format!("guild {}", guild),
            })
    }

    async fn roles(&self, guild: GuildId) -> DiscordResult<Vec<RoleInfo>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .roles
            .get(&guild)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_channel(&self, guild: GuildId, channel: NewChannel) -> DiscordResult<ChannelInfo> {
        let mut state = self.state.lock().unwrap();
        if state.fail_create.contains(&channel.name) {
            return Err(DiscordError::PermissionDenied {
                message: format!("Missing Permissions creating '{}'", channel.name),
            });
        }

        let id = ChannelId::new(state.next_id);
        state.next_id += 1;
        state.created += 1;

        let list = state.channels.entry(guild).or_default();
        let info = ChannelInfo {
            id,
            name: channel.name,
            kind: channel.kind,
            parent: channel.parent,
            position: list.len() as u16,
        };
        list.push(info.clone());
        Ok(info)
    }

    async fn send(&self, channel: ChannelId, message: OutgoingMessage) -> DiscordResult<()> {
        let mut state = self.state.lock().unwrap();
        let text_blocked = message
            .as_text()
            .is_some_and(|text| state.fail_text.contains(text));
        if state.fail_send.contains(&channel) || text_blocked {
            return Err(DiscordError::TransientApi {
                message: format!("503 sending to {}", channel),
            });
        }
        state.sent.push((channel, message));
        Ok(())
    }
}
