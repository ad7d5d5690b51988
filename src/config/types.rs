//! Configuration type definitions.

use std::path::PathBuf;

/// Default location of the persisted mapping store.
pub const DEFAULT_STORE_PATH: &str = "data/config_store.json";

/// Default prefix of admin text commands.
pub const DEFAULT_COMMAND_PREFIX: &str = "!";

/// Root configuration structure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub discord: DiscordConfig,
    pub store: StoreConfig,
    pub commands: CommandConfig,
}

/// Discord bot configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscordConfig {
    pub token: String,
}

/// Mapping store location and optional remote copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub path: PathBuf,
    pub remote_url: Option<String>,
    pub remote_token: Option<String>,
}

impl StoreConfig {
    /// Remote copy settings, if a remote URL is configured.
    pub fn remote(&self) -> Option<RemoteConfig> {
        self.remote_url.as_ref().map(|url| RemoteConfig {
            url: url.clone(),
            token: self.remote_token.clone(),
        })
    }
}

/// Remote blob holding the secondary copy of the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    pub url: String,
    pub token: Option<String>,
}

/// Admin command settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandConfig {
    pub prefix: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            discord: DiscordConfig {
                token: String::new(),
            },
            store: StoreConfig {
                path: PathBuf::from(DEFAULT_STORE_PATH),
                remote_url: None,
                remote_token: None,
            },
            commands: CommandConfig {
                prefix: DEFAULT_COMMAND_PREFIX.to_string(),
            },
        }
    }
}
