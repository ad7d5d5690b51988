//! Configuration from environment variables.
//!
//! - `GUILD_MIRROR_DISCORD_TOKEN` - Discord bot token (falls back to `DISCORD_TOKEN`)
//! - `GUILD_MIRROR_STORE_PATH` - path of the JSON mapping store
//! - `GUILD_MIRROR_COMMAND_PREFIX` - prefix of admin commands
//! - `GUILD_MIRROR_REMOTE_URL` - URL of the remote store copy
//! - `GUILD_MIRROR_REMOTE_TOKEN` - bearer token for the remote store

use std::env;
use std::path::PathBuf;

use crate::config::types::Config;

/// Environment variable prefix for all settings.
const ENV_PREFIX: &str = "GUILD_MIRROR";

/// Token variable shared with other bots on the same host.
const FALLBACK_TOKEN_VAR: &str = "DISCORD_TOKEN";

/// Build the configuration from the process environment.
pub fn from_env() -> Config {
    from_lookup(|name| env::var(name).ok())
}

/// Build the configuration from an arbitrary variable lookup.
///
/// Empty values count as unset, except for the token, which is kept so
/// validation can report it.
pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Config {
    let var = |suffix: &str| lookup(&format!("{}_{}", ENV_PREFIX, suffix));
    let non_empty = |suffix: &str| var(suffix).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

    let mut config = Config::default();

    if let Some(token) = var("DISCORD_TOKEN").or_else(|| lookup(FALLBACK_TOKEN_VAR)) {
        config.discord.token = token.trim().to_string();
    }
    if let Some(path) = non_empty("STORE_PATH") {
        config.store.path = PathBuf::from(path);
    }
    if let Some(prefix) = var("COMMAND_PREFIX") {
        config.commands.prefix = prefix.trim().to_string();
    }
    config.store.remote_url = non_empty("REMOTE_URL");
    config.store.remote_token = non_empty("REMOTE_TOKEN");

    config
}
