//! Configuration validation.
//!
//! Validates configuration values and provides helpful error messages.

use crate::common::error::ConfigError;
use crate::config::types::Config;

/// Placeholder shipped in deployment templates.
const PLACEHOLDER_TOKEN: &str = "YOUR_DISCORD_TOKEN_HERE";

/// Validate a configuration and return detailed errors.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    if config.discord.token.is_empty() {
        errors.push("discord token is required (GUILD_MIRROR_DISCORD_TOKEN or DISCORD_TOKEN)".to_string());
    }
    if config.discord.token == PLACEHOLDER_TOKEN {
        errors.push("discord token has not been configured (still using placeholder)".to_string());
    }

    if config.commands.prefix.is_empty() {
        errors.push("command prefix must not be empty".to_string());
    }
    if config.commands.prefix.chars().any(char::is_whitespace) {
        errors.push(format!(
            "command prefix '{}' must not contain whitespace",
            config.commands.prefix
        ));
    }

    if config.store.path.as_os_str().is_empty() {
        errors.push("store path must not be empty".to_string());
    }

    match (&config.store.remote_url, &config.store.remote_token) {
        (None, Some(_)) => {
            errors.push("remote token is set but no remote URL is configured".to_string());
        }
        (Some(url), _) if !url.starts_with("http://") && !url.starts_with("https://") => {
            errors.push(format!("remote URL '{}' must be http:// or https://", url));
        }
        _ => {}
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError {
            message: errors.join("\n"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_valid_config() -> Config {
        let mut config = Config::default();
        config.discord.token = "valid_token_here".to_string();
        config
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(validate_config(&make_valid_config()).is_ok());
    }

    #[test]
    fn test_empty_token_fails() {
        let mut config = make_valid_config();
        config.discord.token = String::new();

        let result = validate_config(&config);
        assert!(result.unwrap_err().to_string().contains("discord token is required"));
    }

    #[test]
    fn test_placeholder_token_fails() {
        let mut config = make_valid_config();
        config.discord.token = PLACEHOLDER_TOKEN.to_string();

        let result = validate_config(&config);
        assert!(result.unwrap_err().to_string().contains("placeholder"));
    }

    #[test]
    fn test_empty_prefix_fails() {
        let mut config = make_valid_config();
        config.commands.prefix = String::new();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_remote_settings() {
        let mut config = make_valid_config();
        config.store.remote_token = Some("secret".to_string());
        assert!(validate_config(&config)
            .unwrap_err()
            .to_string()
            .contains("no remote URL"));

        config.store.remote_url = Some("ftp://blob.test".to_string());
        assert!(validate_config(&config).unwrap_err().to_string().contains("http"));

        config.store.remote_url = Some("https://blob.test/store".to_string());
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_errors_are_aggregated() {
        let mut config = make_valid_config();
        config.discord.token = String::new();
        config.commands.prefix = String::new();

        let message = validate_config(&config).unwrap_err().to_string();
        assert!(message.contains("token"));
        assert!(message.contains("prefix"));
    }
}
