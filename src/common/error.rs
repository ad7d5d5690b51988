//! Error types for the application.

use thiserror::Error;

use crate::store::MappingKey;

/// Top-level application error.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Discord error: {0}")]
    Discord(#[from] DiscordError),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required setting: {field}")]
    MissingField { field: String },

    #[error("Config validation failed: {message}")]
    ValidationError { message: String },
}

/// Mapping store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to access store file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Persisted state is unreadable: {message}")]
    ConfigCorrupt { message: String },

    #[error("Mapping for {key} already points to {existing}, refusing to remap to {requested}")]
    MappingConflict {
        key: MappingKey,
        existing: u64,
        requested: u64,
    },

    #[error("No server pair registered for guild {guild_id}")]
    PairNotFound { guild_id: u64 },

    #[error("Server pair for guild {guild_id} has no source guild linked")]
    NotLinked { guild_id: u64 },

    #[error("Preset '{name}' not found")]
    PresetNotFound { name: String },

    #[error("Preset does not apply: {message}")]
    PresetMismatch { message: String },

    #[error("Remote store error: {message}")]
    Remote { message: String },
}

/// Chat platform errors, classified by how callers should react.
#[derive(Debug, Error)]
pub enum DiscordError {
    /// The platform refused the action (missing permission).
    #[error("Permission denied: {message}")]
    PermissionDenied { message: String },

    /// Rate limiting, 5xx or transport failure. Retrying later may succeed.
    #[error("Transient API error: {message}")]
    TransientApi { message: String },

    /// A referenced guild, channel or role no longer resolves.
    #[error("Not found: {what}")]
    NotFound { what: String },

    #[error("Discord error: {message}")]
    Other { message: String },
}

impl DiscordError {
    /// Short taxonomy name used in status lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PermissionDenied { .. } => "PermissionDenied",
            Self::TransientApi { .. } => "TransientAPIError",
            Self::NotFound { .. } => "NotFound",
            Self::Other { .. } => "Error",
        }
    }
}

impl From<serenity::Error> for DiscordError {
    fn from(error: serenity::Error) -> Self {
        use serenity::http::HttpError;

        let message = error.to_string();
        match &error {
            serenity::Error::Http(HttpError::UnsuccessfulRequest(response)) => {
                classify_status(response.status_code.as_u16(), message)
            }
            serenity::Error::Http(HttpError::Request(_)) => Self::TransientApi { message },
            serenity::Error::Model(serenity::model::ModelError::InvalidPermissions { .. }) => {
                Self::PermissionDenied { message }
            }
            _ => Self::Other { message },
        }
    }
}

/// Map an HTTP status code onto the error taxonomy.
pub fn classify_status(status: u16, message: String) -> DiscordError {
    match status {
        401 | 403 => DiscordError::PermissionDenied { message },
        404 => DiscordError::NotFound { what: message },
        429 | 500..=599 => DiscordError::TransientApi { message },
        _ => DiscordError::Other { message },
    }
}

/// Result type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Result type alias for Discord operations.
pub type DiscordResult<T> = std::result::Result<T, DiscordError>;
