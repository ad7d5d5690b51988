//! Configuration loading and validation.

pub mod env;
pub mod types;
pub mod validate;

pub use types::*;

use crate::common::error::ConfigError;

/// Read the configuration from the environment and validate it.
pub fn load_and_validate() -> Result<Config, ConfigError> {
    let config = env::from_env();
    validate::validate_config(&config)?;
    Ok(config)
}
