//! Configuration validation.

use super::Config;
use crate::core::identifier::validate_identifier;
use crate::error::{Result, TypingDedupingError};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    if config.raw_namespace.is_empty() {
        return Err(TypingDedupingError::Config(
            "raw_namespace is required".into(),
        ));
    }
    validate_identifier(&config.raw_namespace)?;

    if config.default_namespace.is_empty() {
        return Err(TypingDedupingError::Config(
            "default_namespace is required".into(),
        ));
    }
    validate_identifier(&config.default_namespace)?;

    if let Some(0) = config.max_concurrent_streams {
        return Err(TypingDedupingError::Config(
            "max_concurrent_streams must be at least 1".into(),
        ));
    }

    Ok(())
}
