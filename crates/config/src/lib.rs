//! Configuration for the voice bridge
//!
//! Settings are loaded once from the environment at process start and
//! validated fail-fast. Runtime overrides replace the whole settings object,
//! never individual fields.

pub mod settings;
pub mod streaming;

pub use settings::{ConfigManager, ObservabilityConfig, Settings};
pub use streaming::{
    ChunkingStrategy, ErrorStrategy, InterruptionStrategy, SpeakerConfig, StreamingConfig,
};

use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

impl ConfigError {
    pub(crate) fn invalid(field: &str, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.to_string(),
            message: message.into(),
        }
    }
}
