//! Settings loading and runtime overrides

use std::sync::Arc;

use config::{Config, Environment};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::streaming::{SpeakerConfig, StreamingConfig};
use crate::ConfigError;

/// Main application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Streaming pipeline configuration
    #[serde(default)]
    pub streaming: StreamingConfig,

    /// Speaker gate configuration
    #[serde(default)]
    pub speaker: SpeakerConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Settings {
    /// Load settings from `BRIDGE_`-prefixed environment variables, layered
    /// over defaults, and validate them
    pub fn load() -> Result<Self, ConfigError> {
        let settings: Settings = Config::builder()
            .add_source(Environment::with_prefix("BRIDGE").separator("__"))
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Validate all sections
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.streaming.validate()?;
        self.speaker.validate()?;
        Ok(())
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level filter
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit logs as JSON
    #[serde(default)]
    pub log_json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
        }
    }
}

/// Process-wide settings holder with runtime override support
///
/// Overrides replace the whole settings object so readers never observe a
/// partially updated configuration.
pub struct ConfigManager {
    defaults: Arc<Settings>,
    current: RwLock<Arc<Settings>>,
}

impl ConfigManager {
    /// Create a manager around loaded settings
    pub fn new(settings: Settings) -> Self {
        let settings = Arc::new(settings);
        Self {
            defaults: settings.clone(),
            current: RwLock::new(settings),
        }
    }

    /// Get the active settings
    pub fn get(&self) -> Arc<Settings> {
        self.current.read().clone()
    }

    /// Replace the active settings until `reset` is called
    pub fn set_override(&self, settings: Settings) -> Result<(), ConfigError> {
        settings.validate()?;
        tracing::info!("Applying settings override");
        *self.current.write() = Arc::new(settings);
        Ok(())
    }

    /// Restore the settings loaded at construction
    pub fn reset(&self) {
        tracing::info!("Resetting settings override");
        *self.current.write() = self.defaults.clone();
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new(Settings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_override_and_reset() {
        let manager = ConfigManager::default();
        assert_eq!(manager.get().streaming.min_sentence_length, 5);

        let mut settings = Settings::default();
        settings.streaming.min_sentence_length = 10;
        manager.set_override(settings).unwrap();
        assert_eq!(manager.get().streaming.min_sentence_length, 10);

        manager.reset();
        assert_eq!(manager.get().streaming.min_sentence_length, 5);
    }

    #[test]
    fn test_invalid_override_rejected() {
        let manager = ConfigManager::default();
        let mut settings = Settings::default();
        settings.streaming.max_concurrent_synthesis = 20;
        assert!(manager.set_override(settings).is_err());
        assert_eq!(manager.get().streaming.max_concurrent_synthesis, 2);
    }
}
