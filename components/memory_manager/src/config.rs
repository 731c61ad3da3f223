//! Garbage collection configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors raised while loading or validating a [`GcConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The JSON document could not be parsed
    #[error("invalid GC configuration: {0}")]
    Json(#[from] serde_json::Error),
    /// Background collection was enabled with a zero interval
    #[error("background collection requires a non-zero interval")]
    ZeroInterval,
}

/// Garbage collection configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GcConfig {
    /// Maximum number of live objects (0 = unlimited)
    pub max_objects: usize,
    /// Run collections on a background thread
    pub background: bool,
    /// Interval between background collections in milliseconds
    pub collect_interval_ms: u64,
    /// Gray objects traced between yields of the concurrent mark loop
    pub mark_batch: usize,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            max_objects: 0,
            background: false,
            collect_interval_ms: 100,
            mark_batch: 256,
        }
    }
}

impl GcConfig {
    /// Load configuration from environment variables
    ///
    /// Unparseable values are ignored and leave the default in place. The
    /// result is validated like a JSON document.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(max) = env_parse("LISP_GC_MAX_OBJECTS") {
            config.max_objects = max;
        }
        if let Some(background) = env_parse("LISP_GC_BACKGROUND") {
            config.background = background;
        }
        if let Some(interval) = env_parse("LISP_GC_INTERVAL_MS") {
            config.collect_interval_ms = interval;
        }
        if let Some(batch) = env_parse("LISP_GC_MARK_BATCH") {
            config.mark_batch = batch;
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse a configuration from JSON; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: GcConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for inconsistent settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.background && self.collect_interval_ms == 0 {
            return Err(ConfigError::ZeroInterval);
        }
        Ok(())
    }

    /// Interval between background collections
    pub fn collect_interval(&self) -> Duration {
        Duration::from_millis(self.collect_interval_ms)
    }

    /// Returns true if the object count is bounded
    pub fn is_bounded(&self) -> bool {
        self.max_objects > 0
    }
}

fn env_parse<T: std::str::FromStr>(var: &str) -> Option<T> {
    let raw = std::env::var(var).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(var, value = %raw, "ignoring unparseable GC setting");
            None
        }
    }
}
