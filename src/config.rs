//! Indexus configuration.
//!
//! Loaded from `indexus.toml`, environment variables and defaults.
//!
//! # Priority (highest to lowest)
//!
//! 1. Environment variables (`INDEXUS_*`, sections separated by `__`,
//!    e.g. `INDEXUS_LOCALITY__PAGE_SIZE=25`)
//! 2. Configuration file (`indexus.toml`)
//! 3. Default values

use std::path::Path;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::digest::{DEFAULT_ID_LENGTH, SHA256_ID_CHARS};
use crate::space::{DEFAULT_KEY_BYTES, KeyFormat, key::MAX_KEY_BYTES};

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },
}

impl From<ConfigError> for crate::Error {
    fn from(e: ConfigError) -> Self {
        crate::Error::Config(e.to_string())
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexusConfig {
    pub key: KeyConfig,
    pub locality: LocalityConfig,
}

/// Position key and identifier widths. System-wide: every peer must agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyConfig {
    /// Key width budget in bytes (20 → 160 bits → 27 chars). A space whose
    /// axes all hit their precision cap uses fewer.
    pub position_bytes: usize,
    /// Collection id length in base64url chars.
    pub id_length: usize,
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self {
            position_bytes: DEFAULT_KEY_BYTES,
            id_length: DEFAULT_ID_LENGTH,
        }
    }
}

impl KeyConfig {
    pub fn format(&self) -> crate::Result<KeyFormat> {
        KeyFormat::new(self.position_bytes)
    }
}

/// Layer policy and paging of the locality engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalityConfig {
    /// Layers per search, finest first; the last one is the whole space.
    pub max_layers: usize,
    /// Prefix bits dropped from one layer to the next.
    pub layer_stride_bits: u32,
    /// Peer sets queried concurrently per layer.
    pub max_sets_per_layer: usize,
    /// Items per output batch.
    pub page_size: usize,
    /// Per-request peer timeout.
    pub peer_timeout_ms: u64,
}

impl Default for LocalityConfig {
    fn default() -> Self {
        Self {
            max_layers: 5,
            layer_stride_bits: 6,
            max_sets_per_layer: 2,
            page_size: 10,
            peer_timeout_ms: 5_000,
        }
    }
}

impl LocalityConfig {
    pub fn peer_timeout(&self) -> Duration {
        Duration::from_millis(self.peer_timeout_ms)
    }

    /// Prefix length examined at `layer`, for a key of `key_bits` bits.
    pub fn prefix_bits(&self, layer: usize, key_bits: u32) -> u32 {
        let steps = self.max_layers.saturating_sub(1 + layer) as u32;
        steps.saturating_mul(self.layer_stride_bits).min(key_bits)
    }
}

impl IndexusConfig {
    /// Loads configuration from default sources.
    ///
    /// Priority: defaults < file < environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path("indexus.toml")
    }

    /// Loads configuration from a specific file path. A missing file is
    /// not an error; defaults and environment still apply.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: Self = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("INDEXUS_").split("__"))
            .extract()
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Creates a configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let config: Self = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::string(toml_str))
            .extract()
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key: &str, message: String| {
            Err(ConfigError::InvalidValue { key: key.to_string(), message })
        };

        let bytes = self.key.position_bytes;
        if !(1..=MAX_KEY_BYTES).contains(&bytes) {
            return invalid(
                "key.position_bytes",
                format!("value {bytes} is out of range [1, {MAX_KEY_BYTES}]"),
            );
        }
        let len = self.key.id_length;
        if !(1..=SHA256_ID_CHARS).contains(&len) {
            return invalid(
                "key.id_length",
                format!("value {len} is out of range [1, {SHA256_ID_CHARS}]"),
            );
        }

        let l = &self.locality;
        if l.max_layers == 0 {
            return invalid("locality.max_layers", "must be at least 1".into());
        }
        if l.max_layers > 1 && l.layer_stride_bits == 0 {
            return invalid(
                "locality.layer_stride_bits",
                "must be positive when more than one layer is configured".into(),
            );
        }
        if l.max_sets_per_layer == 0 {
            return invalid("locality.max_sets_per_layer", "must be at least 1".into());
        }
        if l.page_size == 0 {
            return invalid("locality.page_size", "must be at least 1".into());
        }
        if l.peer_timeout_ms == 0 {
            return invalid("locality.peer_timeout_ms", "must be at least 1".into());
        }
        Ok(())
    }
}
