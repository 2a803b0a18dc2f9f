//! Configuration file handling for depth-grayscale.
//!
//! Loads configuration from `<config dir>/depth-grayscale/config.toml` or a custom path.

use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use crate::depth::{
    ConverterError, DEFAULT_MAX_DEPTH, DEFAULT_MIN_DEPTH, DEFAULT_RETAINED_BUFFERS,
    DepthNormalizer, DepthRange,
};

/// Configuration file structure.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub converter: ConverterConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ConverterConfig {
    /// Output buffers kept in the pool
    #[serde(default = "default_retained_buffers")]
    pub retained_buffers: usize,
    /// Near bound in metres; maps to intensity 0
    #[serde(default = "default_min_depth")]
    pub min_depth: f32,
    /// Far bound in metres; maps to intensity 255
    #[serde(default = "default_max_depth")]
    pub max_depth: f32,
    #[serde(default)]
    pub invert: bool,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            retained_buffers: default_retained_buffers(),
            min_depth: default_min_depth(),
            max_depth: default_max_depth(),
            invert: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Default log filter when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_retained_buffers() -> usize {
    DEFAULT_RETAINED_BUFFERS.get()
}

fn default_min_depth() -> f32 {
    DEFAULT_MIN_DEPTH
}

fn default_max_depth() -> f32 {
    DEFAULT_MAX_DEPTH
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Validated converter settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConverterSettings {
    pub retained_buffers: NonZeroUsize,
    pub normalizer: DepthNormalizer,
}

impl Default for ConverterSettings {
    fn default() -> Self {
        Self {
            retained_buffers: DEFAULT_RETAINED_BUFFERS,
            normalizer: DepthNormalizer::default(),
        }
    }
}

impl Config {
    /// Load configuration from a file path.
    /// Returns default config if the file doesn't exist.
    /// Returns an error if the file exists but cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path.map(PathBuf::from).unwrap_or_else(default_path);

        if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io {
                path: path.clone(),
                source: e,
            })?;
            let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
                path: path.clone(),
                source: e,
            })?;
            log::debug!("Loaded config from {}", path.display());
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Check the converter section and build settings from it.
    ///
    /// # Errors
    /// * `ConfigError::InvalidValue` - zero buffers or an empty depth range
    pub fn converter_settings(&self) -> Result<ConverterSettings, ConfigError> {
        let c = &self.converter;
        let retained_buffers =
            NonZeroUsize::new(c.retained_buffers).ok_or_else(|| ConfigError::InvalidValue {
                key: "converter.retained_buffers",
                message: "must be at least 1".to_string(),
            })?;
        let range = DepthRange::new(c.min_depth, c.max_depth).map_err(|e: ConverterError| {
            ConfigError::InvalidValue {
                key: "converter.min_depth/max_depth",
                message: e.to_string(),
            }
        })?;
        Ok(ConverterSettings {
            retained_buffers,
            normalizer: DepthNormalizer::new(range, c.invert),
        })
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{}': {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: &'static str, message: String },
}

/// Get the default config file path.
pub fn default_path() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("depth-grayscale").join("config.toml"))
        .unwrap_or_else(|| {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(".config/depth-grayscale/config.toml")
        })
}

/// Contents written by `config init`.
pub const DEFAULT_CONFIG_TOML: &str = r#"# depth-grayscale configuration

[converter]
# Output buffers kept in the pool (covers capture, conversion and downstream latency)
retained_buffers = 3
# Normalization range in metres: min_depth maps to black, max_depth to white
min_depth = 0.2
max_depth = 1.5
# Map near to white instead of black
invert = false

[logging]
# Log level when RUST_LOG is unset: error, warn, info, debug, trace
level = "info"
"#;
