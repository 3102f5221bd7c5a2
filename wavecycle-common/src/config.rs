//! Configuration loading and config file resolution
//!
//! Settings are read from a single TOML file. The file is located using the
//! following priority order:
//! 1. Command-line argument (highest priority)
//! 2. `WAVECYCLE_CONFIG` environment variable
//! 3. Per-user config directory (`<config_dir>/wavecycle/config.toml`)
//! 4. Built-in defaults (no file)
//!
//! A missing per-user file is not an error: the built-in defaults are used.
//! An explicitly requested file (CLI or environment) must exist.

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "WAVECYCLE_CONFIG";

/// Default bounded wait for the render worker during close
pub const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 1000;

/// Which device adapter the output engine should drive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputBackend {
    /// System default output device via cpal
    #[default]
    Cpal,
    /// Clock-driven device without hardware
    Simulated,
}

/// Complete settings file
#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
pub struct EngineSettings {
    #[serde(default)]
    pub engine: EngineSection,

    #[serde(default)]
    pub output: OutputSection,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// `[engine]` section
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct EngineSection {
    /// How long `close` waits for the render worker before force-stopping it
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

/// `[output]` section
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct OutputSection {
    #[serde(default)]
    pub backend: OutputBackend,

    /// Sample rate in Hz (11025, 22050 or 44100)
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// Bits per sample (8 or 16)
    #[serde(default = "default_bit_depth")]
    pub bit_depth: u16,

    /// Channel count (1 or 2)
    #[serde(default = "default_channels")]
    pub channels: u16,

    /// Frames across the whole buffer pool (power of two)
    #[serde(default = "default_buffer_frames")]
    pub buffer_frames: u32,
}

/// `[logging]` section
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_shutdown_timeout_ms() -> u64 {
    DEFAULT_SHUTDOWN_TIMEOUT_MS
}

fn default_sample_rate() -> u32 {
    44100
}

fn default_bit_depth() -> u16 {
    16
}

fn default_channels() -> u16 {
    2
}

fn default_buffer_frames() -> u32 {
    // 4 slots of 1024 frames, ~23ms each at 44.1kHz
    4096
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
        }
    }
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            backend: OutputBackend::default(),
            sample_rate: default_sample_rate(),
            bit_depth: default_bit_depth(),
            channels: default_channels(),
            buffer_frames: default_buffer_frames(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl EngineSettings {
    /// Parse settings from TOML text. Missing keys fall back to defaults.
    pub fn from_toml_str(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Load settings from a specific file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let settings = Self::from_toml_str(&content).map_err(|source| Error::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Load settings following the resolution priority order.
    ///
    /// # Arguments
    /// - `cli_path`: Config file given on the command line, if any
    pub fn load(cli_path: Option<&Path>) -> Result<Self> {
        match resolve_config_path(cli_path) {
            ConfigSource::Explicit(path) => {
                if !path.exists() {
                    return Err(Error::Config(format!(
                        "Config file not found: {}",
                        path.display()
                    )));
                }
                Self::load_from(&path)
            }
            ConfigSource::User(path) => {
                info!("Using config file {}", path.display());
                Self::load_from(&path)
            }
            ConfigSource::Defaults => {
                info!("No config file found, using built-in defaults");
                Ok(Self::default())
            }
        }
    }

    /// Close timeout as a Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.engine.shutdown_timeout_ms)
    }
}

/// Where settings come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Path named on the command line or in the environment
    Explicit(PathBuf),
    /// Existing file in the per-user config directory
    User(PathBuf),
    /// No file; built-in defaults
    Defaults,
}

/// Resolve the config file location.
///
/// Priority order: CLI argument, environment variable, per-user config file.
pub fn resolve_config_path(cli_path: Option<&Path>) -> ConfigSource {
    // Priority 1: Command-line argument
    if let Some(path) = cli_path {
        return ConfigSource::Explicit(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.is_empty() {
            return ConfigSource::Explicit(PathBuf::from(path));
        }
        warn!("{} is set but empty, ignoring", CONFIG_ENV_VAR);
    }

    // Priority 3: Per-user config file
    if let Some(path) = user_config_path() {
        if path.exists() {
            return ConfigSource::User(path);
        }
    }

    ConfigSource::Defaults
}

/// Per-user config file path for the platform
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("wavecycle").join("config.toml"))
}
