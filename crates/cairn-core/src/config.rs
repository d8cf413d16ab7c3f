//! Configuration system for Cairn.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. explicit path (the daemon takes one as its first argument)
//!   2. $CAIRN_CONFIG
//!   3. $XDG_CONFIG_HOME/cairn/config.toml
//!   4. ~/.config/cairn/config.toml

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CairnConfig {
    pub link: LinkConfig,
    pub telemetry: TelemetryConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Number of channel slots the device exposes. Scans cover 0..max_channels.
    pub max_channels: u8,
    /// Per-probe device round-trip bound, in milliseconds.
    pub fetch_timeout_ms: u64,
    /// Delay between consecutive probes, in milliseconds. Keeps the
    /// radio link from saturating during a full scan.
    pub probe_spacing_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Sliding-window span for correlating RF samples with messages,
    /// in milliseconds.
    pub correlation_window_ms: u64,
    /// Max distinct pubkey prefixes tracked in the last-known
    /// signal-quality map. Oldest-touched entries are dropped first.
    /// 0 = unlimited.
    pub last_known_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default tracing filter. RUST_LOG overrides this.
    pub level: String,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for CairnConfig {
    fn default() -> Self {
        Self {
            link: LinkConfig::default(),
            telemetry: TelemetryConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            max_channels: 40,
            fetch_timeout_ms: 2000,
            probe_spacing_ms: 100,
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            correlation_window_ms: 5000,
            last_known_capacity: 512,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

// ── Duration accessors ────────────────────────────────────────────────────────

impl LinkConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn probe_spacing(&self) -> Duration {
        Duration::from_millis(self.probe_spacing_ms)
    }
}

impl TelemetryConfig {
    pub fn correlation_window(&self) -> Duration {
        Duration::from_millis(self.correlation_window_ms)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("cairn")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl CairnConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::file_path())
    }

    /// Load config from an explicit path. A missing file is not an
    /// error; env vars still apply on top.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::ReadFailed(path.to_owned(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_owned(), e))?
        } else {
            CairnConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("CAIRN_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write the default config at `path` if none exists.
    pub fn write_default_if_missing(path: &Path) -> Result<(), ConfigError> {
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.to_owned(), e))?;
            }
            let text = toml::to_string_pretty(&CairnConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(path, text)
                .map_err(|e| ConfigError::WriteFailed(path.to_owned(), e))?;
        }
        Ok(())
    }

    /// Apply CAIRN_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("CAIRN_LINK__MAX_CHANNELS") {
            if let Ok(n) = v.parse() {
                self.link.max_channels = n;
            }
        }
        if let Ok(v) = std::env::var("CAIRN_LINK__FETCH_TIMEOUT_MS") {
            if let Ok(n) = v.parse() {
                self.link.fetch_timeout_ms = n;
            }
        }
        if let Ok(v) = std::env::var("CAIRN_LINK__PROBE_SPACING_MS") {
            if let Ok(n) = v.parse() {
                self.link.probe_spacing_ms = n;
            }
        }
        if let Ok(v) = std::env::var("CAIRN_TELEMETRY__CORRELATION_WINDOW_MS") {
            if let Ok(n) = v.parse() {
                self.telemetry.correlation_window_ms = n;
            }
        }
        if let Ok(v) = std::env::var("CAIRN_TELEMETRY__LAST_KNOWN_CAPACITY") {
            if let Ok(n) = v.parse() {
                self.telemetry.last_known_capacity = n;
            }
        }
        if let Ok(v) = std::env::var("CAIRN_LOG__LEVEL") {
            self.log.level = v;
        }
    }
}
