//! Player configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use gridcast_core::transport::{DEFAULT_EXTENSION, DEFAULT_POLL_INTERVAL};
use gridcast_core::{ChannelAddress, ChunkFileConnector, StreamConfig};

/// Top-level configuration for the player.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Stream engine tunables.
    pub stream: StreamConfig,
    /// Where stream files live.
    pub source: SourceConfig,
    /// Channel played at startup.
    pub channel: ChannelConfig,
    /// Logging.
    pub logging: LoggingConfig,
}

/// Stream file source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Root directory; files resolve to `root/model/run/variable.extension`.
    pub root: PathBuf,
    /// Stream file extension.
    pub extension: String,
    /// Pause between reads at end of file, in milliseconds.
    pub poll_ms: u64,
}

/// Channel address.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub model: String,
    pub run: String,
    pub variable: String,
}

/// Logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or `EnvFilter` directive; `RUST_LOG` overrides it.
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("data"),
            extension: DEFAULT_EXTENSION.into(),
            poll_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
        }
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            model: "demo".into(),
            run: "latest".into(),
            variable: "t2m".into(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl PlayerConfig {
    /// Load from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Write default config to a file.
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let text = toml::to_string_pretty(&Self::default()).map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }

    pub fn address(&self) -> ChannelAddress {
        ChannelAddress::new(
            &self.channel.model,
            &self.channel.run,
            &self.channel.variable,
        )
    }

    /// File connector for the configured source.
    pub fn connector(&self) -> ChunkFileConnector {
        ChunkFileConnector::new(&self.source.root)
            .with_extension(&self.source.extension)
            .with_poll_interval(Duration::from_millis(self.source.poll_ms))
            .with_channel(self.stream.channel_id)
            .with_depth(self.stream.queue_depth)
    }

    /// Path of the configured channel's stream file.
    pub fn stream_path(&self) -> PathBuf {
        self.address()
            .resolve(&self.source.root, &self.source.extension)
    }
}

// ── Tests ────────────────────────────────────────────────────────
