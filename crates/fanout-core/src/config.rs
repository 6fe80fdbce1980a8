//! Engine constants and tunable configuration.
//!
//! The constants below are the single source for every magic number the
//! engine uses; `EngineConfig` exposes the tunable subset through an
//! optional TOML file under the XDG config dir.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Retry budget (initial ttl) for every segment, including split siblings.
pub const RETRY_BUDGET: u8 = 3;

/// Streaming body buffer size per in-flight fetch.
pub const BODY_BUFFER_BYTES: usize = 10 * 1024 * 1024;

/// Minimum outstanding bytes (`to - ack`) for a downloading segment to be
/// worth splitting.
pub const MIN_SPLIT_BYTES: u64 = 1024;

/// Dispatcher sleep when no worker can be matched with work.
pub const IDLE_POLL_MS: u64 = 100;

/// Connect/read timeout for HEAD characterization probes.
pub const HEAD_TIMEOUT_SECS: u64 = 2;

/// TCP port the outbound HTTP proxies listen on.
pub const PROXY_PORT: u16 = 3000;

/// Tunable engine configuration, loaded from `~/.config/fanout/config.toml`.
///
/// Defaults mirror the module constants; the retry budget is deliberately
/// not configurable because segments are minted deep inside the resource
/// model where no configuration handle flows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Minimum outstanding bytes for a segment to be splittable.
    pub min_split_bytes: u64,
    /// Dispatcher idle poll interval in milliseconds.
    pub idle_poll_ms: u64,
    /// Streaming body buffer size in bytes.
    pub body_buffer_bytes: usize,
    /// HEAD probe timeout in seconds.
    pub head_timeout_secs: u64,
    /// Proxy listen port.
    pub proxy_port: u16,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_split_bytes: MIN_SPLIT_BYTES,
            idle_poll_ms: IDLE_POLL_MS,
            body_buffer_bytes: BODY_BUFFER_BYTES,
            head_timeout_secs: HEAD_TIMEOUT_SECS,
            proxy_port: PROXY_PORT,
        }
    }
}

impl EngineConfig {
    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }

    pub fn head_timeout(&self) -> Duration {
        Duration::from_secs(self.head_timeout_secs)
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("fanout")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<EngineConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = EngineConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: EngineConfig = toml::from_str(&data)?;
    Ok(cfg)
}
