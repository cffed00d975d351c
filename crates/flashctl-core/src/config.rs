use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::transport::ReconnectPolicy;

/// Reconnect backoff parameters (optional section in config.toml).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Delay before the first reconnect attempt, in milliseconds.
    pub base_delay_ms: u64,
    /// Multiplier applied per consecutive failure.
    pub factor: u32,
    /// Upper bound on a single backoff delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Attempts before the channel is declared offline.
    pub max_attempts: u32,
    /// Random spread applied to each delay, as a fraction (0.2 = ±20%).
    pub jitter: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 500,
            factor: 2,
            max_delay_ms: 30_000,
            max_attempts: 10,
            jitter: 0.2,
        }
    }
}

/// Global configuration loaded from `~/.config/flashctl/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlashConfig {
    /// Backend websocket endpoint.
    pub endpoint: String,
    /// Frames held while disconnected; the oldest is dropped on overflow.
    pub outbound_queue_capacity: usize,
    /// Finished jobs kept in the history ring.
    pub history_capacity: usize,
    /// Wait for a pause/resume/cancel acknowledgement before rolling back.
    pub ack_timeout_ms: u64,
    /// Silence on a flashing/paused job before it is marked stalled.
    pub heartbeat_timeout_ms: u64,
    /// After a reconnect, time a stalled job has to report progress before it fails.
    pub reconnect_grace_ms: u64,
    /// Interval between keepalive pings while connected.
    pub keepalive_interval_ms: u64,
    /// Optional backoff policy; if missing, built-in defaults are used.
    #[serde(default)]
    pub reconnect: Option<ReconnectConfig>,
}

impl Default for FlashConfig {
    fn default() -> Self {
        Self {
            endpoint: "ws://127.0.0.1:3001/ws/flash".to_string(),
            outbound_queue_capacity: 64,
            history_capacity: 200,
            ack_timeout_ms: 8_000,
            heartbeat_timeout_ms: 15_000,
            reconnect_grace_ms: 10_000,
            keepalive_interval_ms: 30_000,
            reconnect: None,
        }
    }
}

impl FlashConfig {
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn reconnect_grace(&self) -> Duration {
        Duration::from_millis(self.reconnect_grace_ms)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }

    /// Backoff policy built from the `[reconnect]` table or defaults.
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy::from(&self.reconnect.clone().unwrap_or_default())
    }

    /// Reject values the orchestrator cannot run with.
    pub fn validate(&self) -> Result<()> {
        let endpoint = url::Url::parse(&self.endpoint)
            .with_context(|| format!("invalid endpoint: {}", self.endpoint))?;
        if !matches!(endpoint.scheme(), "ws" | "wss") {
            bail!("endpoint must use ws:// or wss://, got {}", endpoint.scheme());
        }
        if self.outbound_queue_capacity == 0 {
            bail!("outbound_queue_capacity must be at least 1");
        }
        if self.history_capacity == 0 {
            bail!("history_capacity must be at least 1");
        }
        for (name, value) in [
            ("ack_timeout_ms", self.ack_timeout_ms),
            ("heartbeat_timeout_ms", self.heartbeat_timeout_ms),
            ("reconnect_grace_ms", self.reconnect_grace_ms),
            ("keepalive_interval_ms", self.keepalive_interval_ms),
        ] {
            if value == 0 {
                bail!("{name} must be greater than zero");
            }
        }
        if let Some(r) = &self.reconnect {
            if r.factor == 0 || r.base_delay_ms == 0 {
                bail!("reconnect.factor and reconnect.base_delay_ms must be greater than zero");
            }
            if !(0.0..=1.0).contains(&r.jitter) {
                bail!("reconnect.jitter must be within 0.0..=1.0");
            }
        }
        Ok(())
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("flashctl")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from the given path, writing defaults if the file is missing.
pub fn load_or_init_at(path: &Path) -> Result<FlashConfig> {
    if !path.exists() {
        let default_cfg = FlashConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create dir: {}", parent.display()))?;
        }
        fs::write(path, toml).with_context(|| format!("write config: {}", path.display()))?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data =
        fs::read_to_string(path).with_context(|| format!("read config: {}", path.display()))?;
    let cfg: FlashConfig =
        toml::from_str(&data).with_context(|| format!("parse config: {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<FlashConfig> {
    load_or_init_at(&config_path()?)
}
