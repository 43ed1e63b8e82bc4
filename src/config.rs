//! Configuration loading.
//!
//! Looked up at `--config`, then `$SMITE_CONFIG`, then
//! `<config dir>/smite/config.toml`. A missing file means defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::forward::{PortProber, SupervisorTimings, DEFAULT_GOST_PATH, DEFAULT_RATHOLE_PATH};

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "SMITE_CONFIG";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub forward: ForwardConfig,
    pub watchdog: WatchdogConfig,
    pub store: StoreConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForwardConfig {
    /// Log files and generated engine configs.
    pub data_dir: PathBuf,
    pub gost_binary: PathBuf,
    pub rathole_binary: PathBuf,
    pub timings: TimingsConfig,
}

impl Default for ForwardConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/app/data"),
            gost_binary: PathBuf::from(DEFAULT_GOST_PATH),
            rathole_binary: PathBuf::from(DEFAULT_RATHOLE_PATH),
            timings: TimingsConfig::default(),
        }
    }
}

impl ForwardConfig {
    pub fn gost_dir(&self) -> PathBuf {
        self.data_dir.join("gost")
    }

    pub fn rathole_dir(&self) -> PathBuf {
        self.data_dir.join("rathole")
    }
}

/// All values in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingsConfig {
    pub startup_grace_ms: u64,
    pub settle_ms: u64,
    pub probe_delay_ms: u64,
    pub probe_timeout_ms: u64,
    pub probe_retry_ms: u64,
    pub stop_timeout_ms: u64,
    pub sweep_wait_ms: u64,
}

impl Default for TimingsConfig {
    fn default() -> Self {
        Self {
            startup_grace_ms: 1500,
            settle_ms: 500,
            probe_delay_ms: 500,
            probe_timeout_ms: 1000,
            probe_retry_ms: 500,
            stop_timeout_ms: 5000,
            sweep_wait_ms: 1000,
        }
    }
}

impl TimingsConfig {
    pub fn to_timings(self) -> SupervisorTimings {
        let ms = Duration::from_millis;
        SupervisorTimings {
            startup_grace: ms(self.startup_grace_ms),
            settle: ms(self.settle_ms),
            probe_delay: ms(self.probe_delay_ms),
            prober: PortProber::new(ms(self.probe_timeout_ms), ms(self.probe_retry_ms)),
            stop_timeout: ms(self.stop_timeout_ms),
            sweep_wait: ms(self.sweep_wait_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    pub enabled: bool,
    pub interval_secs: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 30,
        }
    }
}

impl WatchdogConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database holding tunnels and nodes. Without one, startup
    /// reconciliation is skipped.
    pub database: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `tracing` filter directive; `RUST_LOG` wins when set.
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".into(),
        }
    }
}

impl Config {
    /// Resolve the config path and load it.
    pub fn load(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        let path = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from))
            .or_else(default_config_path);

        let Some(path) = path else {
            return Ok((Self::default(), None));
        };
        let config = Self::load_from(&path)?;
        Ok((config, Some(path)))
    }

    /// Load `path`; a missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("no config at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(e) => return Err(e).with_context(|| format!("Failed to read {}", path.display())),
        };
        Self::parse(&content).with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.forward.timings.stop_timeout_ms == 0 {
            bail!("forward.timings.stop_timeout_ms must be greater than zero");
        }
        if self.forward.timings.probe_timeout_ms == 0 {
            bail!("forward.timings.probe_timeout_ms must be greater than zero");
        }
        if self.watchdog.interval_secs == 0 {
            bail!("watchdog.interval_secs must be greater than zero");
        }
        if self.forward.data_dir.as_os_str().is_empty() {
            bail!("forward.data_dir must not be empty");
        }
        Ok(())
    }
}

fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "smite").map(|dirs| dirs.config_dir().join("config.toml"))
}
