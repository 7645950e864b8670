use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::warn;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::internet::MAX_INTERNET_HOSTS;
use crate::ping::{ProbeRequest, Thresholds};
use crate::sensor::Filter;
use crate::watchdog::{NotifyTemplates, WatchdogSettings};

/// Largest ICMP echo payload that fits an IPv4 datagram.
pub const MAX_DATA_SIZE: usize = 65507;
/// Upper bound for packet interval, timeout and wait ceiling.
pub const MAX_PROBE_MS: u64 = 3_600_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not find config directory")]
    NoConfigDir,

    #[error("config I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("between 1 and {max} internet hosts are required, got {0}", max = MAX_INTERNET_HOSTS)]
    HostCount(usize),

    #[error("packet count must be positive")]
    ZeroCount,

    #[error("loss threshold must be within 0..=100, got {0}")]
    LossThreshold(f32),

    #[error("{field} must be within 1..={max} ms, got {value}", max = MAX_PROBE_MS)]
    Millis { field: &'static str, value: u64 },

    #[error("payload size must be at most {max} bytes, got {0}", max = MAX_DATA_SIZE)]
    DataSize(usize),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeSettings {
    pub count: u32,
    pub interval_ms: u64,
    pub timeout_ms: u64,
    pub data_size: usize,
    pub verbose: bool,
    /// Slack past the session bound before giving up on the engine.
    pub wait_ceiling_ms: Option<u64>,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            count: 5,
            interval_ms: 1000,
            timeout_ms: 1000,
            data_size: 32,
            verbose: false,
            wait_ceiling_ms: None,
        }
    }
}

impl ProbeSettings {
    pub fn request(&self, hostname: impl Into<String>) -> ProbeRequest {
        let request = ProbeRequest::new(hostname)
            .with_count(self.count)
            .with_interval(Duration::from_millis(self.interval_ms))
            .with_timeout(Duration::from_millis(self.timeout_ms))
            .with_data_size(self.data_size)
            .with_verbose(self.verbose);
        match self.wait_ceiling_ms {
            Some(ms) => request.with_wait_ceiling(Duration::from_millis(ms)),
            None => request,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    pub host: String,
    pub backoff_secs: u64,
    pub link_poll_secs: u64,
    pub device_id: String,
    pub notify: NotifyTemplates,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        let settings = WatchdogSettings::default();
        Self {
            host: "8.8.8.8".to_string(),
            backoff_secs: settings.backoff.as_secs(),
            link_poll_secs: settings.link_poll.as_secs(),
            device_id: settings.device_id,
            notify: NotifyTemplates {
                failure: Some("Host {host} is unreachable".to_string()),
                recovery: Some("Host {host} is reachable again".to_string()),
            },
        }
    }
}

impl WatchdogConfig {
    pub fn settings(&self) -> WatchdogSettings {
        WatchdogSettings {
            backoff: Duration::from_secs(self.backoff_secs),
            link_poll: Duration::from_secs(self.link_poll_secs),
            device_id: self.device_id.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    pub host: String,
    pub interval_secs: u64,
    pub duration_filter: Filter,
    pub loss_filter: Filter,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            host: "8.8.8.8".to_string(),
            interval_secs: 60,
            duration_filter: Filter::None,
            loss_filter: Filter::None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub probe: ProbeSettings,
    pub thresholds: Thresholds,
    pub internet_hosts: Vec<String>,
    pub watchdog: WatchdogConfig,
    pub sensor: SensorConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            probe: ProbeSettings::default(),
            thresholds: Thresholds::default(),
            internet_hosts: vec![
                "8.8.8.8".to_string(),
                "1.1.1.1".to_string(),
                "9.9.9.9".to_string(),
            ],
            watchdog: WatchdogConfig::default(),
            sensor: SensorConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn get_config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir()
            .ok_or(ConfigError::NoConfigDir)?
            .join("PingProbe");

        fs::create_dir_all(&config_dir)?;
        Ok(config_dir.join("config.json"))
    }

    /// Settings from the user config directory, or defaults when there are none.
    pub fn load() -> Self {
        match Self::get_config_path() {
            Ok(path) => Self::load_or_default(&path),
            Err(e) => {
                warn!("Failed to get config path: {}", e);
                AppConfig::default()
            }
        }
    }

    /// Settings from `path`; a missing, unreadable or invalid file yields defaults.
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            return AppConfig::default();
        }
        Self::load_from(path).unwrap_or_else(|e| {
            warn!("Failed to load config {}: {}", path.display(), e);
            AppConfig::default()
        })
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Write to the user config directory, returning the file written.
    pub fn save(&self) -> Result<PathBuf, ConfigError> {
        let path = Self::get_config_path()?;
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let hosts = self.internet_hosts.len();
        if hosts == 0 || hosts > MAX_INTERNET_HOSTS {
            return Err(ConfigError::HostCount(hosts));
        }
        if self.probe.count == 0 {
            return Err(ConfigError::ZeroCount);
        }
        let max_loss = self.thresholds.max_loss_percent;
        if !(0.0..=100.0).contains(&max_loss) {
            return Err(ConfigError::LossThreshold(max_loss));
        }

        let probe = &self.probe;
        let millis = [
            ("interval_ms", Some(probe.interval_ms)),
            ("timeout_ms", Some(probe.timeout_ms)),
            ("wait_ceiling_ms", probe.wait_ceiling_ms),
        ];
        for (field, value) in millis {
            if let Some(value) = value.filter(|ms| !(1..=MAX_PROBE_MS).contains(ms)) {
                return Err(ConfigError::Millis { field, value });
            }
        }
        if probe.data_size > MAX_DATA_SIZE {
            return Err(ConfigError::DataSize(probe.data_size));
        }
        Ok(())
    }
}
