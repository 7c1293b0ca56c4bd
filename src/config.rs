use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Serial output; absent means simulation mode.
    #[serde(default)]
    pub serial: Option<SerialConfig>,
    #[serde(default)]
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SerialConfig {
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Upper bound on a single frame write before it counts as failed.
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    /// File that session summaries are appended to
    #[serde(default = "default_log_path")]
    pub log_path: String,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            log_path: default_log_path(),
            tick_interval_ms: default_tick_interval_ms(),
        }
    }
}

impl SerialConfig {
    pub fn new(port: impl Into<String>) -> Self {
        SerialConfig {
            port: port.into(),
            baud_rate: default_baud_rate(),
            write_timeout_ms: default_write_timeout_ms(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .context(format!("Failed to read config {}", path.display()))?;
        serde_json::from_str(&data).context(format!("Invalid config {}", path.display()))
    }
}

fn default_baud_rate() -> u32 {
    115200
}

fn default_write_timeout_ms() -> u64 {
    1000
}

fn default_log_path() -> String {
    "instrument_log.txt".to_string()
}

fn default_tick_interval_ms() -> u64 {
    1000
}
