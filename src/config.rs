//! Runtime configuration: one struct, built at entry, read-only everywhere
//! else. Values come from defaults, an optional TOML file, then CLI
//! overrides applied in `main`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Default packet-size histogram edges (bytes). The last bin is open-ended.
pub const DEFAULT_SIZE_BIN_EDGES: [u32; 6] = [64, 128, 256, 512, 1024, 1518];

/// Default flow-duration histogram edges (seconds).
pub const DEFAULT_DURATION_BIN_EDGES: [f64; 4] = [0.1, 1.0, 10.0, 60.0];

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "config io error: {}", err),
            ConfigError::Parse(err) => write!(f, "config parse error: {}", err),
            ConfigError::Invalid(reason) => write!(f, "invalid config: {}", reason),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub source: SourceConfig,
    pub engine: EngineConfig,
    pub features: FeatureConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        let config: Config = toml::from_str(&raw).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.engine.window_seconds > 0.0) || !self.engine.window_seconds.is_finite() {
            return Err(ConfigError::Invalid(format!(
                "window_seconds must be positive, got {}",
                self.engine.window_seconds
            )));
        }
        if self.engine.size_bin_edges.is_empty() {
            return Err(ConfigError::Invalid("size_bin_edges must not be empty".into()));
        }
        if !self.engine.size_bin_edges.windows(2).all(|w| w[0] < w[1]) {
            return Err(ConfigError::Invalid(
                "size_bin_edges must be strictly increasing".into(),
            ));
        }
        if self.engine.duration_bin_edges.is_empty() {
            return Err(ConfigError::Invalid(
                "duration_bin_edges must not be empty".into(),
            ));
        }
        if !self
            .engine
            .duration_bin_edges
            .windows(2)
            .all(|w| w[0] < w[1])
        {
            return Err(ConfigError::Invalid(
                "duration_bin_edges must be strictly increasing".into(),
            ));
        }
        if self.engine.unique_ip_cap == 0 {
            return Err(ConfigError::Invalid("unique_ip_cap must be at least 1".into()));
        }
        if self.features.rolling_window == 0 {
            return Err(ConfigError::Invalid("rolling_window must be at least 1".into()));
        }
        Ok(())
    }
}

/// Read budgets for the pcap source. Zero disables a budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub max_read_bytes: u64,
    pub read_timeout_secs: f64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig {
            max_read_bytes: 0,
            read_timeout_secs: 0.0,
        }
    }
}

/// What to do with a packet older than the open window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NonMonotonicPolicy {
    /// Snap the timestamp to the window start and count the event.
    Clamp,
    /// Abort extraction.
    Reject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub window_seconds: f64,
    pub size_bin_edges: Vec<u32>,
    pub duration_bin_edges: Vec<f64>,
    pub top_k_flows: u32,
    pub top_k_ports: u32,
    pub unique_ip_cap: u32,
    pub nonmonotonic_policy: NonMonotonicPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            window_seconds: 60.0,
            size_bin_edges: DEFAULT_SIZE_BIN_EDGES.to_vec(),
            duration_bin_edges: DEFAULT_DURATION_BIN_EDGES.to_vec(),
            top_k_flows: 10,
            top_k_ports: 10,
            unique_ip_cap: 1_000_000,
            nonmonotonic_policy: NonMonotonicPolicy::Clamp,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Rolling-baseline length in windows.
    pub rolling_window: usize,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        FeatureConfig { rolling_window: 10 }
    }
}
