//! Runtime configuration for the synchronization layer
//!
//! Whether statistics exist at all is a cargo feature. What is configured
//! here are the calibration values the statistics depend on, which are
//! hardware specific and so never hard-coded: the contention threshold and
//! the cycle counter rate.
//!
//! Sources, later wins: defaults, TOML file (`TYPTHON_SYNC_CONFIG`),
//! `TYPTHON_SYNC_*` environment variables.

use crate::error::ConfigError;
use crate::lock::{self, DEFAULT_CONTENTION_THRESHOLD};
use crate::{clock, stats};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;
use tracing::{debug, info};

pub const CONFIG_PATH_VAR: &str = "TYPTHON_SYNC_CONFIG";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_threshold")]
    pub contention_threshold_cycles: u64,

    /// `None` uses the platform rate
    #[serde(default)]
    pub cycles_per_second: Option<u64>,

    #[serde(default = "default_false")]
    pub calibrate_clock: bool,

    /// Merge thread-local refcount stats every N ops (0 = at thread exit)
    #[serde(default)]
    pub refcount_flush_interval: u64,

    #[serde(default)]
    pub stats_format: StatsFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum StatsFormat {
    #[default]
    Text = 0,
    Json = 1,
}

impl FromStr for StatsFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(ConfigError::InvalidValue {
                key: "stats_format",
                value: s.to_string(),
            }),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            contention_threshold_cycles: DEFAULT_CONTENTION_THRESHOLD,
            cycles_per_second: None,
            calibrate_clock: false,
            refcount_flush_interval: 0,
            stats_format: StatsFormat::Text,
        }
    }
}

fn default_threshold() -> u64 { DEFAULT_CONTENTION_THRESHOLD }
fn default_false() -> bool { false }

impl SyncConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// File named by `TYPTHON_SYNC_CONFIG` (if any), then environment overrides
    pub fn discover() -> Result<Self, ConfigError> {
        let base = match std::env::var(CONFIG_PATH_VAR) {
            Ok(path) => Self::load(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        base.with_overrides(|key| std::env::var(key).ok())
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply `TYPTHON_SYNC_*` overrides looked up through `lookup`
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("TYPTHON_SYNC_CONTENTION_THRESHOLD") {
            self.contention_threshold_cycles = parse_u64("contention_threshold_cycles", &v)?;
        }

        if let Some(v) = lookup("TYPTHON_SYNC_CYCLES_PER_SEC") {
            let rate = parse_u64("cycles_per_second", &v)?;
            self.cycles_per_second = if rate == 0 { None } else { Some(rate) };
        }

        if let Some(v) = lookup("TYPTHON_SYNC_CALIBRATE") {
            self.calibrate_clock = v == "1" || v.to_lowercase() == "true";
        }

        if let Some(v) = lookup("TYPTHON_SYNC_FLUSH_INTERVAL") {
            self.refcount_flush_interval = parse_u64("refcount_flush_interval", &v)?;
        }

        if let Some(v) = lookup("TYPTHON_SYNC_STATS_FORMAT") {
            self.stats_format = v.parse()?;
        }

        Ok(self)
    }

    /// Install into the process-wide settings read by the hot paths
    pub fn apply(&self) {
        lock::set_contention_threshold(self.contention_threshold_cycles);
        stats::set_flush_interval(self.refcount_flush_interval);
        STATS_FORMAT.store(self.stats_format as u8, Ordering::Relaxed);

        match self.cycles_per_second {
            Some(rate) => clock::set_cycles_per_second(rate),
            None if self.calibrate_clock => {
                clock::calibrate(Duration::from_millis(50));
            }
            None => clock::set_cycles_per_second(0),
        }

        debug!(config = ?self, "sync configuration applied");
        info!(
            threshold = self.contention_threshold_cycles,
            cycles_per_sec = clock::cycles_per_second(),
            "synchronization layer configured"
        );
    }
}

fn parse_u64(key: &'static str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    })
}

static STATS_FORMAT: AtomicU8 = AtomicU8::new(StatsFormat::Text as u8);

/// Output format for statistics reports
pub fn stats_format() -> StatsFormat {
    match STATS_FORMAT.load(Ordering::Relaxed) {
        1 => StatsFormat::Json,
        _ => StatsFormat::Text,
    }
}
