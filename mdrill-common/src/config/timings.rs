//! Run timings: every delay and budget the test-case lifecycle waits on.
//!
//! Values are loaded in three layers, each overriding the previous one:
//! built-in defaults, an optional TOML file, then `MDRILL_<KEY>` environment
//! variables. Keys are expressed in seconds, e.g.
//!
//! ```toml
//! settle_delay_secs = 10
//! failover_timeout_secs = 300.0
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use super::ConfigError;
use super::env::EnvParser;
use super::source::{ConfigSource, Sourced};

/// Upper bound accepted for any single timing value (one day).
const MAX_TIMING_SECS: f64 = 86_400.0;

/// Every key understood by [`RunTimings`], in declaration order.
pub const TIMING_KEYS: [&str; 10] = [
    "startup_grace_secs",
    "stop_timeout_secs",
    "settle_delay_secs",
    "pre_idle_delay_secs",
    "restart_vms_delay_secs",
    "failover_retry_interval_secs",
    "failover_timeout_secs",
    "region_assert_timeout_secs",
    "region_assert_interval_secs",
    "log_collection_timeout_secs",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunTimings {
    /// How long a freshly spawned workload must stay alive.
    pub startup_grace: Duration,
    /// Ceiling for the workload to exit after the stop signal.
    pub stop_timeout: Duration,
    /// Pause between the last operation and stopping the workload.
    pub settle_delay: Duration,
    /// Unconditional pause before idle polling starts.
    pub pre_idle_delay: Duration,
    pub restart_vms_delay: Duration,
    pub failover_retry_interval: Duration,
    /// Budget for retrying a rejected primary restart.
    pub failover_timeout: Duration,
    pub region_assert_timeout: Duration,
    pub region_assert_interval: Duration,
    pub log_collection_timeout: Duration,
}

impl Default for RunTimings {
    fn default() -> Self {
        Self {
            startup_grace: Duration::from_secs(1),
            stop_timeout: Duration::from_secs(60),
            settle_delay: Duration::from_secs(10),
            pre_idle_delay: Duration::from_secs(3),
            restart_vms_delay: Duration::from_secs(5),
            failover_retry_interval: Duration::from_secs(5),
            failover_timeout: Duration::from_secs(300),
            region_assert_timeout: Duration::from_secs(90),
            region_assert_interval: Duration::from_secs(5),
            log_collection_timeout: Duration::from_secs(600),
        }
    }
}

impl RunTimings {
    /// Load defaults, then the optional file, then environment overrides.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut timings = Self::default();
        let mut sources: Vec<ConfigSource> = vec![ConfigSource::Default; TIMING_KEYS.len()];

        if let Some(path) = file {
            let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            for key in timings.apply_toml(&contents, Some(path))? {
                if let Some(index) = key_index(key) {
                    sources[index] = ConfigSource::File(path.to_path_buf());
                }
            }
        }

        let mut parser = EnvParser::new();
        for (index, key) in TIMING_KEYS.iter().enumerate() {
            let overridden = timings.apply_env(&mut parser, key);
            if !overridden.is_default() {
                sources[index] = overridden.source;
            }
        }
        let errors = parser.take_errors();
        if !errors.is_empty() {
            return Err(ConfigError::Env(errors));
        }

        for (key, source) in TIMING_KEYS.iter().zip(&sources) {
            if let Some(value) = timings.get(key) {
                debug!("timing {} = {:?} ({})", key, value, source);
            }
        }
        Ok(timings)
    }

    /// Parse a TOML document on top of the defaults.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let mut timings = Self::default();
        timings.apply_toml(contents, None)?;
        Ok(timings)
    }

    /// Same timings with every delay and budget set to zero.
    ///
    /// Used by tests and dry runs that must not sleep.
    pub fn zero() -> Self {
        let mut timings = Self::default();
        for key in TIMING_KEYS {
            if let Some(slot) = timings.slot(key) {
                *slot = Duration::ZERO;
            }
        }
        timings
    }

    pub fn get(&self, key: &str) -> Option<Duration> {
        let mut copy = *self;
        copy.slot(key).map(|slot| *slot)
    }

    fn slot(&mut self, key: &str) -> Option<&mut Duration> {
        let slot = match key {
            "startup_grace_secs" => &mut self.startup_grace,
            "stop_timeout_secs" => &mut self.stop_timeout,
            "settle_delay_secs" => &mut self.settle_delay,
            "pre_idle_delay_secs" => &mut self.pre_idle_delay,
            "restart_vms_delay_secs" => &mut self.restart_vms_delay,
            "failover_retry_interval_secs" => &mut self.failover_retry_interval,
            "failover_timeout_secs" => &mut self.failover_timeout,
            "region_assert_timeout_secs" => &mut self.region_assert_timeout,
            "region_assert_interval_secs" => &mut self.region_assert_interval,
            "log_collection_timeout_secs" => &mut self.log_collection_timeout,
            _ => return None,
        };
        Some(slot)
    }

    /// Apply a TOML document, returning the keys it set.
    fn apply_toml(
        &mut self,
        contents: &str,
        path: Option<&Path>,
    ) -> Result<Vec<&'static str>, ConfigError> {
        let location = || path.map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("<inline>"));
        let table: toml::Table = contents.parse().map_err(|source| ConfigError::Toml {
            path: location(),
            source,
        })?;

        let mut applied = Vec::new();
        for (key, value) in &table {
            let Some(index) = key_index(key) else {
                return Err(ConfigError::UnknownKey {
                    path: location(),
                    key: key.clone(),
                });
            };
            let seconds = match value {
                toml::Value::Integer(n) => *n as f64,
                toml::Value::Float(f) => *f,
                other => {
                    return Err(ConfigError::InvalidValue {
                        key: key.clone(),
                        value: other.to_string(),
                    });
                }
            };
            let duration = seconds_to_duration(seconds).ok_or_else(|| ConfigError::InvalidValue {
                key: key.clone(),
                value: value.to_string(),
            })?;
            let canonical = TIMING_KEYS[index];
            if let Some(slot) = self.slot(canonical) {
                *slot = duration;
            }
            applied.push(canonical);
        }
        Ok(applied)
    }

    fn apply_env(&mut self, parser: &mut EnvParser, key: &str) -> Sourced<f64> {
        let current = self.get(key).unwrap_or_default().as_secs_f64();
        let sourced = parser.get_f64_range(&key.to_uppercase(), current, 0.0, MAX_TIMING_SECS);
        if !sourced.is_default()
            && let (Some(slot), Some(duration)) = (self.slot(key), seconds_to_duration(sourced.value))
        {
            *slot = duration;
        }
        sourced
    }
}

fn key_index(key: &str) -> Option<usize> {
    TIMING_KEYS.iter().position(|candidate| *candidate == key)
}

fn seconds_to_duration(seconds: f64) -> Option<Duration> {
    if !(0.0..=MAX_TIMING_SECS).contains(&seconds) {
        return None;
    }
    Duration::try_from_secs_f64(seconds).ok()
}
