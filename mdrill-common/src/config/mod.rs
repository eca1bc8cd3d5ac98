//! Configuration for test runs.
//!
//! - [`TestCaseConfiguration`]: immutable parameters shared by every case of a run
//! - [`RunTimings`]: delays and budgets, layered from defaults, file and environment
//! - [`EnvParser`]: typed `MDRILL_*` environment access with error collection

pub mod env;
pub mod source;
pub mod timings;

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::poller::Poller;

pub use env::{ENV_PREFIX, EnvError, EnvParser};
pub use source::{ConfigSource, Sourced};
pub use timings::{RunTimings, TIMING_KEYS};

pub const DEFAULT_ORGANIZATION_NAME: &str = "MongoDB";
pub const DEFAULT_DB_USERNAME: &str = "atlasuser";
pub const DEFAULT_DB_PASSWORD: &str = "mypassword123";
pub const DEFAULT_POLLING_TIMEOUT_SECS: f64 = 1200.0;
pub const DEFAULT_POLLING_FREQUENCY: f64 = 1.0;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("unknown key `{key}` in {path}")]
    UnknownKey { path: PathBuf, key: String },

    #[error("invalid value for `{key}`: {value} (expected seconds between 0 and 86400)")]
    InvalidValue { key: String, value: String },

    #[error("invalid environment configuration: {}", join_errors(.0))]
    Env(Vec<EnvError>),
}

fn join_errors(errors: &[EnvError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Run parameters shared by all test cases.
#[derive(Debug, Clone)]
pub struct TestCaseConfiguration {
    pub organization_name: String,
    pub project_name: String,
    /// Mixed into every cluster name so concurrent runs do not collide.
    pub name_salt: String,
    pub polling_frequency: f64,
    pub polling_timeout: Duration,
    pub database_username: String,
    pub database_password: String,
    pub workload_executor: PathBuf,
    /// Directory holding `results.json`/`events.json` for the active workload.
    pub workdir: PathBuf,
    pub timings: RunTimings,
}

impl TestCaseConfiguration {
    /// Poller for cluster state convergence.
    pub fn poller(&self) -> Poller {
        Poller::with_frequency(self.polling_frequency, self.polling_timeout)
    }
}

#[cfg(test)]
pub(crate) fn env_test_lock() -> std::sync::MutexGuard<'static, ()> {
    use std::sync::{Mutex, OnceLock};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
