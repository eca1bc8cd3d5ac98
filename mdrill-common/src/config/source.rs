//! Tracking where a configuration value came from.

use std::fmt;
use std::path::PathBuf;

/// Origin of a configuration value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Built-in default.
    Default,
    /// Loaded from a timings file.
    File(PathBuf),
    /// Read from the named environment variable.
    Environment(String),
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => write!(f, "default"),
            Self::File(path) => write!(f, "file {}", path.display()),
            Self::Environment(var) => write!(f, "env {var}"),
        }
    }
}

/// A value paired with its origin.
#[derive(Debug, Clone, PartialEq)]
pub struct Sourced<T> {
    pub value: T,
    pub source: ConfigSource,
}

impl<T> Sourced<T> {
    pub fn new(value: T, source: ConfigSource) -> Self {
        Self { value, source }
    }

    pub fn default_value(value: T) -> Self {
        Self::new(value, ConfigSource::Default)
    }

    pub fn from_env(value: T, var: impl Into<String>) -> Self {
        Self::new(value, ConfigSource::Environment(var.into()))
    }

    pub fn from_file(value: T, path: impl Into<PathBuf>) -> Self {
        Self::new(value, ConfigSource::File(path.into()))
    }

    pub fn is_default(&self) -> bool {
        self.source == ConfigSource::Default
    }
}
