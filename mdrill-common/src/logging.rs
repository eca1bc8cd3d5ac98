//! Logging setup shared by the mdrill binaries.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

use crate::config::EnvParser;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl LogFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "pretty" | "text" => Some(Self::Pretty),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Where and how to log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// `EnvFilter` directive, e.g. `info` or `mdrill=debug,ureq=warn`.
    pub level: String,
    pub format: LogFormat,
    /// Optional file receiving a plain-text copy of every event.
    pub file: Option<PathBuf>,
    pub stderr: bool,
}

impl LogConfig {
    /// Read `MDRILL_LOG`, `MDRILL_LOG_FORMAT` and `MDRILL_LOG_FILE`.
    ///
    /// Invalid values fall back to the defaults; logging is not up yet, so
    /// the problems are printed to stderr.
    pub fn from_env(default_level: &str) -> Self {
        let mut parser = EnvParser::new();
        let level = parser.get_log_level("LOG", default_level).value;
        let format_raw = parser.get_string("LOG_FORMAT", "pretty").value;
        let file = parser.get_optional_string("LOG_FILE").value.map(PathBuf::from);

        for error in parser.take_errors() {
            eprintln!("mdrill: {error}");
        }
        let format = LogFormat::parse(&format_raw).unwrap_or_else(|| {
            eprintln!("mdrill: unknown MDRILL_LOG_FORMAT '{format_raw}', using pretty");
            LogFormat::Pretty
        });

        Self {
            level,
            format,
            file,
            stderr: false,
        }
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    /// Send console output to stderr (stdout stays free for command output).
    pub fn with_stderr(mut self) -> Self {
        self.stderr = true;
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.file = Some(file.into());
        self
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            file: None,
            stderr: false,
        }
    }
}

/// Keeps the non-blocking file writer flushing until dropped.
#[must_use = "dropping the guards stops file logging"]
pub struct LoggingGuards {
    _file: Option<WorkerGuard>,
}

/// Install the global subscriber described by `config`.
pub fn init_logging(config: &LogConfig) -> Result<LoggingGuards> {
    let filter = EnvFilter::try_new(&config.level)
        .with_context(|| format!("invalid log filter '{}'", config.level))?;

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    let console = match (config.format, config.stderr) {
        (LogFormat::Pretty, true) => fmt::layer().with_writer(std::io::stderr).boxed(),
        (LogFormat::Pretty, false) => fmt::layer().boxed(),
        (LogFormat::Json, true) => fmt::layer().json().with_writer(std::io::stderr).boxed(),
        (LogFormat::Json, false) => fmt::layer().json().boxed(),
    };
    layers.push(console);

    let mut file_guard = None;
    if let Some(path) = &config.file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open log file {}", path.display()))?;
        let (writer, guard) = tracing_appender::non_blocking(file);
        layers.push(fmt::layer().with_ansi(false).with_writer(writer).boxed());
        file_guard = Some(guard);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .context("failed to install tracing subscriber")?;

    Ok(LoggingGuards { _file: file_guard })
}

#[cfg(test)]
#[allow(unsafe_code)]
mod tests {
    use super::*;
    use crate::config::env_test_lock;
    use std::env;

    #[test]
    fn format_parsing() {
        assert_eq!(LogFormat::parse("JSON"), Some(LogFormat::Json));
        assert_eq!(LogFormat::parse("pretty"), Some(LogFormat::Pretty));
        assert_eq!(LogFormat::parse("xml"), None);
    }

    #[test]
    fn from_env_reads_all_variables() {
        let _guard = env_test_lock();
        // SAFETY: Tests are serialized via env_test_lock
        unsafe {
            env::set_var("MDRILL_LOG", "debug");
            env::set_var("MDRILL_LOG_FORMAT", "json");
            env::set_var("MDRILL_LOG_FILE", "/tmp/mdrill.log");
        }
        let config = LogConfig::from_env("info");
        unsafe {
            env::remove_var("MDRILL_LOG");
            env::remove_var("MDRILL_LOG_FORMAT");
            env::remove_var("MDRILL_LOG_FILE");
        }

        assert_eq!(config.level, "debug");
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.file, Some(PathBuf::from("/tmp/mdrill.log")));
        assert!(!config.stderr);
    }

    #[test]
    fn builders_override_env() {
        let _guard = env_test_lock();
        let config = LogConfig::from_env("warn").with_level("trace").with_stderr();
        assert_eq!(config.level, "trace");
        assert!(config.stderr);
    }
}
