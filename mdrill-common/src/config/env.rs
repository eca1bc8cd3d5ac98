//! Environment variable parsing with type safety.
//!
//! Invalid values are collected rather than returned one at a time, so a
//! misconfigured run reports every bad variable at once.

use super::source::Sourced;
use std::env;
use thiserror::Error;

/// Prefix shared by every mdrill environment variable.
pub const ENV_PREFIX: &str = "MDRILL_";

/// Errors that can occur during environment variable parsing.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EnvError {
    #[error("Invalid value for {var}: expected {expected}, got '{value}'")]
    InvalidValue {
        var: String,
        expected: String,
        value: String,
    },

    #[error("Value out of range for {var}: {value} (valid: {min}..={max})")]
    OutOfRange {
        var: String,
        value: String,
        min: String,
        max: String,
    },

    #[error("Invalid log level for {var}: {value}")]
    InvalidLogLevel { var: String, value: String },
}

/// Type-safe environment variable parser.
pub struct EnvParser {
    prefix: &'static str,
    errors: Vec<EnvError>,
}

impl EnvParser {
    pub fn new() -> Self {
        Self::with_prefix(ENV_PREFIX)
    }

    pub fn with_prefix(prefix: &'static str) -> Self {
        Self {
            prefix,
            errors: Vec::new(),
        }
    }

    pub fn errors(&self) -> &[EnvError] {
        &self.errors
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn take_errors(&mut self) -> Vec<EnvError> {
        std::mem::take(&mut self.errors)
    }

    /// Full variable name with prefix.
    pub fn var_name(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    pub fn get_string(&mut self, name: &str, default: &str) -> Sourced<String> {
        let var_name = self.var_name(name);
        match env::var(&var_name) {
            Ok(value) => Sourced::from_env(value, var_name),
            Err(_) => Sourced::default_value(default.to_string()),
        }
    }

    /// Get a boolean value with default.
    ///
    /// Accepts: 1, true, yes, on (for true)
    ///          0, false, no, off, "" (for false)
    pub fn get_bool(&mut self, name: &str, default: bool) -> Sourced<bool> {
        let var_name = self.var_name(name);
        match env::var(&var_name) {
            Ok(value) => {
                let parsed = match value.to_lowercase().as_str() {
                    "1" | "true" | "yes" | "on" => true,
                    "0" | "false" | "no" | "off" | "" => false,
                    _ => {
                        self.errors.push(EnvError::InvalidValue {
                            var: var_name.clone(),
                            expected: "boolean (true/false/1/0/yes/no)".to_string(),
                            value: value.clone(),
                        });
                        default
                    }
                };
                Sourced::from_env(parsed, var_name)
            }
            Err(_) => Sourced::default_value(default),
        }
    }

    pub fn get_u64_range(&mut self, name: &str, default: u64, min: u64, max: u64) -> Sourced<u64> {
        let var_name = self.var_name(name);
        match env::var(&var_name) {
            Ok(value) => match value.trim().parse::<u64>() {
                Ok(n) if n >= min && n <= max => Sourced::from_env(n, var_name),
                Ok(n) => {
                    self.errors.push(EnvError::OutOfRange {
                        var: var_name.clone(),
                        value: n.to_string(),
                        min: min.to_string(),
                        max: max.to_string(),
                    });
                    Sourced::from_env(default, var_name)
                }
                Err(_) => {
                    self.errors.push(EnvError::InvalidValue {
                        var: var_name.clone(),
                        expected: "unsigned 64-bit integer".to_string(),
                        value,
                    });
                    Sourced::default_value(default)
                }
            },
            Err(_) => Sourced::default_value(default),
        }
    }

    /// Get a f64 value with default and range validation.
    ///
    /// NaN never satisfies the range check and is reported as out of range.
    pub fn get_f64_range(&mut self, name: &str, default: f64, min: f64, max: f64) -> Sourced<f64> {
        let var_name = self.var_name(name);
        match env::var(&var_name) {
            Ok(value) => match value.trim().parse::<f64>() {
                Ok(n) if n >= min && n <= max => Sourced::from_env(n, var_name),
                Ok(n) => {
                    self.errors.push(EnvError::OutOfRange {
                        var: var_name.clone(),
                        value: n.to_string(),
                        min: min.to_string(),
                        max: max.to_string(),
                    });
                    Sourced::from_env(default, var_name)
                }
                Err(_) => {
                    self.errors.push(EnvError::InvalidValue {
                        var: var_name.clone(),
                        expected: "floating-point number".to_string(),
                        value,
                    });
                    Sourced::default_value(default)
                }
            },
            Err(_) => Sourced::default_value(default),
        }
    }

    /// Get a log filter directive.
    ///
    /// Plain level names are lowercased. Anything containing `=` or `,` is
    /// passed through as an `EnvFilter` directive string.
    pub fn get_log_level(&mut self, name: &str, default: &str) -> Sourced<String> {
        let var_name = self.var_name(name);
        match env::var(&var_name) {
            Ok(value) if value.contains('=') || value.contains(',') => {
                Sourced::from_env(value, var_name)
            }
            Ok(value) => {
                let lower = value.trim().to_lowercase();
                match lower.as_str() {
                    "trace" | "debug" | "info" | "warn" | "error" | "off" => {
                        Sourced::from_env(lower, var_name)
                    }
                    _ => {
                        self.errors.push(EnvError::InvalidLogLevel {
                            var: var_name.clone(),
                            value: value.clone(),
                        });
                        Sourced::from_env(default.to_string(), var_name)
                    }
                }
            }
            Err(_) => Sourced::default_value(default.to_string()),
        }
    }

    /// Get an optional string (None if not set or empty).
    pub fn get_optional_string(&mut self, name: &str) -> Sourced<Option<String>> {
        let var_name = self.var_name(name);
        match env::var(&var_name) {
            Ok(value) if value.is_empty() => Sourced::from_env(None, var_name),
            Ok(value) => Sourced::from_env(Some(value), var_name),
            Err(_) => Sourced::default_value(None),
        }
    }
}

impl Default for EnvParser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(unsafe_code)]
mod tests {
    use super::*;
    use crate::config::ConfigSource;
    use crate::config::env_test_lock;

    fn cleanup_env(vars: &[&str]) {
        for var in vars {
            // SAFETY: Tests are serialized via env_test_lock
            unsafe { env::remove_var(var) };
        }
    }

    fn set_env(key: &str, value: &str) {
        // SAFETY: Tests are serialized via env_test_lock
        unsafe { env::set_var(key, value) };
    }

    #[test]
    fn test_get_bool_true_values() {
        let _guard = env_test_lock();
        let vars = ["MDRILL_TEST_BOOL_TRUE"];
        cleanup_env(&vars);

        for val in &["1", "true", "yes", "on", "TRUE", "Yes"] {
            set_env("MDRILL_TEST_BOOL_TRUE", val);
            let mut parser = EnvParser::new();
            let result = parser.get_bool("TEST_BOOL_TRUE", false);
            assert!(result.value, "Expected true for '{}'", val);
            assert!(!parser.has_errors());
        }

        cleanup_env(&vars);
    }

    #[test]
    fn test_get_bool_invalid_uses_default() {
        let _guard = env_test_lock();
        let vars = ["MDRILL_BAD_BOOL"];
        cleanup_env(&vars);

        set_env("MDRILL_BAD_BOOL", "maybe");
        let mut parser = EnvParser::new();
        let result = parser.get_bool("BAD_BOOL", false);
        assert!(!result.value);
        assert!(parser.has_errors());

        cleanup_env(&vars);
    }

    #[test]
    fn test_get_f64_range_valid() {
        let _guard = env_test_lock();
        let vars = ["MDRILL_TEST_F64"];
        cleanup_env(&vars);

        set_env("MDRILL_TEST_F64", "2.5");
        let mut parser = EnvParser::new();
        let result = parser.get_f64_range("TEST_F64", 1.0, 0.0, 10.0);
        assert_eq!(result.value, 2.5);
        assert_eq!(
            result.source,
            ConfigSource::Environment("MDRILL_TEST_F64".to_string())
        );
        assert!(!parser.has_errors());

        cleanup_env(&vars);
    }

    #[test]
    fn test_get_f64_range_rejects_negative_and_garbage() {
        let _guard = env_test_lock();
        let vars = ["MDRILL_TEST_F64_NEG", "MDRILL_TEST_F64_BAD"];
        cleanup_env(&vars);

        set_env("MDRILL_TEST_F64_NEG", "-1");
        set_env("MDRILL_TEST_F64_BAD", "soon");
        let mut parser = EnvParser::new();
        assert_eq!(parser.get_f64_range("TEST_F64_NEG", 3.0, 0.0, 10.0).value, 3.0);
        assert_eq!(parser.get_f64_range("TEST_F64_BAD", 4.0, 0.0, 10.0).value, 4.0);

        let errors = parser.take_errors();
        assert_eq!(errors.len(), 2);
        assert!(matches!(errors[0], EnvError::OutOfRange { .. }));
        assert!(matches!(errors[1], EnvError::InvalidValue { .. }));
        assert!(!parser.has_errors());

        cleanup_env(&vars);
    }

    #[test]
    fn test_get_u64_range_out_of_range() {
        let _guard = env_test_lock();
        let vars = ["MDRILL_TEST_U64_OOR"];
        cleanup_env(&vars);

        set_env("MDRILL_TEST_U64_OOR", "200");
        let mut parser = EnvParser::new();
        let result = parser.get_u64_range("TEST_U64_OOR", 10, 0, 100);
        assert_eq!(result.value, 10);
        assert!(parser.has_errors());

        cleanup_env(&vars);
    }

    #[test]
    fn test_get_log_level_passes_directives_through() {
        let _guard = env_test_lock();
        let vars = ["MDRILL_TEST_LOG"];
        cleanup_env(&vars);

        set_env("MDRILL_TEST_LOG", "mdrill=debug,ureq=warn");
        let mut parser = EnvParser::new();
        assert_eq!(
            parser.get_log_level("TEST_LOG", "info").value,
            "mdrill=debug,ureq=warn"
        );

        set_env("MDRILL_TEST_LOG", "LOUD");
        let result = parser.get_log_level("TEST_LOG", "info");
        assert_eq!(result.value, "info");
        assert!(parser.has_errors());

        cleanup_env(&vars);
    }

    #[test]
    fn test_unset_values_are_defaults() {
        let _guard = env_test_lock();
        let vars = ["MDRILL_TEST_UNSET"];
        cleanup_env(&vars);

        let mut parser = EnvParser::new();
        assert!(parser.get_string("TEST_UNSET", "x").is_default());
        assert_eq!(parser.get_optional_string("TEST_UNSET").value, None);
    }
}
