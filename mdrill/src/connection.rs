//! Driver connection strings for test clusters.

use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConnectionStringError {
    #[error("cluster address {0:?} has no scheme separator")]
    MissingScheme(String),

    #[error("URI option {key:?} has unsupported value {value}")]
    UnsupportedOption { key: String, value: String },
}

/// Build the connection string handed to the workload executor.
///
/// Credentials are spliced in after the scheme of `srv_address` and the
/// spec's URI options become the query string. Booleans are rendered in
/// lowercase.
pub fn build_connection_string(
    srv_address: &str,
    username: &str,
    password: &str,
    uri_options: &Map<String, Value>,
) -> Result<String, ConnectionStringError> {
    let (scheme, host) = srv_address
        .split_once("//")
        .ok_or_else(|| ConnectionStringError::MissingScheme(srv_address.to_string()))?;

    let mut query = Vec::with_capacity(uri_options.len());
    for (key, value) in uri_options {
        let rendered = match value {
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => n.to_string(),
            Value::String(s) => s.clone(),
            other => {
                return Err(ConnectionStringError::UnsupportedOption {
                    key: key.clone(),
                    value: other.to_string(),
                });
            }
        };
        query.push(format!(
            "{}={}",
            urlencoding::encode(key),
            urlencoding::encode(&rendered)
        ));
    }

    Ok(format!(
        "{scheme}//{}:{}@{}/?{}",
        urlencoding::encode(username),
        urlencoding::encode(password),
        host.trim_end_matches('/'),
        query.join("&")
    ))
}
