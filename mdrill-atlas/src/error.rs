//! Typed errors for the Atlas control plane.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Machine-readable `errorCode` values the orchestrator reacts to.
pub mod codes {
    pub const DUPLICATE_CLUSTER_NAME: &str = "DUPLICATE_CLUSTER_NAME";
    pub const GROUP_ALREADY_EXISTS: &str = "GROUP_ALREADY_EXISTS";
    pub const USER_ALREADY_EXISTS: &str = "USER_ALREADY_EXISTS";
    pub const CLUSTER_RESTART_INVALID: &str = "CLUSTER_RESTART_INVALID";
    pub const MULTIPLE_GROUPS: &str = "MULTIPLE_GROUPS";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum AtlasError {
    /// Non-success response carrying the API's error body.
    #[error("{status}: {}{} ({method} {url})", reason(*status), code_suffix(error_code.as_deref(), detail.as_deref()))]
    Api {
        status: u16,
        error_code: Option<String>,
        detail: Option<String>,
        method: Method,
        url: String,
    },

    #[error("429: Rate limit exceeded ({method} {url})")]
    RateLimited {
        detail: Option<String>,
        method: Method,
        url: String,
    },

    #[error("401: Unauthorized ({method} {url})")]
    Authentication { method: Method, url: String },

    #[error("request failed ({method} {url}): {source}")]
    Transport {
        method: Method,
        url: String,
        #[source]
        source: ureq::Error,
    },

    #[error("invalid response body ({method} {url}): {source}")]
    Decode {
        method: Method,
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("digest challenge rejected: {0}")]
    Digest(String),

    #[error("{what} not found: {name}")]
    NotFound { what: &'static str, name: String },

    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("cluster {0:?} cannot be renamed by a patch")]
    NameInPatch(String),

    #[error("admin API credentials are required to {0}")]
    AdminCredentialsRequired(&'static str),

    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl AtlasError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::RateLimited { .. } => Some(429),
            Self::Authentication { .. } => Some(401),
            _ => None,
        }
    }

    pub fn error_code(&self) -> Option<&str> {
        match self {
            Self::Api { error_code, .. } => error_code.as_deref(),
            _ => None,
        }
    }

    /// True when the API answered with the given `errorCode`.
    pub fn is_code(&self, code: &str) -> bool {
        self.error_code() == Some(code)
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        409 => "Conflict",
        _ => "Unknown",
    }
}

fn code_suffix(code: Option<&str>, detail: Option<&str>) -> String {
    match (code, detail) {
        (Some(code), Some(detail)) => format!(". Error Code: {code:?}: {detail}"),
        (Some(code), None) => format!(". Error Code: {code:?}"),
        (None, Some(detail)) => format!(": {detail}"),
        (None, None) => ".".to_string(),
    }
}
