//! Blocking Atlas API client.
//!
//! Requests are authenticated with HTTP digest. The first request of a client
//! is sent bare; the `WWW-Authenticate` challenge from the 401 answer is kept
//! and reused (with an increasing nonce count) for every later request until
//! the server asks for a fresh one.

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use digest_auth::{AuthContext, HttpMethod, WwwAuthenticateHeader};
use serde_json::Value;
use tracing::{debug, trace};
use ureq::http::Response;
use ureq::{Agent, Body, RequestBuilder};

use crate::error::{AtlasError, Method};

pub const DEFAULT_BASE_URL: &str = "https://cloud.mongodb.com/api/atlas";
pub const DEFAULT_API_VERSION: &str = "v1.0";
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtlasClientConfig {
    pub base_url: String,
    pub api_version: String,
    pub username: String,
    pub password: String,
    pub timeout: Duration,
}

impl AtlasClientConfig {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            username: username.into(),
            password: password.into(),
            timeout: DEFAULT_HTTP_TIMEOUT,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

pub struct AtlasClient {
    agent: Agent,
    config: AtlasClientConfig,
    challenge: Mutex<Option<WwwAuthenticateHeader>>,
}

impl std::fmt::Debug for AtlasClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AtlasClient")
            .field("base_url", &self.config.base_url)
            .field("api_version", &self.config.api_version)
            .field("username", &self.config.username)
            .finish_non_exhaustive()
    }
}

impl AtlasClient {
    pub fn new(config: AtlasClientConfig) -> Self {
        let agent_config = Agent::config_builder()
            .timeout_global(Some(config.timeout))
            .http_status_as_error(false)
            .build();
        Self {
            agent: Agent::new_with_config(agent_config),
            config,
            challenge: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &AtlasClientConfig {
        &self.config
    }

    /// Resolve an API path to a full URL.
    ///
    /// - absolute `http(s)://` URLs are used as-is
    /// - paths starting with `/` are relative to the host root (private admin API)
    /// - anything else lands under `{base_url}/{api_version}/`
    pub fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        if path.starts_with('/') {
            return format!("{}{}", host_root(&self.config.base_url), path);
        }
        format!(
            "{}/{}/{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.api_version,
            path
        )
    }

    pub fn get(&self, path: &str) -> Result<Value, AtlasError> {
        self.request(Method::Get, path, None)
    }

    pub fn post(&self, path: &str, body: &Value) -> Result<Value, AtlasError> {
        self.request(Method::Post, path, Some(body))
    }

    pub fn patch(&self, path: &str, body: &Value) -> Result<Value, AtlasError> {
        self.request(Method::Patch, path, Some(body))
    }

    pub fn delete(&self, path: &str) -> Result<Value, AtlasError> {
        self.request(Method::Delete, path, None)
    }

    /// Issue a request and decode the JSON answer.
    ///
    /// 200, 201 and 202 are successes (an empty body decodes to `null`); 429
    /// and 401 map to their own variants; everything else is an `Api` error
    /// carrying the body's `errorCode` and `detail`.
    pub fn request(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Value, AtlasError> {
        let url = self.url_for(path);
        let payload = body.map(Value::to_string);
        debug!("Request ({} {} {:?})", method, url, payload);

        let response = self.send_authenticated(method, &url, payload.as_deref())?;
        let status = response.status().as_u16();
        let text = read_body(response, method, &url)?;
        trace!("Response ({} {}) {}: {}", method, url, status, text);
        decode_response(method, &url, status, &text)
    }

    /// Stream a binary resource (e.g. a log archive) to `dest`.
    pub fn download(&self, path: &str, dest: &Path) -> Result<u64, AtlasError> {
        let url = self.url_for(path);
        debug!("Downloading {} to {}", url, dest.display());
        let response = self.send_authenticated(Method::Get, &url, None)?;
        let status = response.status().as_u16();
        if status != 200 {
            let text = read_body(response, Method::Get, &url)?;
            return Err(decode_response(Method::Get, &url, status, &text)
                .err()
                .unwrap_or_else(|| {
                    AtlasError::UnexpectedResponse(format!("download of {url} returned {status}"))
                }));
        }

        let io_err = |source| AtlasError::Io {
            path: dest.to_path_buf(),
            source,
        };
        let mut file = std::fs::File::create(dest).map_err(io_err)?;
        let mut reader = response.into_body().into_reader();
        std::io::copy(&mut reader, &mut file).map_err(io_err)
    }

    fn send_authenticated(
        &self,
        method: Method,
        url: &str,
        payload: Option<&str>,
    ) -> Result<Response<Body>, AtlasError> {
        let target = request_target(url);
        let cached = {
            let mut challenge = self.challenge.lock().unwrap_or_else(|p| p.into_inner());
            match challenge.as_mut() {
                Some(prompt) => Some(self.respond(prompt, method, target, payload)?),
                None => None,
            }
        };

        let response = self.send(method, url, payload, cached.as_deref())?;
        if response.status().as_u16() != 401 {
            return Ok(response);
        }
        let Some(header) = response
            .headers()
            .get("www-authenticate")
            .and_then(|value| value.to_str().ok())
        else {
            return Ok(response);
        };

        debug!("Answering digest challenge for {} {}", method, url);
        let mut prompt = digest_auth::parse(header).map_err(|e| AtlasError::Digest(e.to_string()))?;
        let authorization = self.respond(&mut prompt, method, target, payload)?;
        *self.challenge.lock().unwrap_or_else(|p| p.into_inner()) = Some(prompt);
        self.send(method, url, payload, Some(&authorization))
    }

    fn respond(
        &self,
        prompt: &mut WwwAuthenticateHeader,
        method: Method,
        target: &str,
        payload: Option<&str>,
    ) -> Result<String, AtlasError> {
        let context = AuthContext::new_with_method(
            self.config.username.as_str(),
            self.config.password.as_str(),
            target,
            Some(payload.unwrap_or_default().as_bytes()),
            HttpMethod::from(method.as_str()),
        );
        prompt
            .respond(&context)
            .map(|answer| answer.to_header_string())
            .map_err(|e| AtlasError::Digest(e.to_string()))
    }

    fn send(
        &self,
        method: Method,
        url: &str,
        payload: Option<&str>,
        authorization: Option<&str>,
    ) -> Result<Response<Body>, AtlasError> {
        let result = match method {
            Method::Get => decorate(self.agent.get(url), authorization).call(),
            Method::Delete => decorate(self.agent.delete(url), authorization).call(),
            Method::Post => decorate(self.agent.post(url), authorization)
                .header("Content-Type", "application/json")
                .send(payload.unwrap_or_default()),
            Method::Patch => decorate(self.agent.patch(url), authorization)
                .header("Content-Type", "application/json")
                .send(payload.unwrap_or_default()),
        };
        result.map_err(|source| AtlasError::Transport {
            method,
            url: url.to_string(),
            source,
        })
    }
}

fn decorate<B>(builder: RequestBuilder<B>, authorization: Option<&str>) -> RequestBuilder<B> {
    let builder = builder.header("Accept", "application/json");
    match authorization {
        Some(value) => builder.header("Authorization", value),
        None => builder,
    }
}

fn read_body(response: Response<Body>, method: Method, url: &str) -> Result<String, AtlasError> {
    response
        .into_body()
        .read_to_string()
        .map_err(|source| AtlasError::Transport {
            method,
            url: url.to_string(),
            source,
        })
}

fn decode_response(method: Method, url: &str, status: u16, text: &str) -> Result<Value, AtlasError> {
    let parsed = || -> Result<Value, serde_json::Error> {
        if text.trim().is_empty() {
            Ok(Value::Null)
        } else {
            serde_json::from_str(text)
        }
    };

    match status {
        200..=202 => parsed().map_err(|source| AtlasError::Decode {
            method,
            url: url.to_string(),
            source,
        }),
        429 => Err(AtlasError::RateLimited {
            detail: parsed().ok().as_ref().and_then(|body| string_field(body, "detail")),
            method,
            url: url.to_string(),
        }),
        401 => Err(AtlasError::Authentication {
            method,
            url: url.to_string(),
        }),
        _ => {
            let body = parsed().unwrap_or(Value::Null);
            Err(AtlasError::Api {
                status,
                error_code: string_field(&body, "errorCode"),
                detail: string_field(&body, "detail"),
                method,
                url: url.to_string(),
            })
        }
    }
}

fn string_field(body: &Value, key: &str) -> Option<String> {
    body.get(key).and_then(Value::as_str).map(str::to_string)
}

/// `scheme://host[:port]` part of a URL.
fn host_root(url: &str) -> &str {
    let Some(scheme_end) = url.find("://") else {
        return url.trim_end_matches('/');
    };
    let authority_start = scheme_end + 3;
    match url[authority_start..].find('/') {
        Some(offset) => &url[..authority_start + offset],
        None => url,
    }
}

/// Path and query of a URL, as used in the digest `uri` field.
fn request_target(url: &str) -> &str {
    let root = host_root(url);
    match &url[root.len()..] {
        "" => "/",
        target => target,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base: &str) -> AtlasClient {
        AtlasClient::new(AtlasClientConfig::new("user", "key").with_base_url(base))
    }

    #[test]
    fn url_for_versioned_paths() {
        let client = client("https://cloud.mongodb.com/api/atlas/");
        assert_eq!(
            client.url_for("groups/abc/clusters"),
            "https://cloud.mongodb.com/api/atlas/v1.0/groups/abc/clusters"
        );
    }

    #[test]
    fn url_for_host_root_paths() {
        let client = client("https://cloud.mongodb.com/api/atlas");
        assert_eq!(
            client.url_for("/api/private/nds/groups/abc/clusters/def/reboot"),
            "https://cloud.mongodb.com/api/private/nds/groups/abc/clusters/def/reboot"
        );
    }

    #[test]
    fn url_for_absolute_urls() {
        let client = client("https://cloud.mongodb.com/api/atlas");
        assert_eq!(client.url_for("http://127.0.0.1:9/x"), "http://127.0.0.1:9/x");
    }

    #[test]
    fn host_root_and_target() {
        assert_eq!(host_root("http://127.0.0.1:8080/api/atlas"), "http://127.0.0.1:8080");
        assert_eq!(host_root("http://127.0.0.1:8080"), "http://127.0.0.1:8080");
        assert_eq!(request_target("http://h/api/atlas/v1.0/orgs?name=a"), "/api/atlas/v1.0/orgs?name=a");
        assert_eq!(request_target("http://h"), "/");
    }

    #[test]
    fn decode_success_and_empty_body() {
        let value = decode_response(Method::Get, "u", 200, r#"{"stateName":"IDLE"}"#).unwrap();
        assert_eq!(value["stateName"], "IDLE");
        assert_eq!(decode_response(Method::Delete, "u", 202, "").unwrap(), Value::Null);
    }

    #[test]
    fn decode_error_body() {
        let err = decode_response(
            Method::Post,
            "u",
            400,
            r#"{"errorCode":"CLUSTER_RESTART_INVALID","detail":"busy"}"#,
        )
        .unwrap_err();
        assert!(err.is_code("CLUSTER_RESTART_INVALID"));
        assert!(err.to_string().contains("busy"));
    }

    #[test]
    fn decode_rate_limit_and_auth() {
        assert!(matches!(
            decode_response(Method::Get, "u", 429, r#"{"detail":"slow down"}"#),
            Err(AtlasError::RateLimited { detail: Some(ref d), .. }) if d == "slow down"
        ));
        assert!(matches!(
            decode_response(Method::Get, "u", 401, ""),
            Err(AtlasError::Authentication { .. })
        ));
    }

    #[test]
    fn decode_non_json_error_body() {
        let err = decode_response(Method::Get, "u", 503, "<html>down</html>").unwrap_err();
        assert_eq!(err.status(), Some(503));
        assert_eq!(err.error_code(), None);
    }
}
