//! AtlasClient against a scripted local HTTP server.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use mdrill_atlas::{
    AtlasClient, AtlasClientConfig, AtlasCluster, AtlasError, ClusterResource, codes,
    ensure_project,
};
use serde_json::json;

#[derive(Debug, Clone)]
struct Recorded {
    method: String,
    target: String,
    authorization: Option<String>,
    body: String,
}

type Handler = dyn Fn(&Recorded) -> (u16, Vec<(String, String)>, String) + Send + Sync;

struct FakeAtlas {
    base_url: String,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

impl FakeAtlas {
    fn start(handler: Box<Handler>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&requests);

        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                let request = read_request(&stream);
                recorded.lock().unwrap().push(request.clone());
                let (status, headers, body) = handler(&request);
                write_response(stream, status, &headers, &body);
            }
        });

        Self {
            base_url: format!("http://{addr}/api/atlas"),
            requests,
        }
    }

    fn client(&self) -> AtlasClient {
        AtlasClient::new(
            AtlasClientConfig::new("public-key", "private-key")
                .with_base_url(&self.base_url)
                .with_timeout(Duration::from_secs(5)),
        )
    }

    fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }
}

fn read_request(stream: &TcpStream) -> Recorded {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader.read_line(&mut line).unwrap();
    let mut parts = line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let target = parts.next().unwrap_or_default().to_string();

    let mut content_length = 0usize;
    let mut authorization = None;
    loop {
        let mut header = String::new();
        reader.read_line(&mut header).unwrap();
        let header = header.trim_end();
        if header.is_empty() {
            break;
        }
        if let Some((name, value)) = header.split_once(':') {
            match name.trim().to_ascii_lowercase().as_str() {
                "content-length" => content_length = value.trim().parse().unwrap_or(0),
                "authorization" => authorization = Some(value.trim().to_string()),
                _ => {}
            }
        }
    }
    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body).unwrap();

    Recorded {
        method,
        target,
        authorization,
        body: String::from_utf8_lossy(&body).into_owned(),
    }
}

fn write_response(mut stream: TcpStream, status: u16, headers: &[(String, String)], body: &str) {
    let mut response = format!(
        "HTTP/1.1 {status} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n",
        body.len()
    );
    for (name, value) in headers {
        response.push_str(&format!("{name}: {value}\r\n"));
    }
    response.push_str("\r\n");
    response.push_str(body);
    let _ = stream.write_all(response.as_bytes());
}

fn challenge() -> Vec<(String, String)> {
    vec![(
        "WWW-Authenticate".to_string(),
        r#"Digest realm="MMS Public API", domain="", nonce="n0nce", algorithm=MD5, qop="auth", stale=false"#
            .to_string(),
    )]
}

/// Answers 401 with a digest challenge unless the request is authorized.
fn digest_gate(
    inner: impl Fn(&Recorded) -> (u16, String) + Send + Sync + 'static,
) -> Box<Handler> {
    Box::new(move |request: &Recorded| match &request.authorization {
        Some(auth) if auth.starts_with("Digest ") && auth.contains(r#"username="public-key""#) => {
            let (status, body) = inner(request);
            (status, Vec::new(), body)
        }
        _ => (401, challenge(), String::new()),
    })
}

#[test]
fn digest_challenge_is_answered_and_reused() {
    let server = FakeAtlas::start(digest_gate(|_| (200, r#"{"stateName":"IDLE"}"#.to_string())));
    let client = server.client();

    let first = client.get("groups/p/clusters/c").unwrap();
    assert_eq!(first["stateName"], "IDLE");
    let second = client.get("groups/p/clusters/c").unwrap();
    assert_eq!(second["stateName"], "IDLE");

    let requests = server.requests();
    // bare request, answered challenge, then one pre-authorized request
    assert_eq!(requests.len(), 3);
    assert!(requests[0].authorization.is_none());
    assert!(requests[1].authorization.as_deref().unwrap().contains("nc=00000001"));
    assert!(requests[2].authorization.as_deref().unwrap().contains("nc=00000002"));
    assert_eq!(requests[2].target, "/api/atlas/v1.0/groups/p/clusters/c");
}

#[test]
fn error_codes_are_surfaced() {
    let server = FakeAtlas::start(digest_gate(|_| {
        (
            400,
            json!({"errorCode": codes::CLUSTER_RESTART_INVALID, "detail": "busy", "error": 400}).to_string(),
        )
    }));
    let client = Arc::new(server.client());
    let cluster = AtlasCluster::new(client, "p", "c");

    let err = cluster.restart_primaries().unwrap_err();
    assert!(err.is_code(codes::CLUSTER_RESTART_INVALID));
    assert_eq!(err.status(), Some(400));

    let requests = server.requests();
    let last = requests.last().unwrap();
    assert_eq!(last.method, "POST");
    assert_eq!(last.target, "/api/atlas/v1.0/groups/p/clusters/c/restartPrimaries");
}

#[test]
fn rate_limit_is_typed() {
    let server = FakeAtlas::start(digest_gate(|_| (429, r#"{"detail":"Too many requests"}"#.to_string())));
    let err = server.client().get("groups").unwrap_err();
    assert!(matches!(err, AtlasError::RateLimited { .. }));
}

#[test]
fn bad_credentials_are_an_authentication_error() {
    // Never accepts any answer.
    let server = FakeAtlas::start(Box::new(|_: &Recorded| (401, challenge(), String::new())));
    let err = server.client().get("groups").unwrap_err();
    assert!(matches!(err, AtlasError::Authentication { .. }));
    assert_eq!(server.requests().len(), 2);
}

#[test]
fn ensure_project_falls_back_to_lookup() {
    let server = FakeAtlas::start(digest_gate(|request| match request.method.as_str() {
        "POST" => (409, json!({"errorCode": codes::GROUP_ALREADY_EXISTS}).to_string()),
        _ => (200, json!({"id": "proj-1", "name": "drivers"}).to_string()),
    }));
    let client = server.client();

    let project = ensure_project(&client, "drivers", "org-1").unwrap();
    assert_eq!(project["id"], "proj-1");

    let requests = server.requests();
    let post = requests.iter().find(|r| r.method == "POST" && r.authorization.is_some()).unwrap();
    let body: serde_json::Value = serde_json::from_str(&post.body).unwrap();
    assert_eq!(body, json!({"name": "drivers", "orgId": "org-1"}));
    assert_eq!(
        requests.last().unwrap().target,
        "/api/atlas/v1.0/groups/byName/drivers"
    );
}

#[test]
fn patch_sends_json_body() {
    let server = FakeAtlas::start(digest_gate(|_| (200, "{}".to_string())));
    let cluster = AtlasCluster::new(Arc::new(server.client()), "p", "c");
    let mut config = serde_json::Map::new();
    config.insert("providerSettings".to_string(), json!({"instanceSizeName": "M20"}));

    cluster.patch(&config).unwrap();

    let requests = server.requests();
    let last = requests.last().unwrap();
    assert_eq!(last.method, "PATCH");
    let body: serde_json::Value = serde_json::from_str(&last.body).unwrap();
    assert_eq!(body["providerSettings"]["instanceSizeName"], "M20");
}
