#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use es_bulk_writer::{ConnectionConfig, EsClient, RetryPolicy};

pub const CLUSTER_NAME: &str = "cmc-qa-es";

pub fn server_info(version: &str) -> Value {
    json!({
        "name": "node-1",
        "cluster_name": CLUSTER_NAME,
        "cluster_uuid": "k1bJkHtqQIS3l3A1hBtzhw",
        "version": { "number": version, "lucene_version": "9.8.0" },
        "tagline": "You Know, for Search"
    })
}

/// Mock node answering the handshake with the given version.
pub async fn start_node(version: &str) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(server_info(version)))
        .mount(&server)
        .await;
    server
}

pub fn endpoint(server: &MockServer) -> String {
    format!("127.0.0.1:{}", server.address().port())
}

pub fn connection(servers: &[&MockServer]) -> ConnectionConfig {
    let endpoints: Vec<String> = servers.iter().map(|server| endpoint(server)).collect();
    ConnectionConfig::new(&endpoints.join(","))
        .with_cluster_name(CLUSTER_NAME)
        .with_sniff(false)
        .with_request_timeout(Duration::from_secs(5))
}

pub async fn connect(server: &MockServer) -> EsClient {
    EsClient::connect(&connection(&[server])).await.unwrap()
}

pub fn fast_poll() -> RetryPolicy {
    RetryPolicy::fixed(5, Duration::from_millis(10))
}

/// Requests received by all servers with the given method and path.
pub async fn requests(servers: &[&MockServer], http_method: &str, url_path: &str) -> Vec<Request> {
    let mut found = Vec::new();
    for server in servers {
        let received = server.received_requests().await.unwrap_or_default();
        found.extend(
            received
                .into_iter()
                .filter(|request| request.method.as_str() == http_method && request.url.path() == url_path),
        );
    }
    found
}

/// Waits for a request sent from a background task.
pub async fn wait_for_request(servers: &[&MockServer], http_method: &str, url_path: &str) -> Request {
    for _ in 0..200 {
        if let Some(request) = requests(servers, http_method, url_path).await.into_iter().next() {
            return request;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("no {} {} received", http_method, url_path);
}

/// Index existence shared by several mock nodes: `HEAD` answers 404 until a
/// `PUT` creates the index.
#[derive(Clone, Default)]
pub struct IndexState {
    created: Arc<AtomicBool>,
}

pub struct HeadIndex(pub IndexState);
pub struct CreateIndex(pub IndexState);

impl Respond for HeadIndex {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        if self.0.created.load(Ordering::SeqCst) {
            ResponseTemplate::new(200)
        } else {
            ResponseTemplate::new(404)
        }
    }
}

impl Respond for CreateIndex {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        self.0.created.store(true, Ordering::SeqCst);
        let index = request.url.path().trim_start_matches('/').to_string();
        ResponseTemplate::new(200).set_body_json(json!({
            "acknowledged": true,
            "shards_acknowledged": true,
            "index": index
        }))
    }
}

/// Answers `_bulk` with one item per action line, echoing explicit ids and
/// generating the others. Ids listed in `conflicts` fail with 409.
pub struct BulkEcho {
    pub conflicts: Vec<String>,
    generated: AtomicUsize,
}

impl BulkEcho {
    pub fn new(conflicts: &[&str]) -> Self {
        Self {
            conflicts: conflicts.iter().map(|id| id.to_string()).collect(),
            generated: AtomicUsize::new(0),
        }
    }
}

impl Respond for BulkEcho {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body = String::from_utf8_lossy(&request.body);
        let mut items = Vec::new();
        let mut errors = false;
        for action in body.lines().step_by(2) {
            let action: Value = serde_json::from_str(action).unwrap();
            let meta = &action["index"];
            let index = meta["_index"].as_str().unwrap_or_default().to_string();
            let id = match meta["_id"].as_str() {
                Some(id) => id.to_string(),
                None => format!("auto-{}", self.generated.fetch_add(1, Ordering::SeqCst)),
            };
            if self.conflicts.contains(&id) {
                errors = true;
                items.push(json!({ "index": {
                    "_index": index, "_id": id, "status": 409,
                    "error": {
                        "type": "version_conflict_engine_exception",
                        "reason": format!("[{}]: version conflict, document already exists", id)
                    }
                }}));
            } else {
                items.push(json!({ "index": {
                    "_index": index, "_id": id, "_version": 1,
                    "result": "created", "status": 201
                }}));
            }
        }
        ResponseTemplate::new(200).set_body_json(json!({
            "took": 3,
            "errors": errors,
            "items": items
        }))
    }
}
