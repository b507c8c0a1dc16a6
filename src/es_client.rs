//! Connection to the cluster: endpoint resolution, handshake, sniffing and a
//! round-robin node pool over a shared `reqwest` client.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Certificate, Client, ClientBuilder, Method, RequestBuilder, Response};
use tracing::{debug, info, warn};

use crate::conf::{ConnectionConfig, Endpoint};
use crate::error::{ConfigError, ConnectError, TransportError};
use crate::models::nodes::NodesInfo;
use crate::models::server_info::ServerInfo;

/// Live handle to a cluster. Clones share the node pool and the closed state.
#[derive(Debug, Clone)]
pub struct EsClient {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    http_client: Client,
    nodes: Vec<String>,
    cursor: AtomicUsize,
    basic_auth: Option<(String, String)>,
    server_info: ServerInfo,
    request_timeout: Duration,
    exists_timeout: Duration,
    closed: AtomicBool,
}

/// A request to send to whichever node is next in line.
pub struct EsRequest<'a> {
    method: Method,
    path: &'a str,
    body: Option<(String, &'static str)>,
    timeout: Option<Duration>,
}

fn inject_auth(request_builder: RequestBuilder, basic_auth: &Option<(String, String)>) -> RequestBuilder {
    if let Some((username, password)) = basic_auth {
        request_builder.basic_auth(username, Some(password))
    } else {
        request_builder
    }
}

impl<'a> EsRequest<'a> {
    pub fn new(method: Method, path: &'a str) -> Self {
        Self {
            method,
            path,
            body: None,
            timeout: None,
        }
    }
    pub fn json(mut self, body: String) -> Self {
        self.body = Some((body, "application/json"));
        self
    }
    pub fn ndjson(mut self, body: String) -> Self {
        self.body = Some((body, "application/x-ndjson"));
        self
    }
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl EsClient {
    /// Parses and resolves every endpoint, then handshakes with the cluster.
    /// Nothing is contacted unless all endpoints are valid and resolvable.
    pub async fn connect(config: &ConnectionConfig) -> Result<Self, ConnectError> {
        let endpoints = config.parse_endpoints()?;
        for endpoint in &endpoints {
            resolve(endpoint).await?;
        }

        let http_client = build_reqwest_client(config)?;
        let seeds: Vec<String> = endpoints
            .iter()
            .map(|endpoint| endpoint.url(config.get_scheme()))
            .collect();
        let basic_auth = config.get_basic_auth();

        let timeout = config.get_request_timeout();
        let server_info: ServerInfo = get_from_seeds(&http_client, &seeds, &basic_auth, "/", timeout).await?;
        if let Some(expected) = config.get_cluster_name() {
            if expected != server_info.get_cluster_name() {
                warn!(
                    "Cluster name mismatch: expected {:?}, got {:?}",
                    expected,
                    server_info.get_cluster_name()
                );
                return Err(ConnectError::ClusterNameMismatch {
                    expected: expected.to_string(),
                    actual: server_info.get_cluster_name().clone(),
                });
            }
        }
        info!(
            "Connected: cluster={}, node={}, version={}, lucene={}",
            server_info.get_cluster_name(),
            server_info.get_hostname(),
            server_info.get_version(),
            server_info.get_lucene_version()
        );

        let nodes = if config.is_sniff() {
            sniff(&http_client, seeds, &basic_auth, config.get_scheme(), timeout).await
        } else {
            seeds
        };

        Ok(Self {
            inner: Arc::new(Inner {
                http_client,
                nodes,
                cursor: AtomicUsize::new(0),
                basic_auth,
                server_info,
                request_timeout: timeout,
                exists_timeout: config.get_exists_timeout(),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Releases the handle. Safe to call any number of times.
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            info!("Connection to cluster {} closed", self.inner.server_info.get_cluster_name());
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
    pub fn server_info(&self) -> &ServerInfo {
        &self.inner.server_info
    }
    pub fn nodes(&self) -> &[String] {
        &self.inner.nodes
    }
    pub fn exists_timeout(&self) -> Duration {
        self.inner.exists_timeout
    }
    pub fn version_major(&self) -> Option<u64> {
        self.inner.server_info.get_version_major()
    }
    /// Mapping types were removed in 7.x.
    pub fn uses_mapping_types(&self) -> bool {
        matches!(self.version_major(), Some(major) if major < 7)
    }

    /// Sends to the next node in round-robin order, moving on to the
    /// following node when a connection cannot be established.
    pub async fn send(&self, request: EsRequest<'_>) -> Result<Response, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let nodes = &self.inner.nodes;
        let timeout = request.timeout.unwrap_or(self.inner.request_timeout);
        let start = self.inner.cursor.fetch_add(1, Ordering::Relaxed);

        let mut last_error = None;
        for offset in 0..nodes.len() {
            let node = &nodes[(start + offset) % nodes.len()];
            let mut request_builder = self
                .inner
                .http_client
                .request(request.method.clone(), format!("{}{}", node, request.path))
                .timeout(timeout);
            request_builder = inject_auth(request_builder, &self.inner.basic_auth);
            if let Some((body, content_type)) = &request.body {
                request_builder = request_builder
                    .header(reqwest::header::CONTENT_TYPE, *content_type)
                    .body(body.clone());
            }

            match request_builder.send().await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_connect() => {
                    warn!("Node {} unreachable: {}", node, e);
                    last_error = Some(e);
                }
                Err(e) if e.is_timeout() => return Err(TransportError::Timeout(timeout)),
                Err(e) => return Err(TransportError::Request(e)),
            }
        }
        Err(last_error
            .map(TransportError::Request)
            .unwrap_or(TransportError::NoLiveNodes))
    }
}

/// Turns a non-2xx answer into `TransportError::Status` carrying the body.
/// Bodyless answers (`HEAD`) fall back to the status reason phrase.
pub async fn error_for_status(response: Response) -> Result<Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let mut body = response.text().await.unwrap_or_default();
    if body.is_empty() {
        body = status.canonical_reason().unwrap_or_default().to_string();
    }
    Err(TransportError::Status {
        status: status.as_u16(),
        body,
    })
}

async fn resolve(endpoint: &Endpoint) -> Result<(), ConfigError> {
    let target = (endpoint.get_host().as_str(), endpoint.get_port());
    match tokio::net::lookup_host(target).await {
        Ok(mut addresses) => {
            if addresses.next().is_some() {
                Ok(())
            } else {
                Err(ConfigError::UnresolvableHost {
                    host: endpoint.get_host().clone(),
                    source: std::io::Error::new(std::io::ErrorKind::NotFound, "no address"),
                })
            }
        }
        Err(source) => {
            warn!("Cannot resolve cluster address {}: {}", endpoint, source);
            Err(ConfigError::UnresolvableHost {
                host: endpoint.get_host().clone(),
                source,
            })
        }
    }
}

/// GET on the seeds in order until one answers.
async fn get_from_seeds<T: serde::de::DeserializeOwned>(
    http_client: &Client,
    seeds: &[String],
    basic_auth: &Option<(String, String)>,
    path: &str,
    timeout: Duration,
) -> Result<T, TransportError> {
    let mut last_error = TransportError::NoLiveNodes;
    for seed in seeds {
        let request_builder = inject_auth(http_client.get(format!("{}{}", seed, path)), basic_auth).timeout(timeout);
        let response = match request_builder.send().await {
            Ok(response) => response,
            Err(e) => {
                warn!("Seed node {} unreachable: {}", seed, e);
                last_error = if e.is_timeout() {
                    TransportError::Timeout(timeout)
                } else {
                    TransportError::Request(e)
                };
                continue;
            }
        };
        let response = error_for_status(response).await?;
        return response
            .json::<T>()
            .await
            .map_err(|e| TransportError::Decode(format!("{}: {}", path, e)));
    }
    Err(last_error)
}

/// Adds the nodes published by `GET /_nodes/http`. On failure the seeds are kept.
async fn sniff(
    http_client: &Client,
    seeds: Vec<String>,
    basic_auth: &Option<(String, String)>,
    scheme: &str,
    timeout: Duration,
) -> Vec<String> {
    let discovered = match get_from_seeds::<NodesInfo>(http_client, &seeds, basic_auth, "/_nodes/http", timeout).await {
        Ok(info) => info.publish_addresses(),
        Err(e) => {
            warn!("Node sniffing failed, keeping seed nodes: {}", e);
            return seeds;
        }
    };

    let mut nodes = seeds;
    for address in discovered {
        let url = format!("{}://{}", scheme, address);
        if !nodes.contains(&url) {
            debug!("Sniffed node {}", url);
            nodes.push(url);
        }
    }
    info!("Using {} node(s): {}", nodes.len(), nodes.join(", "));
    nodes
}

fn build_reqwest_client(config: &ConnectionConfig) -> Result<Client, ConfigError> {
    let mut builder = ClientBuilder::new().connect_timeout(Duration::from_secs(10));
    if config.is_insecure() {
        warn!("TLS certificate verification is disabled");
        builder = builder.danger_accept_invalid_certs(true);
    }
    if let Some(path) = config.get_root_certificates() {
        for cert in load_certificates(Path::new(path))? {
            builder = builder.add_root_certificate(cert);
        }
    }
    builder.build().map_err(ConfigError::HttpClient)
}

/// Every PEM file in the directory becomes a trusted root.
fn load_certificates(path: &Path) -> Result<Vec<Certificate>, ConfigError> {
    let failed = |reason: String| ConfigError::Certificates {
        path: path.display().to_string(),
        reason,
    };
    let mut certs = Vec::new();
    let entries = std::fs::read_dir(path).map_err(|e| failed(e.to_string()))?;
    for entry in entries {
        let entry = entry.map_err(|e| failed(e.to_string()))?;
        let file_path = entry.path();
        if !file_path.is_file() {
            continue;
        }
        let content = std::fs::read(&file_path).map_err(|e| failed(e.to_string()))?;
        match Certificate::from_pem(&content) {
            Ok(cert) => certs.push(cert),
            Err(e) => warn!("Skipping {:?}, not a PEM certificate: {}", file_path, e),
        }
    }
    Ok(certs)
}
