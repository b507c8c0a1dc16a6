use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_with::{serde_as, DurationSecondsWithFrac};
use tokio_retry::strategy::{ExponentialBackoff, FixedInterval};
use twelf::reexports::serde::{Deserialize, Serialize};
use twelf::{config, Layer};

use crate::error::ConfigError;
use crate::utils::non_blank;

#[config]
#[derive(Debug, Default)]
pub struct Config {
    connection: ConnectionConfig,
    index: IndexSpec,
    #[serde(default)]
    bulk: BulkConfig,
}

#[serde_as]
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ConnectionConfig {
    /// `host1:port1,host2:port2,...`
    endpoints: String,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    cluster_name: String,
    #[serde(default = "default_true")]
    sniff: bool,
    #[serde(default = "default_scheme")]
    scheme: String,
    /// Directory with PEM files added as trusted roots.
    #[serde(default)]
    root_certificates: Option<String>,
    #[serde(default)]
    insecure: bool,
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    #[serde(default = "default_request_timeout")]
    request_timeout: Duration,
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    #[serde(default = "default_exists_timeout")]
    exists_timeout: Duration,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct IndexSpec {
    name: String,
    #[serde(default = "default_type_name")]
    type_name: String,
    #[serde(default)]
    mapping: String,
    #[serde(default)]
    settings: String,
    #[serde(default)]
    dynamic: bool,
    #[serde(default)]
    delete_if_exists: bool,
    #[serde(default = "default_true")]
    wait_for_mapping: bool,
    #[serde(default)]
    poll: RetryPolicy,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BulkConfig {
    #[serde(default = "default_batch_size")]
    batch_size: usize,
    /// Field of the input documents used as `_id`.
    #[serde(default)]
    id_field: Option<String>,
    #[serde(default = "default_bulk_retry")]
    retry: RetryPolicy,
    #[serde(default)]
    audit_file: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    #[default]
    Fixed,
    Exponential,
}

/// Bounded retry: `max_attempts` tries in total with `interval` between them.
#[serde_as]
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    max_attempts: usize,
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    #[serde(default = "default_interval")]
    interval: Duration,
    #[serde(default)]
    backoff: Backoff,
    #[serde_as(as = "Option<DurationSecondsWithFrac<f64>>")]
    #[serde(default)]
    max_delay: Option<Duration>,
}

/// One parsed `host:port` entry of the endpoint list.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    host: String,
    port: u16,
}

fn default_true() -> bool {
    true
}
fn default_scheme() -> String {
    "http".to_string()
}
fn default_request_timeout() -> Duration {
    Duration::from_secs(60)
}
fn default_exists_timeout() -> Duration {
    Duration::from_secs(5 * 60)
}
fn default_type_name() -> String {
    "_doc".to_string()
}
fn default_batch_size() -> usize {
    1000
}
fn default_max_attempts() -> usize {
    5
}
fn default_interval() -> Duration {
    Duration::from_secs(2)
}
fn default_bulk_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 4,
        interval: Duration::from_secs(1),
        backoff: Backoff::Exponential,
        max_delay: Some(Duration::from_secs(30)),
    }
}

impl Config {
    /// Loads a TOML or JSON file, chosen by extension (TOML otherwise).
    pub fn load(path: &Path) -> Result<Self, twelf::Error> {
        let path = PathBuf::from(path);
        let layer = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Layer::Json(path),
            _ => Layer::Toml(path),
        };
        Self::with_layers(&[layer])
    }
    pub fn get_connection(&self) -> &ConnectionConfig {
        &self.connection
    }
    pub fn get_index(&self) -> &IndexSpec {
        &self.index
    }
    pub fn get_bulk(&self) -> &BulkConfig {
        &self.bulk
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::new("localhost:9200")
    }
}

impl ConnectionConfig {
    pub fn new(endpoints: &str) -> Self {
        Self {
            endpoints: endpoints.to_string(),
            username: None,
            password: None,
            cluster_name: String::default(),
            sniff: true,
            scheme: default_scheme(),
            root_certificates: None,
            insecure: false,
            request_timeout: default_request_timeout(),
            exists_timeout: default_exists_timeout(),
        }
    }
    pub fn with_basic_auth(mut self, username: &str, password: &str) -> Self {
        self.username = Some(username.to_string());
        self.password = Some(password.to_string());
        self
    }
    pub fn with_cluster_name(mut self, cluster_name: &str) -> Self {
        self.cluster_name = cluster_name.to_string();
        self
    }
    pub fn with_sniff(mut self, sniff: bool) -> Self {
        self.sniff = sniff;
        self
    }
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
    pub fn with_exists_timeout(mut self, timeout: Duration) -> Self {
        self.exists_timeout = timeout;
        self
    }

    pub fn get_endpoints(&self) -> &String {
        &self.endpoints
    }
    pub fn parse_endpoints(&self) -> Result<Vec<Endpoint>, ConfigError> {
        parse_endpoints(&self.endpoints)
    }
    pub fn get_cluster_name(&self) -> Option<&str> {
        non_blank(Some(&self.cluster_name))
    }
    pub fn is_sniff(&self) -> bool {
        self.sniff
    }
    pub fn get_scheme(&self) -> &String {
        &self.scheme
    }
    pub fn get_root_certificates(&self) -> Option<&str> {
        non_blank(self.root_certificates.as_deref())
    }
    pub fn is_insecure(&self) -> bool {
        self.insecure
    }
    pub fn get_request_timeout(&self) -> Duration {
        self.request_timeout
    }
    pub fn get_exists_timeout(&self) -> Duration {
        self.exists_timeout
    }
    /// Credentials are only used when both username and password are non-blank.
    pub fn is_basic_auth(&self) -> bool {
        self.get_basic_auth().is_some()
    }
    pub fn get_basic_auth(&self) -> Option<(String, String)> {
        let username = non_blank(self.username.as_deref())?;
        let password = non_blank(self.password.as_deref())?;
        Some((username.to_string(), password.to_string()))
    }
}

impl Default for IndexSpec {
    fn default() -> Self {
        Self::new("", &default_type_name())
    }
}

impl IndexSpec {
    pub fn new(name: &str, type_name: &str) -> Self {
        Self {
            name: name.to_string(),
            type_name: type_name.to_string(),
            mapping: String::default(),
            settings: String::default(),
            dynamic: false,
            delete_if_exists: false,
            wait_for_mapping: true,
            poll: RetryPolicy::default(),
        }
    }
    pub fn with_mapping(mut self, mapping: &str) -> Self {
        self.mapping = mapping.to_string();
        self
    }
    pub fn with_settings(mut self, settings: &str) -> Self {
        self.settings = settings.to_string();
        self
    }
    pub fn with_dynamic(mut self, dynamic: bool) -> Self {
        self.dynamic = dynamic;
        self
    }
    pub fn with_poll(mut self, poll: RetryPolicy) -> Self {
        self.poll = poll;
        self
    }

    pub fn get_name(&self) -> &String {
        &self.name
    }
    pub fn get_type_name(&self) -> &String {
        &self.type_name
    }
    pub fn get_mapping(&self) -> &String {
        &self.mapping
    }
    pub fn get_settings(&self) -> &String {
        &self.settings
    }
    pub fn is_dynamic(&self) -> bool {
        self.dynamic
    }
    pub fn is_delete_if_exists(&self) -> bool {
        self.delete_if_exists
    }
    pub fn is_wait_for_mapping(&self) -> bool {
        self.wait_for_mapping
    }
    pub fn get_poll(&self) -> &RetryPolicy {
        &self.poll
    }
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            id_field: None,
            retry: default_bulk_retry(),
            audit_file: None,
        }
    }
}

impl BulkConfig {
    pub fn get_batch_size(&self) -> usize {
        self.batch_size.max(1)
    }
    pub fn get_id_field(&self) -> Option<&str> {
        non_blank(self.id_field.as_deref())
    }
    pub fn get_retry(&self) -> &RetryPolicy {
        &self.retry
    }
    pub fn get_audit_file(&self) -> Option<&str> {
        non_blank(self.audit_file.as_deref())
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(default_max_attempts(), default_interval())
    }
}

impl RetryPolicy {
    pub fn fixed(max_attempts: usize, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
            backoff: Backoff::Fixed,
            max_delay: None,
        }
    }
    pub fn exponential(max_attempts: usize, interval: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            interval,
            backoff: Backoff::Exponential,
            max_delay: Some(max_delay),
        }
    }

    /// Never below one attempt.
    pub fn get_max_attempts(&self) -> usize {
        self.max_attempts.max(1)
    }
    pub fn get_interval(&self) -> Duration {
        self.interval
    }
    pub fn get_backoff(&self) -> Backoff {
        self.backoff
    }

    /// Pauses between consecutive attempts, one less than the attempt count.
    pub fn delays(&self) -> Box<dyn Iterator<Item = Duration> + Send> {
        let pauses = self.get_max_attempts() - 1;
        match self.backoff {
            Backoff::Fixed => {
                let delays = FixedInterval::new(self.interval);
                match self.max_delay {
                    Some(max_delay) => {
                        Box::new(delays.map(move |delay| delay.min(max_delay)).take(pauses))
                    }
                    None => Box::new(delays.take(pauses)),
                }
            }
            Backoff::Exponential => {
                // base 2 with factor interval/2 yields interval, 2*interval, 4*interval, ...
                let factor = (self.interval.as_millis() as u64 / 2).max(1);
                let mut delays = ExponentialBackoff::from_millis(2).factor(factor);
                if let Some(max_delay) = self.max_delay {
                    delays = delays.max_delay(max_delay);
                }
                Box::new(delays.take(pauses))
            }
        }
    }
}

impl Endpoint {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
        }
    }
    pub fn get_host(&self) -> &String {
        &self.host
    }
    pub fn get_port(&self) -> u16 {
        self.port
    }
    /// Base URL of the node, IPv6 hosts bracketed.
    pub fn url(&self, scheme: &str) -> String {
        if self.host.contains(':') {
            format!("{}://[{}]:{}", scheme, self.host, self.port)
        } else {
            format!("{}://{}:{}", scheme, self.host, self.port)
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Parses `host1:port1,host2:port2,...`. Every entry must be well formed,
/// bad entries are never skipped.
pub fn parse_endpoints(value: &str) -> Result<Vec<Endpoint>, ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::EmptyEndpoints);
    }
    value.split(',').map(parse_endpoint).collect()
}

fn parse_endpoint(entry: &str) -> Result<Endpoint, ConfigError> {
    let malformed = |reason: &str| ConfigError::MalformedEndpoint {
        entry: entry.to_string(),
        reason: reason.to_string(),
    };

    let trimmed = entry.trim();
    if trimmed.is_empty() {
        return Err(malformed("empty entry"));
    }
    let (host, port) = trimmed
        .rsplit_once(':')
        .ok_or_else(|| malformed("missing port"))?;
    let host = match host.strip_prefix('[') {
        Some(inner) => inner
            .strip_suffix(']')
            .ok_or_else(|| malformed("unclosed IPv6 bracket"))?,
        None if host.contains(':') => return Err(malformed("IPv6 host must be bracketed")),
        None => host,
    };
    if host.trim().is_empty() {
        return Err(malformed("missing host"));
    }
    let port = port
        .trim()
        .parse::<u16>()
        .map_err(|e| malformed(&format!("invalid port: {}", e)))?;

    Ok(Endpoint::new(host.trim(), port))
}
