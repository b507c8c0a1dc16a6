//! Error types for connecting, provisioning and bulk writing.

use std::time::Duration;

use thiserror::Error;

use crate::models::bulk::ItemResult;
use crate::models::cluster_error::ClusterErrorKind;

/// Problems with the connection configuration, detected before any node is contacted.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("endpoint list is empty")]
    EmptyEndpoints,

    #[error("malformed endpoint {entry:?}: {reason}")]
    MalformedEndpoint { entry: String, reason: String },

    #[error("cannot resolve host {host:?}: {source}")]
    UnresolvableHost {
        host: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot load root certificates from {path:?}: {reason}")]
    Certificates { path: String, reason: String },

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),
}

/// Failures talking to the cluster.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(#[source] reqwest::Error),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("cannot decode response: {0}")]
    Decode(String),

    #[error("no live node available")]
    NoLiveNodes,

    #[error("connection is closed")]
    Closed,
}

impl TransportError {
    /// Connection-level failures and overload statuses worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Request(e) => e.is_connect(),
            Self::Timeout(_) | Self::NoLiveNodes => true,
            Self::Status { status, .. } => matches!(status, 429 | 502 | 503 | 504),
            Self::Decode(_) | Self::Closed => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("cluster name mismatch: expected {expected:?}, cluster reports {actual:?}")]
    ClusterNameMismatch { expected: String, actual: String },
}

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("index settings are not valid JSON: {0}")]
    InvalidSettings(#[source] serde_json::Error),

    #[error("index mapping is not valid JSON: {0}")]
    InvalidMapping(#[source] serde_json::Error),

    #[error("index {index:?} not visible after {attempts} attempts")]
    NotVisible { index: String, attempts: usize },

    #[error("put mapping on {index:?} rejected ({status}): {reason}")]
    Mapping {
        index: String,
        status: u16,
        reason: String,
    },

    #[error("provisioning task failed: {0}")]
    Task(String),
}

#[derive(Debug, Error)]
pub enum BulkError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("bulk request rejected ({status}, {kind}): {reason}")]
    Rejected {
        kind: ClusterErrorKind,
        status: u16,
        reason: String,
    },

    #[error("record at position {position} is invalid: {reason}")]
    InvalidRecord { position: usize, reason: String },

    #[error("bulk response has {actual} items for {expected} records")]
    MisalignedResponse { expected: usize, actual: usize },

    /// A later batch failed; `written` holds the results of the batches before it.
    #[error("batch {batch} failed after {} records were written: {source}", .written.len())]
    BatchFailed {
        batch: usize,
        written: Vec<ItemResult>,
        source: Box<BulkError>,
    },
}

impl BulkError {
    /// A timed out bulk request may already be applied, so it is never resent.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(TransportError::Timeout(_)) => false,
            Self::Transport(e) => e.is_retryable(),
            Self::Rejected { status, .. } => matches!(status, 429 | 502 | 503 | 504),
            Self::InvalidRecord { .. } | Self::MisalignedResponse { .. } | Self::BatchFailed { .. } => false,
        }
    }
}

/// Failures of a whole CLI job run.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("cannot load config: {0}")]
    Config(#[from] twelf::Error),

    #[error("cannot read input {path:?}: {source}")]
    Input {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("input line {line} is invalid: {reason}")]
    InputRecord { line: usize, reason: String },

    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error(transparent)]
    Bulk(#[from] BulkError),

    #[error("{failed} of {total} records were rejected")]
    RejectedRecords { failed: usize, total: usize },
}
