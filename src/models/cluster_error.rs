use std::fmt;

use serde::{Deserialize, Serialize};

/// Error categories reported by the cluster that callers may want to react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterErrorKind {
    RejectedExecution,
    IllegalArgument,
    ClusterBlock,
    ResourceAlreadyExists,
    VersionConflict,
    Other(String),
}

impl ClusterErrorKind {
    pub fn from_type(error_type: &str) -> Self {
        match error_type {
            "es_rejected_execution_exception" => ClusterErrorKind::RejectedExecution,
            "illegal_argument_exception" => ClusterErrorKind::IllegalArgument,
            "cluster_block_exception" => ClusterErrorKind::ClusterBlock,
            "resource_already_exists_exception" | "index_already_exists_exception" => {
                ClusterErrorKind::ResourceAlreadyExists
            }
            "version_conflict_engine_exception" => ClusterErrorKind::VersionConflict,
            other => ClusterErrorKind::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ClusterErrorKind::RejectedExecution => "es_rejected_execution_exception",
            ClusterErrorKind::IllegalArgument => "illegal_argument_exception",
            ClusterErrorKind::ClusterBlock => "cluster_block_exception",
            ClusterErrorKind::ResourceAlreadyExists => "resource_already_exists_exception",
            ClusterErrorKind::VersionConflict => "version_conflict_engine_exception",
            ClusterErrorKind::Other(value) => value,
        }
    }
}

impl fmt::Display for ClusterErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error object as found in error responses and failed bulk items.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ErrorCause {
    #[serde(rename = "type")]
    error_type: String,
    #[serde(default)]
    reason: Option<String>,
}

/// Very old clusters answer with a bare string instead of an object.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum ErrorDetail {
    Cause(ErrorCause),
    Message(String),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ErrorResponse {
    error: ErrorDetail,
    #[serde(default)]
    status: Option<u16>,
}

impl ErrorCause {
    pub fn new(error_type: &str, reason: &str) -> Self {
        Self {
            error_type: error_type.to_string(),
            reason: Some(reason.to_string()),
        }
    }
    pub fn get_type(&self) -> &String {
        &self.error_type
    }
    pub fn get_reason(&self) -> String {
        self.reason.clone().unwrap_or_default()
    }
    pub fn kind(&self) -> ClusterErrorKind {
        ClusterErrorKind::from_type(&self.error_type)
    }
}

impl ErrorDetail {
    pub fn kind(&self) -> ClusterErrorKind {
        match self {
            ErrorDetail::Cause(cause) => cause.kind(),
            ErrorDetail::Message(_) => ClusterErrorKind::Other("unknown".to_string()),
        }
    }
    pub fn reason(&self) -> String {
        match self {
            ErrorDetail::Cause(cause) => cause.get_reason(),
            ErrorDetail::Message(message) => message.clone(),
        }
    }
}

impl ErrorResponse {
    /// Best effort parse of an error body; bodies that are not cluster errors
    /// are reported verbatim.
    pub fn parse(body: &str) -> Self {
        serde_json::from_str(body).unwrap_or_else(|_| Self {
            error: ErrorDetail::Message(body.to_string()),
            status: None,
        })
    }
    pub fn kind(&self) -> ClusterErrorKind {
        self.error.kind()
    }
    pub fn reason(&self) -> String {
        self.error.reason()
    }
    pub fn get_status(&self) -> Option<u16> {
        self.status
    }
}
