use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::models::cluster_error::{ClusterErrorKind, ErrorDetail};

/// Answer of `POST /_bulk`.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BulkResponse {
    #[serde(default)]
    took: u64,
    #[serde(default)]
    errors: bool,
    // each item is keyed by its operation name, e.g. {"index": {...}}
    items: Vec<HashMap<String, BulkItem>>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BulkItem {
    #[serde(rename = "_index", default)]
    index: String,
    #[serde(rename = "_id", default)]
    id: Option<String>,
    status: u16,
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    error: Option<ErrorDetail>,
}

/// Outcome of one record of a bulk write, aligned with the input position.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemResult {
    index: String,
    id: Option<String>,
    status: u16,
    outcome: ItemOutcome,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ItemOutcome {
    Success { result: String },
    Failure { kind: ClusterErrorKind, reason: String },
}

impl BulkResponse {
    pub fn get_took(&self) -> u64 {
        self.took
    }
    pub fn has_errors(&self) -> bool {
        self.errors
    }
    pub fn len(&self) -> usize {
        self.items.len()
    }
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn into_results(self) -> Vec<ItemResult> {
        self.items
            .into_iter()
            .map(|item| match item.into_values().next() {
                Some(item) => item.into(),
                None => ItemResult {
                    index: String::default(),
                    id: None,
                    status: 0,
                    outcome: ItemOutcome::Failure {
                        kind: ClusterErrorKind::Other("empty_item".to_string()),
                        reason: "bulk item without operation".to_string(),
                    },
                },
            })
            .collect()
    }
}

impl From<BulkItem> for ItemResult {
    fn from(item: BulkItem) -> Self {
        let outcome = match item.error {
            Some(detail) => ItemOutcome::Failure {
                kind: detail.kind(),
                reason: detail.reason(),
            },
            None if item.status >= 300 => ItemOutcome::Failure {
                kind: ClusterErrorKind::Other("http_status".to_string()),
                reason: format!("status {}", item.status),
            },
            // clusters before 5.x do not report `result`
            None => ItemOutcome::Success {
                result: item.result.unwrap_or_else(|| "indexed".to_string()),
            },
        };
        ItemResult {
            index: item.index,
            id: item.id,
            status: item.status,
            outcome,
        }
    }
}

impl ItemResult {
    pub fn get_index(&self) -> &String {
        &self.index
    }
    pub fn get_id(&self) -> Option<&str> {
        self.id.as_deref()
    }
    pub fn get_status(&self) -> u16 {
        self.status
    }
    pub fn get_outcome(&self) -> &ItemOutcome {
        &self.outcome
    }
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ItemOutcome::Success { .. })
    }
    pub fn get_error_message(&self) -> Option<&str> {
        match &self.outcome {
            ItemOutcome::Failure { reason, .. } => Some(reason),
            ItemOutcome::Success { .. } => None,
        }
    }
}
