//! Bulk indexing of `(optional id, JSON body)` records.

use human_bytes::human_bytes;
use reqwest::Method;
use serde::de::IgnoredAny;
use serde_json::{json, Map, Value};
use tokio_retry::RetryIf;
use tracing::{debug, error, info, warn};

use crate::audit_builder::{Audit, What};
use crate::conf::{BulkConfig, RetryPolicy};
use crate::error::{BulkError, TransportError};
use crate::es_client::{EsClient, EsRequest};
use crate::models::bulk::{BulkResponse, ItemResult};
use crate::models::cluster_error::ErrorResponse;
use crate::utils::{abbreviate, is_blank, non_blank};

/// One document to index. A non-blank id becomes `_id`, otherwise the
/// cluster generates one.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    id: Option<String>,
    body: String,
}

impl Record {
    pub fn new(body: &str) -> Self {
        Self {
            id: None,
            body: body.to_string(),
        }
    }
    pub fn with_id(id: &str, body: &str) -> Self {
        Self {
            id: Some(id.to_string()),
            body: body.to_string(),
        }
    }
    /// The id as given, unless blank.
    pub fn get_id(&self) -> Option<&str> {
        self.id.as_deref().filter(|id| !is_blank(id))
    }
    pub fn get_body(&self) -> &String {
        &self.body
    }
}

/// `NoOp` for empty input, otherwise one result per record in input order.
#[derive(Debug, Clone, PartialEq)]
pub enum BulkOutcome {
    NoOp,
    Items(Vec<ItemResult>),
}

impl BulkOutcome {
    pub fn is_noop(&self) -> bool {
        matches!(self, BulkOutcome::NoOp)
    }
    pub fn items(&self) -> &[ItemResult] {
        match self {
            BulkOutcome::NoOp => &[],
            BulkOutcome::Items(items) => items,
        }
    }
    pub fn failures(&self) -> usize {
        self.items().iter().filter(|item| !item.is_success()).count()
    }
}

pub struct BulkWriter {
    client: EsClient,
    batch_size: usize,
    retry: RetryPolicy,
    audit: Audit,
}

impl BulkWriter {
    pub fn new(client: EsClient) -> Self {
        Self::with_config(client, &BulkConfig::default())
    }

    pub fn with_config(client: EsClient, config: &BulkConfig) -> Self {
        Self {
            client,
            batch_size: config.get_batch_size(),
            retry: config.get_retry().clone(),
            audit: Audit::disabled(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_audit(mut self, audit: Audit) -> Self {
        self.audit = audit;
        self
    }

    pub fn get_batch_size(&self) -> usize {
        self.batch_size
    }

    /// Writes all records in a single `_bulk` request.
    pub async fn insert(
        &self,
        index: &str,
        type_name: &str,
        records: &[Record],
    ) -> Result<BulkOutcome, BulkError> {
        if records.is_empty() {
            warn!("No records to insert into {}", index);
            return Ok(BulkOutcome::NoOp);
        }
        let result = self.write(index, type_name, records).await;
        if let Err(e) = &result {
            error!("Bulk insert of {} records into {} failed: {}", records.len(), index, e);
        }
        result
    }

    /// Splits the records into `batch_size` chunks, written one after another.
    /// Results are concatenated in input order. When a batch fails the error
    /// carries the results of the batches already written.
    pub async fn insert_batched(
        &self,
        index: &str,
        type_name: &str,
        records: &[Record],
    ) -> Result<BulkOutcome, BulkError> {
        if records.len() <= self.batch_size {
            return self.insert(index, type_name, records).await;
        }
        let mut items = Vec::with_capacity(records.len());
        for (batch, chunk) in records.chunks(self.batch_size).enumerate() {
            debug!("Bulk batch {} with {} records", batch, chunk.len());
            match self.insert(index, type_name, chunk).await {
                Ok(outcome) => items.extend(outcome.items().iter().cloned()),
                Err(e) => {
                    warn!("{} of {} records written before the failure", items.len(), records.len());
                    return Err(BulkError::BatchFailed {
                        batch,
                        written: items,
                        source: Box::new(e),
                    });
                }
            }
        }
        Ok(BulkOutcome::Items(items))
    }

    async fn write(&self, index: &str, type_name: &str, records: &[Record]) -> Result<BulkOutcome, BulkError> {
        let type_name = if self.client.uses_mapping_types() {
            non_blank(Some(type_name))
        } else {
            None
        };
        let body = build_bulk_body(index, type_name, records)?;
        debug!(
            "Bulk request: {} records, {} to {}",
            records.len(),
            human_bytes(body.len() as f64),
            index
        );
        self.audit.write(What::BulkRequest, index, &body).await;

        let response = match self.send_with_retry(&body).await {
            Ok(response) => response,
            Err(e) => {
                self.audit.write(What::BulkResponseErr, index, &e.to_string()).await;
                return Err(e);
            }
        };

        if response.len() != records.len() {
            return Err(BulkError::MisalignedResponse {
                expected: records.len(),
                actual: response.len(),
            });
        }
        let took = response.get_took();
        let results = response.into_results();
        let failures = results.iter().filter(|item| !item.is_success()).count();
        if failures > 0 {
            warn!("{} of {} records rejected by {}", failures, results.len(), index);
            for (position, item) in results.iter().enumerate().filter(|(_, item)| !item.is_success()) {
                debug!(
                    "Record {} (id {:?}) failed with status {}: {}",
                    position,
                    item.get_id(),
                    item.get_status(),
                    item.get_error_message().unwrap_or_default()
                );
            }
        } else {
            info!("Inserted {} records into {} in {} ms", results.len(), index, took);
        }
        self.audit
            .write(
                What::BulkResponseOk,
                index,
                &format!("items={} failures={} took={}", results.len(), failures, took),
            )
            .await;
        Ok(BulkOutcome::Items(results))
    }

    /// Whole-request retries on overload and connection failures only.
    async fn send_with_retry(&self, body: &str) -> Result<BulkResponse, BulkError> {
        let mut attempt = 0usize;
        RetryIf::spawn(
            self.retry.delays(),
            || {
                attempt += 1;
                if attempt > 1 {
                    info!("Retrying bulk request (attempt {})", attempt);
                }
                self.send_once(body)
            },
            |e: &BulkError| {
                let retry = e.is_retryable();
                if retry {
                    warn!("Bulk request failed, will retry: {}", e);
                }
                retry
            },
        )
        .await
    }

    async fn send_once(&self, body: &str) -> Result<BulkResponse, BulkError> {
        let request = EsRequest::new(Method::POST, "/_bulk").ndjson(body.to_string());
        let response = self.client.send(request).await?;
        let status = response.status();
        if status.is_success() {
            return response
                .json::<BulkResponse>()
                .await
                .map_err(|e| BulkError::Transport(TransportError::Decode(e.to_string())));
        }

        let text = response.text().await.unwrap_or_default();
        let error = ErrorResponse::parse(&text);
        Err(BulkError::Rejected {
            kind: error.kind(),
            status: status.as_u16(),
            reason: abbreviate(&error.reason(), 500),
        })
    }
}

/// NDJSON body: one action line and one document line per record.
pub fn build_bulk_body(index: &str, type_name: Option<&str>, records: &[Record]) -> Result<String, BulkError> {
    let mut body = String::new();
    for (position, record) in records.iter().enumerate() {
        let document = document_line(record.get_body())
            .map_err(|reason| BulkError::InvalidRecord { position, reason })?;

        let mut action = Map::new();
        action.insert("_index".to_string(), json!(index));
        if let Some(type_name) = type_name {
            action.insert("_type".to_string(), json!(type_name));
        }
        if let Some(id) = record.get_id() {
            action.insert("_id".to_string(), json!(id));
        }
        body.push_str(&json!({ "index": action }).to_string());
        body.push('\n');
        body.push_str(&document);
        body.push('\n');
    }
    Ok(body)
}

/// Validates a document and makes sure it fits on one line.
fn document_line(body: &str) -> Result<String, String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Err("empty body".to_string());
    }
    if !trimmed.starts_with('{') {
        return Err("document must be a JSON object".to_string());
    }
    serde_json::from_str::<IgnoredAny>(trimmed).map_err(|e| format!("invalid JSON: {}", e))?;
    if trimmed.contains('\n') || trimmed.contains('\r') {
        let value: Value = serde_json::from_str(trimmed).map_err(|e| format!("invalid JSON: {}", e))?;
        return Ok(value.to_string());
    }
    Ok(trimmed.to_string())
}
