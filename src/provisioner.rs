//! Index provisioning: existence checks, creation, readiness polling and
//! mapping application.

use reqwest::{Method, StatusCode};
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tokio_retry::RetryIf;
use tracing::{debug, error, info};

use crate::audit_builder::{Audit, What};
use crate::conf::{IndexSpec, RetryPolicy};
use crate::error::{ProvisionError, TransportError};
use crate::es_client::{error_for_status, EsClient, EsRequest};
use crate::models::cluster_error::ErrorResponse;
use crate::utils::{abbreviate, is_blank};

pub struct IndexProvisioner {
    client: EsClient,
    audit: Audit,
}

/// Result of a successful `ensure_index`.
#[derive(Debug)]
pub struct Provisioned {
    create_requested: bool,
    mapping: MappingState,
}

#[derive(Debug)]
pub enum MappingState {
    /// Dynamic mapping requested or no mapping given.
    Skipped,
    /// Put-mapping dispatched, not yet confirmed.
    Pending(MappingTask),
}

/// In-flight put-mapping request. Awaiting it is optional.
#[derive(Debug)]
pub struct MappingTask {
    index: String,
    handle: JoinHandle<Result<(), ProvisionError>>,
}

impl MappingTask {
    pub fn get_index(&self) -> &String {
        &self.index
    }
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
    pub async fn wait(self) -> Result<(), ProvisionError> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) => Err(ProvisionError::Task(e.to_string())),
        }
    }
}

impl Provisioned {
    pub fn is_create_requested(&self) -> bool {
        self.create_requested
    }
    pub fn get_mapping(&self) -> &MappingState {
        &self.mapping
    }
    pub fn is_mapping_pending(&self) -> bool {
        matches!(self.mapping, MappingState::Pending(_))
    }
    /// Waits for the mapping request, if one was dispatched.
    pub async fn wait_for_mapping(self) -> Result<(), ProvisionError> {
        match self.mapping {
            MappingState::Skipped => Ok(()),
            MappingState::Pending(task) => task.wait().await,
        }
    }
}

impl IndexProvisioner {
    pub fn new(client: EsClient) -> Self {
        Self {
            client,
            audit: Audit::disabled(),
        }
    }

    pub fn with_audit(mut self, audit: Audit) -> Self {
        self.audit = audit;
        self
    }

    /// `HEAD /{index}`, bounded by the client's existence timeout.
    pub async fn exists(&self, index: &str) -> Result<bool, TransportError> {
        let path = format!("/{}", index);
        let request = EsRequest::new(Method::HEAD, &path).timeout(self.client.exists_timeout());
        let response = self.client.send(request).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        error_for_status(response).await?;
        Ok(true)
    }

    /// Deletes the index when present. Returns whether a delete was issued.
    pub async fn delete_index(&self, index: &str) -> Result<bool, ProvisionError> {
        info!("Delete index {}", index);
        if !self.exists(index).await? {
            info!("Index {} not found, skip delete", index);
            return Ok(false);
        }
        self.audit.write(What::DeleteIndexRequest, index, "").await;
        let path = format!("/{}", index);
        let response = self.client.send(EsRequest::new(Method::DELETE, &path)).await?;
        error_for_status(response).await?;
        Ok(true)
    }

    /// Creates the index if absent, waits until it is visible, then dispatches
    /// the mapping unless dynamic mapping is requested. The mapping request is
    /// not awaited here; see [`Provisioned::wait_for_mapping`].
    pub async fn ensure_index(&self, spec: &IndexSpec) -> Result<Provisioned, ProvisionError> {
        let result = self.provision(spec).await;
        if let Err(e) = &result {
            error!("Provisioning index {} failed: {}", spec.get_name(), e);
        }
        result
    }

    async fn provision(&self, spec: &IndexSpec) -> Result<Provisioned, ProvisionError> {
        let index = spec.get_name();
        let settings = parse_optional_json(spec.get_settings()).map_err(ProvisionError::InvalidSettings)?;
        let mapping = if spec.is_dynamic() {
            None
        } else {
            parse_optional_json(spec.get_mapping()).map_err(ProvisionError::InvalidMapping)?
        };

        let mut create_requested = false;
        if !self.exists(index).await? {
            info!("Create index {}", index);
            self.spawn_create(index, settings);
            create_requested = true;
        }

        self.wait_until_visible(index, spec.get_poll()).await?;

        if spec.is_dynamic() {
            info!("Dynamic mapping for {}, ignore mappings", index);
            return Ok(Provisioned {
                create_requested,
                mapping: MappingState::Skipped,
            });
        }
        let Some(mapping) = mapping else {
            info!("No mappings given for {}", index);
            return Ok(Provisioned {
                create_requested,
                mapping: MappingState::Skipped,
            });
        };

        let task = self.spawn_put_mapping(index, spec.get_type_name(), mapping);
        Ok(Provisioned {
            create_requested,
            mapping: MappingState::Pending(task),
        })
    }

    /// Polls existence under the policy. Transport failures end the poll.
    async fn wait_until_visible(&self, index: &str, policy: &RetryPolicy) -> Result<(), ProvisionError> {
        let mut attempts = 0usize;
        let result = RetryIf::spawn(
            policy.delays(),
            || {
                attempts += 1;
                let attempt = attempts;
                async move {
                    match self.exists(index).await {
                        Ok(true) => Ok(()),
                        Ok(false) => {
                            debug!("Index {} not visible yet (attempt {})", index, attempt);
                            Err(None)
                        }
                        Err(e) => Err(Some(e)),
                    }
                }
            },
            |e: &Option<TransportError>| e.is_none(),
        )
        .await;

        match result {
            Ok(()) => Ok(()),
            Err(None) => Err(ProvisionError::NotVisible {
                index: index.to_string(),
                attempts,
            }),
            Err(Some(e)) => Err(ProvisionError::Transport(e)),
        }
    }

    /// Fire-and-forget: the outcome is only logged, readiness comes from polling.
    fn spawn_create(&self, index: &str, settings: Option<Value>) {
        let client = self.client.clone();
        let audit = self.audit.clone();
        let index = index.to_string();
        let body = create_index_body(settings).to_string();

        tokio::spawn(async move {
            audit.write(What::CreateIndexRequest, &index, &body).await;
            let path = format!("/{}", index);
            let result = match client.send(EsRequest::new(Method::PUT, &path).json(body)).await {
                Ok(response) => error_for_status(response).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(_) => {
                    info!("Create [{}] index success", index);
                    audit.write(What::CreateIndexResponseOk, &index, "").await;
                }
                Err(e) => {
                    error!("Create [{}] index fail, err msg: {}", index, e);
                    audit
                        .write(What::CreateIndexResponseErr, &index, &e.to_string())
                        .await;
                }
            }
        });
    }

    fn spawn_put_mapping(&self, index: &str, type_name: &str, mapping: Value) -> MappingTask {
        let client = self.client.clone();
        let audit = self.audit.clone();
        let (path, body) = if client.uses_mapping_types() {
            (format!("/{}/_mapping/{}", index, type_name), mapping)
        } else {
            (format!("/{}/_mapping", index), unwrap_type_envelope(mapping, type_name))
        };
        let body = body.to_string();
        info!("Create mappings for {} {}", index, abbreviate(&body, 200));

        let task_index = index.to_string();
        let handle = tokio::spawn(async move {
            let index = task_index;
            audit.write(What::PutMappingRequest, &index, &body).await;
            let response = match client.send(EsRequest::new(Method::PUT, &path).json(body)).await {
                Ok(response) => response,
                Err(e) => {
                    error!("Create mapping of [{}] fail, err msg: {}", index, e);
                    audit
                        .write(What::PutMappingResponseErr, &index, &e.to_string())
                        .await;
                    return Err(ProvisionError::Transport(e));
                }
            };

            let status = response.status();
            if status.is_success() {
                info!("Create mapping of [{}] index success", index);
                audit.write(What::PutMappingResponseOk, &index, "").await;
                return Ok(());
            }
            let text = response.text().await.unwrap_or_default();
            let reason = ErrorResponse::parse(&text).reason();
            error!("Create mapping of [{}] fail, err msg: {}", index, reason);
            audit.write(What::PutMappingResponseErr, &index, &text).await;
            Err(ProvisionError::Mapping {
                index,
                status: status.as_u16(),
                reason,
            })
        });

        MappingTask {
            index: index.to_string(),
            handle,
        }
    }
}

/// Blank text means "not given".
fn parse_optional_json(value: &str) -> Result<Option<Value>, serde_json::Error> {
    if is_blank(value) {
        return Ok(None);
    }
    serde_json::from_str(value).map(Some)
}

/// Settings are sent under `settings` unless the caller already wrapped them.
fn create_index_body(settings: Option<Value>) -> Value {
    match settings {
        Some(Value::Object(map)) if map.contains_key("settings") => Value::Object(map),
        Some(settings) => json!({ "settings": settings }),
        None => json!({}),
    }
}

/// Typeless clusters reject `{"<type>": {...}}`, keep only the inner mapping.
fn unwrap_type_envelope(mapping: Value, type_name: &str) -> Value {
    match mapping {
        Value::Object(mut map) if map.len() == 1 && map.get(type_name).map_or(false, Value::is_object) => {
            map.remove(type_name).unwrap_or(Value::Null)
        }
        other => other,
    }
}
