//! Writes record batches into an Elasticsearch cluster: connect from a
//! `host:port,...` endpoint list, make sure the target index exists, then
//! bulk insert.

pub mod audit_builder;
pub mod bulk_writer;
pub mod conf;
pub mod error;
pub mod es_client;
pub mod input;
pub mod models;
pub mod provisioner;
pub mod utils;

pub use bulk_writer::{BulkOutcome, BulkWriter, Record};
pub use conf::{Config, ConnectionConfig, IndexSpec, RetryPolicy};
pub use error::{BulkError, ConfigError, ConnectError, ProvisionError, TransportError};
pub use es_client::EsClient;
pub use models::bulk::{ItemOutcome, ItemResult};
pub use provisioner::{IndexProvisioner, MappingState, Provisioned};
