use std::io;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use tokio::{
    fs::{self, File, OpenOptions},
    io::AsyncWriteExt,
    sync::Mutex,
};
use tracing::warn;

pub enum What {
    CreateIndexRequest,
    CreateIndexResponseOk,
    CreateIndexResponseErr,
    PutMappingRequest,
    PutMappingResponseOk,
    PutMappingResponseErr,
    DeleteIndexRequest,
    BulkRequest,
    BulkResponseOk,
    BulkResponseErr,
}

impl What {
    pub fn as_str(&self) -> &'static str {
        match self {
            What::CreateIndexRequest => "CreateIndexRequest",
            What::CreateIndexResponseOk => "CreateIndexResponseOk",
            What::CreateIndexResponseErr => "CreateIndexResponseErr",
            What::PutMappingRequest => "PutMappingRequest",
            What::PutMappingResponseOk => "PutMappingResponseOk",
            What::PutMappingResponseErr => "PutMappingResponseErr",
            What::DeleteIndexRequest => "DeleteIndexRequest",
            What::BulkRequest => "BulkRequest",
            What::BulkResponseOk => "BulkResponseOk",
            What::BulkResponseErr => "BulkResponseErr",
        }
    }
}

/// Append-only audit file. Every entry is flushed so the trail survives a crash.
pub struct AuditBuilder {
    file: File,
}

impl AuditBuilder {
    pub async fn open(path: &Path) -> io::Result<Self> {
        match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent).await?,
            _ => {}
        }
        let file = OpenOptions::new().create(true).append(true).open(path).await?;
        Ok(Self { file })
    }

    /// A `# <timestamp> <what> <index>` header followed by the payload.
    pub async fn write_entry(&mut self, what: &What, index: &str, payload: &str) -> io::Result<()> {
        let mut entry = format!("# {} {} {}\n", Utc::now().to_rfc3339(), what.as_str(), index);
        if !payload.is_empty() {
            entry.push_str(payload);
            if !payload.ends_with('\n') {
                entry.push('\n');
            }
        }
        self.file.write_all(entry.as_bytes()).await?;
        self.file.flush().await
    }
}

/// Shared, optional audit trail. Write failures are logged, never propagated.
#[derive(Clone, Default)]
pub struct Audit {
    builder: Option<Arc<Mutex<AuditBuilder>>>,
}

impl Audit {
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Falls back to a disabled audit when the file cannot be opened.
    pub async fn open(file_name: &str) -> Self {
        match AuditBuilder::open(Path::new(file_name)).await {
            Ok(builder) => Self {
                builder: Some(Arc::new(Mutex::new(builder))),
            },
            Err(e) => {
                warn!("Audit file {} cannot be opened, audit disabled: {}", file_name, e);
                Self::disabled()
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.builder.is_some()
    }

    pub async fn write(&self, what: What, index: &str, payload: &str) {
        if let Some(builder) = &self.builder {
            let mut builder = builder.lock().await;
            if let Err(e) = builder.write_entry(&what, index, payload).await {
                warn!("Audit write of {} failed: {}", what.as_str(), e);
            }
        }
    }
}
