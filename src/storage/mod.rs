//! Storage backend contract
//!
//! This module is organized into submodules:
//! - `control`: Pause/resume/cancel state shared by backend transfer workers
//! - `s3`: S3-compatible backend (R2, AWS, MinIO) built on the AWS SDK
//!
//! A backend hands back a controllable [`TransferOperation`] for every
//! upload or download and reports what happens to it through a
//! [`TransferListener`] supplied at hand-off.

pub mod control;
pub mod s3;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::error::StorageError;
use crate::metadata::{ObjectMetadata, TransferMetadata};

pub use control::{Checkpoint, TransferControl};

/// Location of an object: the storage account, its bucket and the object path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageRef {
    pub app_name: String,
    pub bucket: String,
    pub path: String,
}

impl StorageRef {
    pub fn new(
        app_name: impl Into<String>,
        bucket: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            app_name: app_name.into(),
            bucket: bucket.into(),
            path: path.into(),
        }
    }

    /// Last path segment.
    pub fn name(&self) -> &str {
        self.path
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default()
    }
}

/// Point-in-time progress record raised by a backend operation.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskSnapshot {
    pub path: String,
    pub bytes_transferred: u64,
    pub total_bytes: u64,
    pub metadata: Option<ObjectMetadata>,
}

impl TaskSnapshot {
    pub fn to_value(&self) -> Value {
        let mut out = Map::new();
        out.insert("path".to_string(), Value::from(self.path.clone()));
        out.insert(
            "bytesTransferred".to_string(),
            Value::from(self.bytes_transferred),
        );
        out.insert("totalBytes".to_string(), Value::from(self.total_bytes));
        if let Some(metadata) = &self.metadata {
            out.insert("metadata".to_string(), metadata.to_value());
        }
        Value::Object(out)
    }
}

/// Raw failure as raised by a backend, before classification.
pub type RawFailure = Box<dyn std::error::Error + Send + Sync + 'static>;

/// One notification raised by a backend operation.
#[derive(Debug)]
pub enum NativeEvent {
    Progress(TaskSnapshot),
    Paused(TaskSnapshot),
    Success(TaskSnapshot),
    Canceled,
    Failure(RawFailure),
}

/// Receives the notifications of one backend operation, in the order the
/// operation raises them. Called from the backend's own execution context.
pub trait TransferListener: Send + Sync {
    fn on_event(&self, event: NativeEvent);
}

/// Lifecycle control of a running backend operation.
///
/// Each method reports whether the backend accepted the request.
pub trait TransferOperation: Send + Sync {
    fn pause(&self) -> bool;
    fn resume(&self) -> bool;
    fn cancel(&self) -> bool;
}

impl TransferOperation for TransferControl {
    fn pause(&self) -> bool {
        self.request_pause()
    }

    fn resume(&self) -> bool {
        self.request_resume()
    }

    fn cancel(&self) -> bool {
        self.request_cancel()
    }
}

/// Retry ceilings forwarded to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrySettings {
    pub max_operation_retry_time: Duration,
    pub max_upload_retry_time: Duration,
    pub max_download_retry_time: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_operation_retry_time: Duration::from_secs(120),
            max_upload_retry_time: Duration::from_secs(600),
            max_download_retry_time: Duration::from_secs(600),
        }
    }
}

impl RetrySettings {
    /// Plugin constants exposed to the host, in milliseconds.
    pub fn to_constants(&self) -> Value {
        json!({
            "MAX_OPERATION_RETRY_TIME": self.max_operation_retry_time.as_millis() as u64,
            "MAX_UPLOAD_RETRY_TIME": self.max_upload_retry_time.as_millis() as u64,
            "MAX_DOWNLOAD_RETRY_TIME": self.max_download_retry_time.as_millis() as u64,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListOptions {
    pub max_results: u32,
    pub page_token: Option<String>,
}

/// One page of a listing: object paths and sub-directory prefixes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListResult {
    pub items: Vec<String>,
    pub prefixes: Vec<String>,
    pub next_page_token: Option<String>,
}

impl ListResult {
    pub fn to_value(&self) -> Value {
        let mut out = Map::new();
        if let Some(token) = &self.next_page_token {
            out.insert("nextPageToken".to_string(), Value::from(token.clone()));
        }
        out.insert("items".to_string(), Value::from(self.items.clone()));
        out.insert("prefixes".to_string(), Value::from(self.prefixes.clone()));
        Value::Object(out)
    }
}

/// The external storage client.
///
/// Transfer methods hand the operation to the backend and return at once;
/// everything that happens afterwards, failures included, is reported
/// through `listener`.
#[async_trait]
pub trait StorageClient: Send + Sync {
    /// Bucket used when a call does not name one.
    fn default_bucket(&self) -> &str;

    fn retry_settings(&self) -> RetrySettings;

    fn set_retry_settings(&self, settings: RetrySettings);

    fn put_bytes(
        &self,
        reference: &StorageRef,
        data: Vec<u8>,
        metadata: Option<TransferMetadata>,
        listener: Arc<dyn TransferListener>,
    ) -> Arc<dyn TransferOperation>;

    fn put_file(
        &self,
        reference: &StorageRef,
        source: PathBuf,
        metadata: Option<TransferMetadata>,
        listener: Arc<dyn TransferListener>,
    ) -> Arc<dyn TransferOperation>;

    fn get_file(
        &self,
        reference: &StorageRef,
        destination: PathBuf,
        listener: Arc<dyn TransferListener>,
    ) -> Arc<dyn TransferOperation>;

    async fn delete(&self, reference: &StorageRef) -> Result<(), StorageError>;

    async fn get_metadata(&self, reference: &StorageRef) -> Result<ObjectMetadata, StorageError>;

    async fn update_metadata(
        &self,
        reference: &StorageRef,
        metadata: TransferMetadata,
    ) -> Result<ObjectMetadata, StorageError>;

    async fn download_url(&self, reference: &StorageRef) -> Result<String, StorageError>;

    async fn list(
        &self,
        reference: &StorageRef,
        options: ListOptions,
    ) -> Result<ListResult, StorageError>;

    async fn list_all(&self, reference: &StorageRef) -> Result<ListResult, StorageError>;
}
