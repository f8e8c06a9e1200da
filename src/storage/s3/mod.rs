//! S3-compatible storage backend
//!
//! This module is organized into submodules:
//! - `config`: Provider configuration and SDK client creation
//! - `error`: Mapping of SDK and HTTP failures onto storage errors
//! - `objects`: Object operations (metadata, delete, list, presigned URLs)
//! - `upload`: Upload worker (single PUT and multipart)
//! - `download`: Download worker (presigned GET with ranged resume)

/// Apply settable metadata to any SDK request builder that carries object
/// headers (`PutObject`, `CreateMultipartUpload`, `CopyObject`).
macro_rules! apply_metadata {
    ($request:expr, $metadata:expr) => {
        match $metadata {
            Some(m) => $request
                .set_cache_control(m.cache_control.clone())
                .set_content_disposition(m.content_disposition.clone())
                .set_content_encoding(m.content_encoding.clone())
                .set_content_language(m.content_language.clone())
                .set_content_type(m.content_type.clone())
                .set_metadata(if m.custom_metadata.is_empty() {
                    None
                } else {
                    Some(
                        m.custom_metadata
                            .iter()
                            .map(|(k, v)| (k.clone(), v.clone()))
                            .collect(),
                    )
                }),
            None => $request,
        }
    };
}

pub mod config;
mod download;
pub(crate) mod error;
mod objects;
mod upload;

use async_trait::async_trait;
use log::info;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use super::{
    ListOptions, ListResult, RetrySettings, StorageClient, StorageRef, TransferControl,
    TransferListener, TransferOperation,
};
use crate::error::{StorageError, TransferError};
use crate::metadata::{ObjectMetadata, TransferMetadata};

pub use config::{build_storage_config, S3Config, StorageConfigInput};
use download::DownloadJob;
use upload::{UploadJob, UploadSource};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// A download stream that stays silent this long is treated as dropped.
const READ_TIMEOUT: Duration = Duration::from_secs(60);

/// [`StorageClient`] backed by one S3-compatible account.
///
/// Transfers run as tasks on the tokio runtime the client was created on.
pub struct S3StorageClient {
    config: S3Config,
    settings: RwLock<RetrySettings>,
    http: reqwest::Client,
    runtime: tokio::runtime::Handle,
}

impl S3StorageClient {
    /// Must be called from within a tokio runtime.
    pub fn new(config: S3Config) -> Result<Self, TransferError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| TransferError::Config(format!("No tokio runtime available: {}", e)))?;
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .read_timeout(READ_TIMEOUT)
            .build()
            .map_err(|e| TransferError::Config(format!("Failed to build HTTP client: {}", e)))?;

        info!(
            "s3_client: account={} bucket={} endpoint={:?}",
            config.app_name, config.bucket, config.endpoint_url
        );

        Ok(Self {
            config,
            settings: RwLock::new(RetrySettings::default()),
            http,
            runtime,
        })
    }

    pub fn config(&self) -> &S3Config {
        &self.config
    }

    fn sdk_client(&self, timeout: Duration) -> aws_sdk_s3::Client {
        config::create_s3_client(&self.config, timeout)
    }

    fn operation_client(&self) -> aws_sdk_s3::Client {
        self.sdk_client(self.retry_settings().max_operation_retry_time)
    }

    fn spawn_upload(
        &self,
        reference: &StorageRef,
        source: UploadSource,
        metadata: Option<TransferMetadata>,
        listener: Arc<dyn TransferListener>,
    ) -> Arc<dyn TransferOperation> {
        let control = Arc::new(TransferControl::new());
        let job = UploadJob {
            client: self.sdk_client(self.retry_settings().max_upload_retry_time),
            reference: reference.clone(),
            source,
            metadata,
            control: control.clone(),
            listener,
        };
        self.runtime.spawn(job.run());
        control
    }
}

#[async_trait]
impl StorageClient for S3StorageClient {
    fn default_bucket(&self) -> &str {
        &self.config.bucket
    }

    fn retry_settings(&self) -> RetrySettings {
        *self
            .settings
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_retry_settings(&self, settings: RetrySettings) {
        *self
            .settings
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = settings;
    }

    fn put_bytes(
        &self,
        reference: &StorageRef,
        data: Vec<u8>,
        metadata: Option<TransferMetadata>,
        listener: Arc<dyn TransferListener>,
    ) -> Arc<dyn TransferOperation> {
        self.spawn_upload(reference, UploadSource::Bytes(data), metadata, listener)
    }

    fn put_file(
        &self,
        reference: &StorageRef,
        source: PathBuf,
        metadata: Option<TransferMetadata>,
        listener: Arc<dyn TransferListener>,
    ) -> Arc<dyn TransferOperation> {
        self.spawn_upload(reference, UploadSource::File(source), metadata, listener)
    }

    fn get_file(
        &self,
        reference: &StorageRef,
        destination: PathBuf,
        listener: Arc<dyn TransferListener>,
    ) -> Arc<dyn TransferOperation> {
        let control = Arc::new(TransferControl::new());
        let job = DownloadJob {
            http: self.http.clone(),
            client: self.operation_client(),
            reference: reference.clone(),
            destination,
            max_retry_time: self.retry_settings().max_download_retry_time,
            control: control.clone(),
            listener,
        };
        self.runtime.spawn(job.run());
        control
    }

    async fn delete(&self, reference: &StorageRef) -> Result<(), StorageError> {
        objects::delete(&self.operation_client(), reference).await
    }

    async fn get_metadata(&self, reference: &StorageRef) -> Result<ObjectMetadata, StorageError> {
        objects::head(&self.operation_client(), reference).await
    }

    async fn update_metadata(
        &self,
        reference: &StorageRef,
        metadata: TransferMetadata,
    ) -> Result<ObjectMetadata, StorageError> {
        objects::update_metadata(&self.operation_client(), reference, metadata).await
    }

    async fn download_url(&self, reference: &StorageRef) -> Result<String, StorageError> {
        objects::presigned_get_url(
            &self.operation_client(),
            reference,
            objects::DOWNLOAD_URL_EXPIRY,
        )
        .await
    }

    async fn list(
        &self,
        reference: &StorageRef,
        options: ListOptions,
    ) -> Result<ListResult, StorageError> {
        objects::list(&self.operation_client(), reference, options).await
    }

    async fn list_all(&self, reference: &StorageRef) -> Result<ListResult, StorageError> {
        objects::list_all(&self.operation_client(), reference).await
    }
}
