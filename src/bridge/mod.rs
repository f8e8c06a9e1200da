//! Named-call façade over the registry and the storage client
//!
//! This module is organized into submodules:
//! - `args`: Argument unpacking and validation
//! - `commands`: Tauri command wrapper (feature `tauri`)
//!
//! Calls are addressed as `Scope#operation` (`Task#startPut`,
//! `Reference#getMetadata`, ...) with a JSON map of arguments. Transfer
//! calls return as soon as the backend has the operation; their outcome is
//! delivered through the notification sink.

mod args;
#[cfg(feature = "tauri")]
pub mod commands;

use log::{debug, info};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;

use crate::classify::classify;
use crate::error::{StorageError, TransferError, TransferResult};
use crate::metadata;
use crate::registry::TaskRegistry;
use crate::sink::NotificationSink;
use crate::storage::StorageClient;
use crate::task::{Handle, TransferSpec};

use args::{decode_put_string, Args};

pub struct Bridge {
    registry: TaskRegistry,
    client: Arc<dyn StorageClient>,
    sink: Arc<dyn NotificationSink>,
}

fn backend(err: StorageError) -> TransferError {
    classify(&err).into()
}

fn status(accepted: bool) -> Value {
    json!({ "status": accepted })
}

impl Bridge {
    pub fn new(client: Arc<dyn StorageClient>, sink: Arc<dyn NotificationSink>) -> Self {
        Self {
            registry: TaskRegistry::new(),
            client,
            sink,
        }
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn client(&self) -> &Arc<dyn StorageClient> {
        &self.client
    }

    /// Run a call on the tokio worker pool.
    pub fn spawn_call(
        self: &Arc<Self>,
        method: String,
        arguments: Value,
    ) -> tokio::task::JoinHandle<TransferResult<Value>> {
        let bridge = self.clone();
        tokio::spawn(async move { bridge.call(&method, arguments).await })
    }

    /// Cancel every transfer and forget all tasks.
    pub fn shutdown(&self) {
        self.registry.cancel_all();
    }

    pub async fn call(&self, method: &str, arguments: Value) -> TransferResult<Value> {
        debug!("bridge_call: {}", method);
        let args = Args::new(method, &arguments)?;

        match method {
            "Storage#setMaxOperationRetryTime" => {
                let mut settings = self.client.retry_settings();
                settings.max_operation_retry_time = args.millis("time")?;
                self.client.set_retry_settings(settings);
                Ok(Value::Null)
            }
            "Storage#setMaxUploadRetryTime" => {
                let mut settings = self.client.retry_settings();
                settings.max_upload_retry_time = args.millis("time")?;
                self.client.set_retry_settings(settings);
                Ok(Value::Null)
            }
            "Storage#setMaxDownloadRetryTime" => {
                let mut settings = self.client.retry_settings();
                settings.max_download_retry_time = args.millis("time")?;
                self.client.set_retry_settings(settings);
                Ok(Value::Null)
            }
            "Storage#getConstants" => Ok(self.client.retry_settings().to_constants()),

            "Reference#delete" => {
                let reference = args.reference(self.client.default_bucket())?;
                self.client.delete(&reference).await.map_err(backend)?;
                Ok(Value::Null)
            }
            "Reference#getDownloadURL" => {
                let reference = args.reference(self.client.default_bucket())?;
                let url = self.client.download_url(&reference).await.map_err(backend)?;
                Ok(json!({ "downloadURL": url }))
            }
            "Reference#getMetadata" => {
                let reference = args.reference(self.client.default_bucket())?;
                let metadata = self.client.get_metadata(&reference).await.map_err(backend)?;
                Ok(metadata.to_value())
            }
            "Reference#list" => {
                let reference = args.reference(self.client.default_bucket())?;
                let options = args.list_options()?;
                let result = self.client.list(&reference, options).await.map_err(backend)?;
                Ok(result.to_value())
            }
            "Reference#listAll" => {
                let reference = args.reference(self.client.default_bucket())?;
                let result = self.client.list_all(&reference).await.map_err(backend)?;
                Ok(result.to_value())
            }
            "Reference#updateMetadata" => {
                let reference = args.reference(self.client.default_bucket())?;
                let update = metadata::decode(Some(args.object("metadata")?)).ok_or_else(|| {
                    TransferError::InvalidArgument(format!("{}: 'metadata' must be a map", method))
                })?;
                let updated = self
                    .client
                    .update_metadata(&reference, update)
                    .await
                    .map_err(backend)?;
                Ok(updated.to_value())
            }

            "Task#startPut" => {
                let reference = args.reference(self.client.default_bucket())?;
                let data = args.bytes("data")?;
                let spec = TransferSpec::upload_bytes(reference, data, self.metadata(&args));
                self.start(args.handle()?, spec)
            }
            "Task#startPutString" => {
                let reference = args.reference(self.client.default_bucket())?;
                let data = decode_put_string(args.str("data")?, args.str("format")?)?;
                let spec = TransferSpec::upload_bytes(reference, data, self.metadata(&args));
                self.start(args.handle()?, spec)
            }
            "Task#startPutFile" => {
                let reference = args.reference(self.client.default_bucket())?;
                let source = PathBuf::from(args.str("filePath")?);
                let spec = TransferSpec::upload_file(reference, source, self.metadata(&args));
                self.start(args.handle()?, spec)
            }
            "Task#writeToFile" => {
                let reference = args.reference(self.client.default_bucket())?;
                let destination = PathBuf::from(args.str("filePath")?);
                let spec = TransferSpec::download_file(reference, destination);
                self.start(args.handle()?, spec)
            }
            "Task#pause" => Ok(status(self.registry.pause(args.handle()?)?)),
            "Task#resume" => Ok(status(self.registry.resume(args.handle()?)?)),
            "Task#cancel" => Ok(status(self.registry.cancel(args.handle()?)?)),
            "Task#clearFinished" => Ok(json!({ "removed": self.registry.clear_finished() })),

            _ => Err(TransferError::NotImplemented(method.to_string())),
        }
    }

    fn metadata(&self, args: &Args<'_>) -> Option<metadata::TransferMetadata> {
        metadata::decode(args.get("metadata"))
    }

    fn start(&self, handle: Handle, spec: TransferSpec) -> TransferResult<Value> {
        self.registry
            .start(handle, spec, self.client.as_ref(), self.sink.clone())?;
        Ok(Value::Null)
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        if !self.registry.is_empty() {
            info!("bridge: dropping with {} tasks", self.registry.len());
        }
        self.registry.cancel_all();
    }
}
