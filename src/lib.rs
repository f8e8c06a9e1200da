//! Handle-keyed registry of pausable, cancelable object-storage transfers.
//!
//! This crate is organized into modules:
//! - `metadata`: Object metadata records and their structured-value encoding
//! - `classify`: Raw backend failures to stable `(code, message)` pairs
//! - `storage`: Storage client contract and the S3-compatible backend
//! - `task`: Transfer task state machine and event payloads
//! - `registry`: Handle-keyed table of tasks
//! - `sink`: Notification sinks carrying events to the host
//! - `bridge`: Named-call façade (`Task#startPut`, `Reference#list`, ...)

pub mod bridge;
pub mod classify;
pub mod error;
pub mod metadata;
pub mod registry;
pub mod sink;
pub mod storage;
pub mod task;

#[cfg(test)]
mod testing;

pub use bridge::Bridge;
pub use classify::classify;
pub use error::{ErrorDetails, StorageError, StorageErrorCode, TransferError, TransferResult};
pub use metadata::{ObjectMetadata, TransferMetadata};
pub use registry::TaskRegistry;
pub use sink::{ChannelSink, LogSink, NotificationSink, SinkMessage};
pub use storage::s3::{build_storage_config, S3Config, S3StorageClient, StorageConfigInput};
pub use storage::{
    NativeEvent, RetrySettings, StorageClient, StorageRef, TaskSnapshot, TransferListener,
    TransferOperation,
};
pub use task::{EventKind, Handle, TaskState, TransferEvent, TransferSpec, TransferTask};
