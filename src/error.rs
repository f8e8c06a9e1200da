//! Error types shared by the registry, the tasks and the storage backends

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::task::Handle;

pub type TransferResult<T> = Result<T, TransferError>;

/// Synchronous failures surfaced to the caller of a registry or façade operation.
///
/// Backend failures of a running transfer never show up here; they arrive as a
/// terminal error event on the task's stream instead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransferError {
    #[error("a task with handle {0} is already registered")]
    DuplicateHandle(Handle),

    #[error("no task is registered for handle {0}")]
    TaskNotFound(Handle),

    #[error("invalid transfer spec: {0}")]
    InvalidSpec(String),

    #[error("task {0} has already been started")]
    AlreadyStarted(Handle),

    #[error("{message}")]
    BackendFailure { code: String, message: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("method not implemented: {0}")]
    NotImplemented(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl TransferError {
    /// Stable hyphenated code used when the error crosses the host boundary.
    pub fn code(&self) -> &str {
        match self {
            TransferError::DuplicateHandle(_) => "duplicate-handle",
            TransferError::TaskNotFound(_) => "task-not-found",
            TransferError::InvalidSpec(_) => "invalid-spec",
            TransferError::AlreadyStarted(_) => "already-started",
            TransferError::BackendFailure { code, .. } => code,
            TransferError::InvalidArgument(_) => "invalid-argument",
            TransferError::NotImplemented(_) => "not-implemented",
            TransferError::Config(_) => "invalid-config",
        }
    }

    pub fn details(&self) -> ErrorDetails {
        ErrorDetails {
            code: self.code().to_string(),
            message: self.to_string(),
        }
    }
}

impl From<ErrorDetails> for TransferError {
    fn from(details: ErrorDetails) -> Self {
        TransferError::BackendFailure {
            code: details.code,
            message: details.message,
        }
    }
}

/// Classified `(code, message)` pair relayed to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: String,
    pub message: String,
}

/// Failure categories reported by a storage backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageErrorCode {
    Unknown,
    ObjectNotFound,
    BucketNotFound,
    ProjectNotFound,
    QuotaExceeded,
    NotAuthenticated,
    NotAuthorized,
    RetryLimitExceeded,
    InvalidChecksum,
    Canceled,
}

impl StorageErrorCode {
    /// Symbolic name as the backend spells it.
    pub fn name(&self) -> &'static str {
        match self {
            StorageErrorCode::Unknown => "UNKNOWN",
            StorageErrorCode::ObjectNotFound => "OBJECT_NOT_FOUND",
            StorageErrorCode::BucketNotFound => "BUCKET_NOT_FOUND",
            StorageErrorCode::ProjectNotFound => "PROJECT_NOT_FOUND",
            StorageErrorCode::QuotaExceeded => "QUOTA_EXCEEDED",
            StorageErrorCode::NotAuthenticated => "NOT_AUTHENTICATED",
            StorageErrorCode::NotAuthorized => "NOT_AUTHORIZED",
            StorageErrorCode::RetryLimitExceeded => "RETRY_LIMIT_EXCEEDED",
            StorageErrorCode::InvalidChecksum => "INVALID_CHECKSUM",
            StorageErrorCode::Canceled => "CANCELED",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            StorageErrorCode::Unknown => "An unknown error occurred.",
            StorageErrorCode::ObjectNotFound => "No object exists at the desired reference.",
            StorageErrorCode::BucketNotFound => "No bucket is configured for the storage account.",
            StorageErrorCode::ProjectNotFound => "No project is configured for the storage account.",
            StorageErrorCode::QuotaExceeded => "Quota on the storage bucket has been exceeded.",
            StorageErrorCode::NotAuthenticated => "User is not authenticated.",
            StorageErrorCode::NotAuthorized => {
                "User does not have permission to access this object."
            }
            StorageErrorCode::RetryLimitExceeded => {
                "The maximum time limit on an operation has been exceeded."
            }
            StorageErrorCode::InvalidChecksum => {
                "File on the client does not match the checksum of the file received by the server."
            }
            StorageErrorCode::Canceled => "User cancelled the operation.",
        }
    }
}

impl fmt::Display for StorageErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A recognized storage-backend failure, optionally wrapping the transport
/// error that caused it.
#[derive(Error, Debug)]
#[error("{message}")]
pub struct StorageError {
    pub code: StorageErrorCode,
    pub message: String,
    #[source]
    pub cause: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl StorageError {
    pub fn new(code: StorageErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            cause: None,
        }
    }

    /// Error carrying the code's stock description as its message.
    pub fn from_code(code: StorageErrorCode) -> Self {
        Self::new(code, code.description())
    }

    pub fn with_cause(
        mut self,
        cause: impl Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
    ) -> Self {
        self.cause = Some(cause.into());
        self
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::new(StorageErrorCode::Unknown, err.to_string()).with_cause(err)
    }
}
