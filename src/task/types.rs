//! Transfer task types and event payloads

use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;

use crate::error::{ErrorDetails, TransferError};
use crate::metadata::TransferMetadata;
use crate::storage::{StorageRef, TaskSnapshot};

/// Caller-chosen identifier of one transfer.
pub type Handle = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    UploadBytes,
    UploadFile,
    DownloadFile,
}

impl TransferKind {
    pub fn is_upload(&self) -> bool {
        !matches!(self, TransferKind::DownloadFile)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferPayload {
    Bytes(Vec<u8>),
    SourceFile(PathBuf),
    DestinationFile(PathBuf),
}

impl TransferPayload {
    fn label(&self) -> &'static str {
        match self {
            TransferPayload::Bytes(_) => "bytes",
            TransferPayload::SourceFile(_) => "source file",
            TransferPayload::DestinationFile(_) => "destination file",
        }
    }
}

/// Immutable description of one transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSpec {
    pub kind: TransferKind,
    pub reference: StorageRef,
    pub payload: TransferPayload,
    /// Only meaningful for uploads.
    pub metadata: Option<TransferMetadata>,
}

impl TransferSpec {
    pub fn upload_bytes(
        reference: StorageRef,
        data: Vec<u8>,
        metadata: Option<TransferMetadata>,
    ) -> Self {
        Self {
            kind: TransferKind::UploadBytes,
            reference,
            payload: TransferPayload::Bytes(data),
            metadata,
        }
    }

    pub fn upload_file(
        reference: StorageRef,
        source: impl Into<PathBuf>,
        metadata: Option<TransferMetadata>,
    ) -> Self {
        Self {
            kind: TransferKind::UploadFile,
            reference,
            payload: TransferPayload::SourceFile(source.into()),
            metadata,
        }
    }

    pub fn download_file(reference: StorageRef, destination: impl Into<PathBuf>) -> Self {
        Self {
            kind: TransferKind::DownloadFile,
            reference,
            payload: TransferPayload::DestinationFile(destination.into()),
            metadata: None,
        }
    }

    /// The payload must match the kind.
    pub fn validate(&self) -> Result<(), TransferError> {
        let matches = matches!(
            (self.kind, &self.payload),
            (TransferKind::UploadBytes, TransferPayload::Bytes(_))
                | (TransferKind::UploadFile, TransferPayload::SourceFile(_))
                | (TransferKind::DownloadFile, TransferPayload::DestinationFile(_))
        );
        if matches {
            Ok(())
        } else {
            Err(TransferError::InvalidSpec(format!(
                "{:?} cannot carry a {} payload",
                self.kind,
                self.payload.label()
            )))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Created,
    Running,
    Paused,
    Succeeded,
    Canceled,
    Failed,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Succeeded | TaskState::Canceled | TaskState::Failed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Created => "created",
            TaskState::Running => "running",
            TaskState::Paused => "paused",
            TaskState::Succeeded => "succeeded",
            TaskState::Canceled => "canceled",
            TaskState::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Progress,
    Paused,
    Success,
    Canceled,
    Error,
}

pub const EVENT_PROGRESS: &str = "storage-task-progress";
pub const EVENT_PAUSED: &str = "storage-task-paused";
pub const EVENT_SUCCESS: &str = "storage-task-complete";
pub const EVENT_CANCELED: &str = "storage-task-cancel";
pub const EVENT_ERROR: &str = "storage-task-error";

impl EventKind {
    pub fn event_name(&self) -> &'static str {
        match self {
            EventKind::Progress => EVENT_PROGRESS,
            EventKind::Paused => EVENT_PAUSED,
            EventKind::Success => EVENT_SUCCESS,
            EventKind::Canceled => EVENT_CANCELED,
            EventKind::Error => EVENT_ERROR,
        }
    }

    /// State a live task moves to when this event is raised.
    pub(crate) fn next_state(&self) -> TaskState {
        match self {
            EventKind::Progress => TaskState::Running,
            EventKind::Paused => TaskState::Paused,
            EventKind::Success => TaskState::Succeeded,
            EventKind::Canceled => TaskState::Canceled,
            EventKind::Error => TaskState::Failed,
        }
    }
}

/// One normalized notification of a task.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferEvent {
    pub handle: Handle,
    pub kind: EventKind,
    pub app_name: String,
    pub bucket: String,
    pub snapshot: Option<TaskSnapshot>,
    pub error: Option<ErrorDetails>,
}

/// Event payload as delivered to the host
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferEventPayload {
    pub handle: Handle,
    pub app_name: String,
    pub bucket: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetails>,
}

impl TransferEvent {
    pub fn name(&self) -> &'static str {
        self.kind.event_name()
    }

    pub fn payload(&self) -> TransferEventPayload {
        TransferEventPayload {
            handle: self.handle,
            app_name: self.app_name.clone(),
            bucket: self.bucket.clone(),
            snapshot: self.snapshot.as_ref().map(TaskSnapshot::to_value),
            error: self.error.clone(),
        }
    }
}
