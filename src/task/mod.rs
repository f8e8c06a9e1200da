//! Transfer task lifecycle
//!
//! This module is organized into submodules:
//! - `types`: Specs, states and event payloads
//!
//! A [`TransferTask`] launches one backend operation and turns every
//! notification the backend raises into exactly one event on the
//! notification sink, tagged with the task's handle and storage context.

pub mod types;

use log::{debug, info, warn};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::classify::classify;
use crate::error::TransferError;
use crate::sink::NotificationSink;
use crate::storage::{
    NativeEvent, StorageClient, TaskSnapshot, TransferListener, TransferOperation,
};

pub use types::{
    EventKind, Handle, TaskState, TransferEvent, TransferEventPayload, TransferKind,
    TransferPayload, TransferSpec,
};

/// Identity and state shared between a task and its backend listener.
struct TaskCore {
    handle: Handle,
    kind: TransferKind,
    app_name: String,
    bucket: String,
    state: Mutex<TaskState>,
    /// Serializes deliveries of this task; never taken by the registry.
    delivery: Mutex<()>,
}

impl TaskCore {
    fn state(&self) -> MutexGuard<'_, TaskState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn delivery(&self) -> MutexGuard<'_, ()> {
        self.delivery
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub struct TransferTask {
    core: Arc<TaskCore>,
    spec: TransferSpec,
    operation: Mutex<Option<Arc<dyn TransferOperation>>>,
}

impl std::fmt::Debug for TransferTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferTask")
            .field("handle", &self.core.handle)
            .field("kind", &self.core.kind)
            .field("state", &self.state())
            .finish()
    }
}

impl TransferTask {
    pub fn new(handle: Handle, spec: TransferSpec) -> Self {
        let core = TaskCore {
            handle,
            kind: spec.kind,
            app_name: spec.reference.app_name.clone(),
            bucket: spec.reference.bucket.clone(),
            state: Mutex::new(TaskState::Created),
            delivery: Mutex::new(()),
        };
        Self {
            core: Arc::new(core),
            spec,
            operation: Mutex::new(None),
        }
    }

    pub fn handle(&self) -> Handle {
        self.core.handle
    }

    pub fn spec(&self) -> &TransferSpec {
        &self.spec
    }

    pub fn state(&self) -> TaskState {
        *self.core.state()
    }

    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    /// Launch the backend operation matching the spec's kind.
    ///
    /// Returns once the operation is handed to the backend; its outcome
    /// arrives on `sink`.
    pub fn start(
        &self,
        client: &dyn StorageClient,
        sink: Arc<dyn NotificationSink>,
    ) -> Result<Arc<dyn TransferOperation>, TransferError> {
        self.spec.validate()?;
        {
            let mut state = self.core.state();
            if *state != TaskState::Created {
                return Err(TransferError::AlreadyStarted(self.core.handle));
            }
            *state = TaskState::Running;
        }

        let listener: Arc<dyn TransferListener> = Arc::new(TaskListener {
            core: self.core.clone(),
            sink,
        });
        let reference = &self.spec.reference;
        let metadata = self.spec.metadata.clone();

        let operation = match &self.spec.payload {
            TransferPayload::Bytes(data) => {
                client.put_bytes(reference, data.clone(), metadata, listener)
            }
            TransferPayload::SourceFile(path) => {
                client.put_file(reference, path.clone(), metadata, listener)
            }
            TransferPayload::DestinationFile(path) => {
                if metadata.is_some() {
                    debug!(
                        "task_start: {} ignoring metadata for download",
                        self.core.handle
                    );
                }
                client.get_file(reference, path.clone(), listener)
            }
        };

        info!(
            "task_start: {} {:?} {}/{}",
            self.core.handle, self.core.kind, reference.bucket, reference.path
        );
        *self.operation_slot() = Some(operation.clone());
        Ok(operation)
    }

    /// Returns whether the backend accepted the request.
    pub fn pause(&self) -> bool {
        self.command("pause", |op| op.pause())
    }

    pub fn resume(&self) -> bool {
        self.command("resume", |op| op.resume())
    }

    pub fn cancel(&self) -> bool {
        self.command("cancel", |op| op.cancel())
    }

    fn operation_slot(&self) -> MutexGuard<'_, Option<Arc<dyn TransferOperation>>> {
        self.operation
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn command<F>(&self, name: &str, request: F) -> bool
    where
        F: FnOnce(&dyn TransferOperation) -> bool,
    {
        if self.is_terminal() {
            debug!(
                "task_{}: {} already {}",
                name,
                self.core.handle,
                self.state()
            );
            return false;
        }
        // The backend may answer synchronously, so no lock is held while asking.
        let operation = self.operation_slot().clone();
        let accepted = match operation {
            Some(operation) => request(&*operation),
            None => false,
        };
        debug!(
            "task_{}: {} accepted={}",
            name, self.core.handle, accepted
        );
        accepted
    }
}

/// Forwards backend notifications of one task to the sink.
struct TaskListener {
    core: Arc<TaskCore>,
    sink: Arc<dyn NotificationSink>,
}

impl TaskListener {
    fn event(
        &self,
        kind: EventKind,
        snapshot: Option<TaskSnapshot>,
        error: Option<crate::error::ErrorDetails>,
    ) -> TransferEvent {
        let snapshot = snapshot.map(|mut snapshot| {
            if !self.core.kind.is_upload() {
                snapshot.metadata = None;
            }
            snapshot
        });
        TransferEvent {
            handle: self.core.handle,
            kind,
            app_name: self.core.app_name.clone(),
            bucket: self.core.bucket.clone(),
            snapshot,
            error,
        }
    }
}

impl TransferListener for TaskListener {
    fn on_event(&self, native: NativeEvent) {
        // Transitions and deliveries of one task keep the same order. The
        // state lock is released before the sink runs.
        let _delivery = self.core.delivery();
        let event = {
            let mut state = self.core.state();
            if state.is_terminal() {
                debug!(
                    "task_event: {} dropped {:?} after {}",
                    self.core.handle, native, *state
                );
                return;
            }

            let event = match native {
                NativeEvent::Progress(snapshot) => {
                    self.event(EventKind::Progress, Some(snapshot), None)
                }
                NativeEvent::Paused(snapshot) => {
                    self.event(EventKind::Paused, Some(snapshot), None)
                }
                NativeEvent::Success(snapshot) => {
                    self.event(EventKind::Success, Some(snapshot), None)
                }
                NativeEvent::Canceled => self.event(EventKind::Canceled, None, None),
                NativeEvent::Failure(failure) => {
                    let details = classify(&*failure);
                    warn!(
                        "task_error: {} code={} message={}",
                        self.core.handle, details.code, details.message
                    );
                    self.event(EventKind::Error, None, Some(details))
                }
            };

            let next = event.kind.next_state();
            if next != *state {
                info!("task_state: {} {} -> {}", self.core.handle, *state, next);
                *state = next;
            }
            event
        };

        match serde_json::to_value(event.payload()) {
            Ok(payload) => self.sink.emit(event.name(), payload),
            Err(e) => warn!(
                "task_event: {} failed to encode {}: {}",
                self.core.handle,
                event.name(),
                e
            ),
        }
    }
}
