//! Handle-keyed registry of transfer tasks

use log::{debug, info};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{TransferError, TransferResult};
use crate::sink::NotificationSink;
use crate::storage::StorageClient;
use crate::task::{Handle, TransferSpec, TransferTask};

/// Owns every task the host has started.
///
/// A handle is live while its task is registered and not terminal.
/// Terminal tasks stay registered until [`remove`](Self::remove),
/// [`clear_finished`](Self::clear_finished) or [`cancel_all`](Self::cancel_all);
/// their handle may be reused in the meantime.
#[derive(Default)]
pub struct TaskRegistry {
    tasks: Mutex<HashMap<Handle, Arc<TransferTask>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn tasks(&self) -> MutexGuard<'_, HashMap<Handle, Arc<TransferTask>>> {
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn ensure_free(tasks: &HashMap<Handle, Arc<TransferTask>>, handle: Handle) -> TransferResult<()> {
        match tasks.get(&handle) {
            Some(task) if !task.is_terminal() => Err(TransferError::DuplicateHandle(handle)),
            _ => Ok(()),
        }
    }

    pub fn register(&self, task: Arc<TransferTask>) -> TransferResult<()> {
        let handle = task.handle();
        let mut tasks = self.tasks();
        Self::ensure_free(&tasks, handle)?;
        tasks.insert(handle, task);
        debug!("registry: registered {}", handle);
        Ok(())
    }

    /// Create, register and start a task in one step.
    ///
    /// The task is registered before the backend is asked, so the handle is
    /// reserved while the map lock is released. Nothing stays registered
    /// when the start fails.
    pub fn start(
        &self,
        handle: Handle,
        spec: TransferSpec,
        client: &dyn StorageClient,
        sink: Arc<dyn NotificationSink>,
    ) -> TransferResult<Arc<TransferTask>> {
        let task = Arc::new(TransferTask::new(handle, spec));
        self.register(task.clone())?;

        if let Err(e) = task.start(client, sink) {
            let mut tasks = self.tasks();
            if tasks
                .get(&handle)
                .is_some_and(|current| Arc::ptr_eq(current, &task))
            {
                tasks.remove(&handle);
            }
            debug!("registry: start of {} failed: {}", handle, e);
            return Err(e);
        }
        Ok(task)
    }

    pub fn get(&self, handle: Handle) -> Option<Arc<TransferTask>> {
        self.tasks().get(&handle).cloned()
    }

    fn lookup(&self, handle: Handle) -> TransferResult<Arc<TransferTask>> {
        self.get(handle).ok_or(TransferError::TaskNotFound(handle))
    }

    pub fn pause(&self, handle: Handle) -> TransferResult<bool> {
        Ok(self.lookup(handle)?.pause())
    }

    pub fn resume(&self, handle: Handle) -> TransferResult<bool> {
        Ok(self.lookup(handle)?.resume())
    }

    pub fn cancel(&self, handle: Handle) -> TransferResult<bool> {
        Ok(self.lookup(handle)?.cancel())
    }

    /// Cancel every task and empty the registry. Acceptance is not checked.
    pub fn cancel_all(&self) {
        let tasks = std::mem::take(&mut *self.tasks());
        if tasks.is_empty() {
            return;
        }
        info!("registry: canceling {} tasks", tasks.len());
        for (handle, task) in tasks {
            let accepted = task.cancel();
            debug!("registry: cancel {} accepted={}", handle, accepted);
        }
    }

    pub fn remove(&self, handle: Handle) -> Option<Arc<TransferTask>> {
        self.tasks().remove(&handle)
    }

    /// Drop every terminal task. Returns how many were removed.
    pub fn clear_finished(&self) -> usize {
        let mut tasks = self.tasks();
        let before = tasks.len();
        tasks.retain(|_, task| !task.is_terminal());
        let removed = before - tasks.len();
        if removed > 0 {
            debug!("registry: cleared {} finished tasks", removed);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.tasks().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks().is_empty()
    }

    pub fn handles(&self) -> Vec<Handle> {
        let mut handles: Vec<Handle> = self.tasks().keys().copied().collect();
        handles.sort_unstable();
        handles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{NativeEvent, StorageRef, TaskSnapshot};
    use crate::task::TaskState;
    use crate::testing::{FakeStorageClient, RecordingSink};
    use serde_json::Value;
    use std::collections::HashMap;
    use std::sync::mpsc;
    use std::sync::Weak;
    use std::thread;
    use std::time::{Duration, Instant};

    fn spec() -> TransferSpec {
        TransferSpec::upload_bytes(StorageRef::new("acct", "photos", "a.bin"), vec![0; 100], None)
    }

    fn snapshot(sent: u64, total: u64) -> TaskSnapshot {
        TaskSnapshot {
            path: "a.bin".to_string(),
            bytes_transferred: sent,
            total_bytes: total,
            metadata: None,
        }
    }

    #[test]
    fn commands_on_unknown_handles_fail() {
        let registry = TaskRegistry::new();
        assert_eq!(registry.pause(1), Err(TransferError::TaskNotFound(1)));
        assert_eq!(registry.resume(1), Err(TransferError::TaskNotFound(1)));
        assert_eq!(registry.cancel(1), Err(TransferError::TaskNotFound(1)));
        assert!(registry.get(1).is_none());
    }

    #[test]
    fn duplicate_live_handle_is_rejected() {
        let registry = TaskRegistry::new();
        registry
            .register(Arc::new(TransferTask::new(1, spec())))
            .unwrap();
        assert_eq!(
            registry.register(Arc::new(TransferTask::new(1, spec()))),
            Err(TransferError::DuplicateHandle(1))
        );

        let client = FakeStorageClient::new();
        let sink = Arc::new(RecordingSink::default());
        assert!(matches!(
            registry.start(1, spec(), &client, sink),
            Err(TransferError::DuplicateHandle(1))
        ));
        assert_eq!(client.started(), 0);
    }

    #[test]
    fn failed_start_registers_nothing() {
        let registry = TaskRegistry::new();
        let client = FakeStorageClient::new();
        let sink = Arc::new(RecordingSink::default());
        let mut bad = spec();
        bad.kind = crate::task::TransferKind::DownloadFile;

        assert!(matches!(
            registry.start(5, bad, &client, sink),
            Err(TransferError::InvalidSpec(_))
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn upload_completes_and_stops_accepting_pause() {
        let registry = TaskRegistry::new();
        let client = FakeStorageClient::new();
        let sink = Arc::new(RecordingSink::default());

        registry.start(42, spec(), &client, sink.clone()).unwrap();
        let op = client.last_operation();
        op.emit(NativeEvent::Progress(snapshot(50, 100)));
        op.emit(NativeEvent::Success(snapshot(100, 100)));

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].0, "storage-task-progress");
        assert_eq!(events[0].1["handle"], 42);
        assert_eq!(events[0].1["snapshot"]["bytesTransferred"], 50);
        assert_eq!(events[0].1["snapshot"]["totalBytes"], 100);
        assert_eq!(events[1].0, "storage-task-complete");
        assert_eq!(events[1].1["handle"], 42);
        assert_eq!(events[1].1["snapshot"]["bytesTransferred"], 100);
        assert_eq!(events[1].1["snapshot"]["totalBytes"], 100);

        assert_eq!(registry.pause(42), Ok(false));
        assert_eq!(registry.cancel(42), Ok(false));
        assert_eq!(op.pause_calls(), 0);
        assert_eq!(registry.get(42).unwrap().state(), TaskState::Succeeded);
    }

    #[test]
    fn terminal_handle_can_be_reused() {
        let registry = TaskRegistry::new();
        let client = FakeStorageClient::new();
        let sink = Arc::new(RecordingSink::default());

        registry.start(7, spec(), &client, sink.clone()).unwrap();
        client.last_operation().emit(NativeEvent::Canceled);

        let task = registry.start(7, spec(), &client, sink).unwrap();
        assert_eq!(task.state(), TaskState::Running);
        assert_eq!(registry.len(), 1);
        assert_eq!(client.started(), 2);
    }

    #[test]
    fn cancel_all_cancels_each_task_once_and_empties() {
        let registry = TaskRegistry::new();
        let client = FakeStorageClient::new();
        let sink = Arc::new(RecordingSink::default());

        registry.start(1, spec(), &client, sink.clone()).unwrap();
        registry.start(2, spec(), &client, sink).unwrap();
        client.operation(1).set_accepts(false);

        registry.cancel_all();

        assert!(registry.is_empty());
        assert_eq!(client.operation(0).cancel_calls(), 1);
        assert_eq!(client.operation(1).cancel_calls(), 1);
    }

    #[test]
    fn lifecycle_commands_delegate() {
        let registry = TaskRegistry::new();
        let client = FakeStorageClient::new();
        let sink = Arc::new(RecordingSink::default());

        registry.start(3, spec(), &client, sink).unwrap();
        let op = client.last_operation();
        assert_eq!(registry.pause(3), Ok(true));
        assert_eq!(registry.resume(3), Ok(true));
        op.set_accepts(false);
        assert_eq!(registry.cancel(3), Ok(false));
        assert_eq!(op.pause_calls(), 1);
        assert_eq!(op.resume_calls(), 1);
        assert_eq!(op.cancel_calls(), 1);
    }

    #[test]
    fn clear_finished_keeps_live_tasks() {
        let registry = TaskRegistry::new();
        let client = FakeStorageClient::new();
        let sink = Arc::new(RecordingSink::default());

        registry.start(1, spec(), &client, sink.clone()).unwrap();
        registry.start(2, spec(), &client, sink).unwrap();
        client
            .operation(0)
            .emit(NativeEvent::Success(snapshot(100, 100)));

        assert_eq!(registry.clear_finished(), 1);
        assert_eq!(registry.handles(), vec![2]);
        assert!(registry.remove(2).is_some());
        assert!(registry.is_empty());
    }

    /// Clears finished tasks from inside the delivery of a completion.
    struct ClearingSink {
        registry: Mutex<Weak<TaskRegistry>>,
        cleared: Mutex<Vec<usize>>,
    }

    impl NotificationSink for ClearingSink {
        fn emit(&self, event: &str, _payload: Value) {
            if event != "storage-task-complete" {
                return;
            }
            let registry = self.registry.lock().unwrap().upgrade();
            if let Some(registry) = registry {
                let removed = registry.clear_finished();
                self.cleared.lock().unwrap().push(removed);
            }
        }
    }

    /// Blocks inside `emit` until released.
    struct SlowSink {
        entered: Mutex<mpsc::Sender<()>>,
        hold: Duration,
    }

    impl NotificationSink for SlowSink {
        fn emit(&self, _event: &str, _payload: Value) {
            let _ = self.entered.lock().unwrap().send(());
            thread::sleep(self.hold);
        }
    }

    #[test]
    fn sink_may_call_back_into_the_registry() {
        let registry = Arc::new(TaskRegistry::new());
        let sink = Arc::new(ClearingSink {
            registry: Mutex::new(Arc::downgrade(&registry)),
            cleared: Mutex::new(Vec::new()),
        });
        let client = FakeStorageClient::new();
        registry.start(1, spec(), &client, sink.clone()).unwrap();
        let op = client.last_operation();

        let (done_tx, done_rx) = mpsc::channel();
        thread::spawn(move || {
            op.emit(NativeEvent::Success(snapshot(100, 100)));
            done_tx.send(()).unwrap();
        });

        done_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("completion delivery never returned");
        assert_eq!(*sink.cleared.lock().unwrap(), vec![1]);
        assert!(registry.is_empty());
    }

    #[test]
    fn registry_is_not_blocked_by_a_slow_delivery() {
        let registry = Arc::new(TaskRegistry::new());
        let (entered_tx, entered_rx) = mpsc::channel();
        let sink = Arc::new(SlowSink {
            entered: Mutex::new(entered_tx),
            hold: Duration::from_millis(800),
        });
        let client = FakeStorageClient::new();
        registry.start(1, spec(), &client, sink).unwrap();
        let op = client.last_operation();

        let delivery = thread::spawn(move || op.emit(NativeEvent::Success(snapshot(100, 100))));
        entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let started = Instant::now();
        assert_eq!(registry.clear_finished(), 1);
        let other = FakeStorageClient::new();
        registry
            .start(2, spec(), &other, Arc::new(RecordingSink::default()))
            .unwrap();
        assert!(started.elapsed() < Duration::from_millis(400));
        delivery.join().unwrap();
    }

    #[test]
    fn concurrent_workers_and_sweeper_keep_per_handle_order() {
        const WORKERS: i64 = 4;
        const PER_WORKER: i64 = 25;

        let registry = Arc::new(TaskRegistry::new());
        let sink = Arc::new(RecordingSink::default());
        let (done_tx, done_rx) = mpsc::channel();

        for worker in 0..WORKERS {
            let registry = registry.clone();
            let sink = sink.clone();
            let done_tx = done_tx.clone();
            thread::spawn(move || {
                let client = FakeStorageClient::new();
                for i in 0..PER_WORKER {
                    let handle = worker * 1000 + i;
                    registry
                        .start(handle, spec(), &client, sink.clone())
                        .unwrap();
                    let op = client.last_operation();
                    op.emit(NativeEvent::Progress(snapshot(50, 100)));
                    assert!(registry.get(handle).is_some());
                    if i % 2 == 0 {
                        op.emit(NativeEvent::Success(snapshot(100, 100)));
                    } else {
                        assert_eq!(registry.cancel(handle), Ok(true));
                        op.emit(NativeEvent::Canceled);
                    }
                }
                // Leave one live task per worker behind
                registry
                    .start(worker * 1000 + PER_WORKER, spec(), &client, sink)
                    .unwrap();
                done_tx.send(()).unwrap();
            });
        }

        let sweeping = Arc::new(std::sync::atomic::AtomicBool::new(true));
        let sweeper = {
            let registry = registry.clone();
            let sweeping = sweeping.clone();
            thread::spawn(move || {
                let mut removed = 0;
                while sweeping.load(std::sync::atomic::Ordering::SeqCst) {
                    removed += registry.clear_finished();
                    let _ = registry.handles();
                    thread::yield_now();
                }
                removed
            })
        };

        for _ in 0..WORKERS {
            done_rx
                .recv_timeout(Duration::from_secs(10))
                .expect("worker did not finish");
        }
        sweeping.store(false, std::sync::atomic::Ordering::SeqCst);
        let swept = sweeper.join().unwrap();

        let leftover_finished = registry.clear_finished();
        assert_eq!(
            swept + leftover_finished,
            (WORKERS * PER_WORKER) as usize
        );
        assert_eq!(registry.len(), WORKERS as usize);

        let mut per_handle: HashMap<i64, Vec<String>> = HashMap::new();
        for (name, payload) in sink.events() {
            let handle = payload["handle"].as_i64().unwrap();
            per_handle.entry(handle).or_default().push(name);
        }
        assert_eq!(per_handle.len(), (WORKERS * PER_WORKER) as usize);
        for (handle, names) in per_handle {
            let last = if (handle % 1000) % 2 == 0 {
                "storage-task-complete"
            } else {
                "storage-task-cancel"
            };
            assert_eq!(names, vec!["storage-task-progress", last], "handle {}", handle);
        }

        registry.cancel_all();
        assert!(registry.is_empty());
    }
}
