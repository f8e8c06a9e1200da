//! Pause/resume/cancel state shared between a backend worker and its controllers

use log::debug;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::Notify;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use super::{NativeEvent, TaskSnapshot, TransferListener};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Running,
    PauseRequested,
    Paused,
    /// Inside a request that cannot stop halfway; pausing is refused.
    Committing,
    Finished,
}

/// Outcome of a worker checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkpoint {
    /// No pause was pending.
    Continue,
    /// The worker was paused and has been resumed.
    Resumed,
    Canceled,
}

/// Control cell of one backend transfer.
///
/// Controllers call `request_*`; the worker calls [`checkpoint`] between
/// chunks and [`finish`]/[`close`] when it stops. Once closed every request
/// is rejected.
///
/// [`checkpoint`]: TransferControl::checkpoint
/// [`finish`]: TransferControl::finish
/// [`close`]: TransferControl::close
#[derive(Debug)]
pub struct TransferControl {
    phase: Mutex<Phase>,
    resumed: Notify,
    cancel: CancellationToken,
}

impl Default for TransferControl {
    fn default() -> Self {
        Self::new()
    }
}

impl TransferControl {
    pub fn new() -> Self {
        Self {
            phase: Mutex::new(Phase::Running),
            resumed: Notify::new(),
            cancel: CancellationToken::new(),
        }
    }

    fn phase(&self) -> MutexGuard<'_, Phase> {
        self.phase.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn request_pause(&self) -> bool {
        let mut phase = self.phase();
        if *phase == Phase::Committing {
            debug!("transfer: pause rejected while a single request is in flight");
            return false;
        }
        if *phase != Phase::Running || self.cancel.is_cancelled() {
            return false;
        }
        *phase = Phase::PauseRequested;
        true
    }

    pub fn request_resume(&self) -> bool {
        let mut phase = self.phase();
        match *phase {
            Phase::PauseRequested => {
                *phase = Phase::Running;
                true
            }
            Phase::Paused => {
                *phase = Phase::Running;
                self.resumed.notify_one();
                true
            }
            Phase::Running | Phase::Committing | Phase::Finished => false,
        }
    }

    pub fn request_cancel(&self) -> bool {
        let phase = self.phase();
        if *phase == Phase::Finished || self.cancel.is_cancelled() {
            return false;
        }
        self.cancel.cancel();
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn pause_requested(&self) -> bool {
        *self.phase() == Phase::PauseRequested
    }

    /// Resolves once a cancel request was accepted.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    /// Park the worker if a pause is pending.
    ///
    /// Raises `Paused` with the snapshot, then waits until the transfer is
    /// resumed or canceled.
    pub async fn checkpoint<F>(&self, listener: &dyn TransferListener, snapshot: F) -> Checkpoint
    where
        F: FnOnce() -> TaskSnapshot,
    {
        if self.cancel.is_cancelled() {
            return Checkpoint::Canceled;
        }
        {
            let mut phase = self.phase();
            if *phase != Phase::PauseRequested {
                return Checkpoint::Continue;
            }
            *phase = Phase::Paused;
        }

        listener.on_event(NativeEvent::Paused(snapshot()));

        loop {
            if self.cancel.is_cancelled() {
                return Checkpoint::Canceled;
            }
            if *self.phase() != Phase::Paused {
                return Checkpoint::Resumed;
            }
            tokio::select! {
                _ = self.resumed.notified() => {}
                _ = self.cancel.cancelled() => {}
            }
        }
    }

    /// Enter a section that cannot be paused. Returns `false` when a pause is
    /// pending; the worker should go through [`checkpoint`] first.
    ///
    /// [`checkpoint`]: TransferControl::checkpoint
    pub fn begin_commit(&self) -> bool {
        let mut phase = self.phase();
        match *phase {
            Phase::Running => {
                *phase = Phase::Committing;
                true
            }
            Phase::Committing => true,
            Phase::PauseRequested | Phase::Paused | Phase::Finished => false,
        }
    }

    /// Mark the transfer complete. Returns `false` when a cancel request won
    /// the race, in which case the worker reports a cancellation instead.
    pub fn finish(&self) -> bool {
        let mut phase = self.phase();
        if self.cancel.is_cancelled() {
            *phase = Phase::Finished;
            return false;
        }
        *phase = Phase::Finished;
        true
    }

    /// Stop accepting requests (after a cancellation or failure).
    pub fn close(&self) {
        *self.phase() = Phase::Finished;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl TransferListener for Recorder {
        fn on_event(&self, event: NativeEvent) {
            let tag = match event {
                NativeEvent::Progress(_) => "progress",
                NativeEvent::Paused(_) => "paused",
                NativeEvent::Success(_) => "success",
                NativeEvent::Canceled => "canceled",
                NativeEvent::Failure(_) => "failure",
            };
            self.0.lock().unwrap().push(tag.to_string());
        }
    }

    fn snapshot() -> TaskSnapshot {
        TaskSnapshot {
            path: "x".to_string(),
            bytes_transferred: 1,
            total_bytes: 2,
            metadata: None,
        }
    }

    #[test]
    fn requests_are_rejected_when_they_would_be_no_ops() {
        let control = TransferControl::new();
        assert!(!control.request_resume());
        assert!(control.request_pause());
        assert!(!control.request_pause());
        assert!(control.request_resume());
        assert!(control.request_cancel());
        assert!(!control.request_cancel());
        assert!(!control.request_pause());
    }

    #[test]
    fn finished_transfer_rejects_everything() {
        let control = TransferControl::new();
        assert!(control.finish());
        assert!(!control.request_pause());
        assert!(!control.request_resume());
        assert!(!control.request_cancel());
    }

    #[test]
    fn cancel_before_finish_wins() {
        let control = TransferControl::new();
        assert!(control.request_cancel());
        assert!(!control.finish());
    }

    #[test]
    fn pause_is_refused_while_committing() {
        let control = TransferControl::new();
        assert!(control.begin_commit());
        assert!(!control.request_pause());
        assert!(!control.request_resume());
        assert!(!control.pause_requested());
        assert!(control.request_cancel());
        assert!(!control.finish());
    }

    #[test]
    fn commit_waits_for_a_pending_pause() {
        let control = TransferControl::new();
        assert!(control.request_pause());
        assert!(!control.begin_commit());
        assert!(control.request_resume());
        assert!(control.begin_commit());
    }

    #[tokio::test]
    async fn checkpoint_without_pending_pause_continues() {
        let control = TransferControl::new();
        let recorder = Recorder::default();
        assert_eq!(
            control.checkpoint(&recorder, snapshot).await,
            Checkpoint::Continue
        );
        assert!(recorder.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn checkpoint_parks_until_resumed() {
        let control = Arc::new(TransferControl::new());
        let recorder = Arc::new(Recorder::default());
        assert!(control.request_pause());

        let worker = {
            let control = control.clone();
            let recorder = recorder.clone();
            tokio::spawn(async move { control.checkpoint(&*recorder, snapshot).await })
        };

        while recorder.0.lock().unwrap().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(control.request_resume());
        assert_eq!(worker.await.unwrap(), Checkpoint::Resumed);
        assert_eq!(*recorder.0.lock().unwrap(), vec!["paused".to_string()]);
    }

    #[tokio::test]
    async fn cancel_wakes_a_paused_worker() {
        let control = Arc::new(TransferControl::new());
        let recorder = Arc::new(Recorder::default());
        assert!(control.request_pause());

        let worker = {
            let control = control.clone();
            let recorder = recorder.clone();
            tokio::spawn(async move { control.checkpoint(&*recorder, snapshot).await })
        };

        while recorder.0.lock().unwrap().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(control.request_cancel());
        assert_eq!(worker.await.unwrap(), Checkpoint::Canceled);
    }
}
