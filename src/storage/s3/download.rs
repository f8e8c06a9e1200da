//! Download worker - presigned GET streamed to disk with ranged resume

use aws_sdk_s3::Client;
use futures_util::StreamExt;
use log::{debug, info, warn};
use reqwest::header::RANGE;
use reqwest::StatusCode;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::fs::File;
use tokio::io::{AsyncSeekExt, AsyncWriteExt, SeekFrom};

use super::error::from_status;
use super::objects;
use crate::error::{StorageError, StorageErrorCode};
use crate::storage::{
    Checkpoint, NativeEvent, StorageRef, TaskSnapshot, TransferControl, TransferListener,
};

/// Write buffer size for downloads (2 MB) - reduces I/O operations
const WRITE_BUFFER_SIZE: usize = 2 * 1024 * 1024;
/// Presigned URLs are generated per request, so they only need to outlive one.
const PRESIGN_EXPIRY: Duration = Duration::from_secs(3600);
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(32);

pub(crate) struct DownloadJob {
    pub http: reqwest::Client,
    /// Used for presigning only.
    pub client: Client,
    pub reference: StorageRef,
    pub destination: PathBuf,
    /// Give up after this long without progress.
    pub max_retry_time: Duration,
    pub control: Arc<TransferControl>,
    pub listener: Arc<dyn TransferListener>,
}

/// How one GET attempt ended.
enum Attempt {
    Done,
    Paused,
    Canceled,
    Retry(StorageError),
}

/// The partially written destination file.
struct Partial {
    file: File,
    written: u64,
    total: u64,
    last_progress: Instant,
}

impl DownloadJob {
    pub async fn run(self) {
        match self.download().await {
            Ok(Some(snapshot)) => {
                if self.control.finish() {
                    info!(
                        "download: {} -> {} completed ({} bytes)",
                        self.reference.path,
                        self.destination.display(),
                        snapshot.bytes_transferred
                    );
                    self.listener.on_event(NativeEvent::Success(snapshot));
                } else {
                    self.discard().await;
                    self.listener.on_event(NativeEvent::Canceled);
                }
            }
            Ok(None) => {
                self.control.close();
                self.discard().await;
                info!("download: {} canceled", self.reference.path);
                self.listener.on_event(NativeEvent::Canceled);
            }
            Err(err) => {
                self.control.close();
                self.discard().await;
                if self.control.is_cancelled() {
                    self.listener.on_event(NativeEvent::Canceled);
                } else {
                    warn!("download: {} failed: {}", self.reference.path, err);
                    self.listener.on_event(NativeEvent::Failure(Box::new(err)));
                }
            }
        }
    }

    async fn discard(&self) {
        let _ = tokio::fs::remove_file(&self.destination).await;
    }

    /// `Ok(None)` when the download was canceled.
    async fn download(&self) -> Result<Option<TaskSnapshot>, StorageError> {
        // Create parent directories if needed
        if let Some(parent) = self.destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut partial = Partial {
            file: File::create(&self.destination).await?,
            written: 0,
            total: 0,
            last_progress: Instant::now(),
        };

        self.listener
            .on_event(NativeEvent::Progress(self.snapshot(&partial)));

        let mut backoff = INITIAL_BACKOFF;
        loop {
            let checkpoint = self
                .control
                .checkpoint(&*self.listener, || self.snapshot(&partial))
                .await;
            match checkpoint {
                Checkpoint::Canceled => return Ok(None),
                // Time spent paused does not count against the retry ceiling
                Checkpoint::Resumed => {
                    partial.last_progress = Instant::now();
                    backoff = INITIAL_BACKOFF;
                }
                Checkpoint::Continue => {}
            }

            let before = partial.written;
            match self.attempt(&mut partial).await? {
                Attempt::Done => break,
                Attempt::Paused => continue,
                Attempt::Canceled => return Ok(None),
                Attempt::Retry(err) => {
                    if partial.written > before {
                        backoff = INITIAL_BACKOFF;
                    }
                    if partial.last_progress.elapsed() >= self.max_retry_time {
                        return Err(StorageError::new(
                            StorageErrorCode::RetryLimitExceeded,
                            format!("Download retry limit exceeded: {}", err.message),
                        )
                        .with_cause(err));
                    }
                    warn!(
                        "download: {} interrupted at {} bytes, retrying in {:?}: {}",
                        self.reference.path, partial.written, backoff, err
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = self.control.cancelled() => return Ok(None),
                    }
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }

        partial.file.flush().await?;
        if partial.total < partial.written {
            partial.total = partial.written;
        }
        Ok(Some(self.snapshot(&partial)))
    }

    async fn attempt(&self, partial: &mut Partial) -> Result<Attempt, StorageError> {
        // Fresh URL every time; a long pause may outlive the previous one
        let url = objects::presigned_get_url(&self.client, &self.reference, PRESIGN_EXPIRY).await?;

        let mut request = self.http.get(&url);
        if partial.written > 0 {
            request = request.header(RANGE, format!("bytes={}-", partial.written));
        }

        let response = tokio::select! {
            result = request.send() => result,
            _ = self.control.cancelled() => return Ok(Attempt::Canceled),
        };
        let response = match response {
            Ok(response) => response,
            Err(e) => return Ok(Attempt::Retry(transport_error("Download request failed", &e))),
        };

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let err = from_status(status.as_u16(), &text);
            if status.is_server_error() {
                return Ok(Attempt::Retry(err));
            }
            return Err(err);
        }

        if partial.written > 0 && status != StatusCode::PARTIAL_CONTENT {
            debug!(
                "download: range ignored for {}, restarting from zero",
                self.reference.path
            );
            partial.file.set_len(0).await?;
            partial.file.seek(SeekFrom::Start(0)).await?;
            partial.written = 0;
        }

        let expected = response.content_length().map(|len| partial.written + len);
        if let Some(expected) = expected {
            partial.total = expected;
        }

        // Stream the response body to the file with buffered writes
        let mut stream = response.bytes_stream();
        let mut buffer = Vec::with_capacity(WRITE_BUFFER_SIZE);

        loop {
            let next = tokio::select! {
                next = stream.next() => next,
                _ = self.control.cancelled() => return Ok(Attempt::Canceled),
            };

            match next {
                Some(Ok(chunk)) => {
                    buffer.extend_from_slice(&chunk);
                    if buffer.len() >= WRITE_BUFFER_SIZE {
                        self.flush(partial, &mut buffer).await?;
                    }
                    if self.control.pause_requested() {
                        self.flush(partial, &mut buffer).await?;
                        return Ok(Attempt::Paused);
                    }
                }
                Some(Err(e)) => {
                    self.flush(partial, &mut buffer).await?;
                    return Ok(Attempt::Retry(transport_error("Failed to read chunk", &e)));
                }
                None => {
                    self.flush(partial, &mut buffer).await?;
                    return Ok(match expected {
                        Some(expected) if partial.written < expected => {
                            Attempt::Retry(StorageError::from(io::Error::new(
                                io::ErrorKind::UnexpectedEof,
                                format!(
                                    "Connection closed at {} of {} bytes",
                                    partial.written, expected
                                ),
                            )))
                        }
                        _ => Attempt::Done,
                    });
                }
            }
        }
    }

    async fn flush(&self, partial: &mut Partial, buffer: &mut Vec<u8>) -> Result<(), StorageError> {
        if buffer.is_empty() {
            return Ok(());
        }
        partial.file.write_all(buffer).await?;
        partial.written += buffer.len() as u64;
        partial.last_progress = Instant::now();
        buffer.clear();

        self.listener
            .on_event(NativeEvent::Progress(self.snapshot(partial)));
        Ok(())
    }

    fn snapshot(&self, partial: &Partial) -> TaskSnapshot {
        TaskSnapshot {
            path: self.reference.path.clone(),
            bytes_transferred: partial.written,
            total_bytes: partial.total,
            metadata: None,
        }
    }
}

/// Connection-level failure, kept as an `io::Error` cause.
fn transport_error(context: &str, err: &reqwest::Error) -> StorageError {
    let kind = if err.is_timeout() {
        io::ErrorKind::TimedOut
    } else {
        io::ErrorKind::Other
    };
    StorageError::new(StorageErrorCode::Unknown, format!("{}: {}", context, err))
        .with_cause(io::Error::new(kind, err.to_string()))
}
