//! Upload worker (single PUT below the multipart threshold, sequential multipart above)

use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use log::{debug, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use super::error::from_sdk_error;
use super::objects;
use crate::error::{StorageError, StorageErrorCode};
use crate::metadata::{ObjectMetadata, TransferMetadata};
use crate::storage::{
    Checkpoint, NativeEvent, StorageRef, TaskSnapshot, TransferControl, TransferListener,
};

/// Objects at least this large go through multipart upload (100 MB)
const MULTIPART_THRESHOLD: u64 = 100 * 1024 * 1024;
/// Part size for multipart uploads (20 MB)
const PART_SIZE: u64 = 20 * 1024 * 1024;

pub(crate) enum UploadSource {
    Bytes(Vec<u8>),
    File(PathBuf),
}

/// Reads parts from the upload source in order.
enum PartReader {
    Bytes { data: Vec<u8>, offset: usize },
    File(File),
}

impl PartReader {
    async fn next_part(&mut self, len: usize) -> Result<Vec<u8>, StorageError> {
        match self {
            PartReader::Bytes { data, offset } => {
                let end = (*offset + len).min(data.len());
                let part = data[*offset..end].to_vec();
                *offset = end;
                Ok(part)
            }
            PartReader::File(file) => {
                let mut part = vec![0u8; len];
                file.read_exact(&mut part)
                    .await
                    .map_err(|e| read_error(&e))?;
                Ok(part)
            }
        }
    }
}

fn read_error(err: &dyn std::fmt::Display) -> StorageError {
    StorageError::new(
        StorageErrorCode::Unknown,
        format!("Failed to read upload source: {}", err),
    )
}

pub(crate) struct UploadJob {
    pub client: Client,
    pub reference: StorageRef,
    pub source: UploadSource,
    pub metadata: Option<TransferMetadata>,
    pub control: Arc<TransferControl>,
    pub listener: Arc<dyn TransferListener>,
}

impl UploadJob {
    pub async fn run(mut self) {
        let source = std::mem::replace(&mut self.source, UploadSource::Bytes(Vec::new()));
        let key = self.reference.path.clone();

        match self.upload(source).await {
            Ok(Some(snapshot)) => {
                if self.control.finish() {
                    info!("upload: {} completed ({} bytes)", key, snapshot.total_bytes);
                    self.listener.on_event(NativeEvent::Success(snapshot));
                } else {
                    self.listener.on_event(NativeEvent::Canceled);
                }
            }
            Ok(None) => {
                self.control.close();
                info!("upload: {} canceled", key);
                self.listener.on_event(NativeEvent::Canceled);
            }
            Err(err) => {
                self.control.close();
                if self.control.is_cancelled() {
                    self.listener.on_event(NativeEvent::Canceled);
                } else {
                    warn!("upload: {} failed: {}", key, err);
                    self.listener.on_event(NativeEvent::Failure(Box::new(err)));
                }
            }
        }
    }

    /// `Ok(None)` when the upload was canceled.
    async fn upload(&self, source: UploadSource) -> Result<Option<TaskSnapshot>, StorageError> {
        let total = match &source {
            UploadSource::Bytes(data) => data.len() as u64,
            UploadSource::File(path) => tokio::fs::metadata(path)
                .await
                .map_err(|e| read_error(&e))?
                .len(),
        };

        self.progress(0, total);
        if self.checkpoint(0, total).await == Checkpoint::Canceled {
            return Ok(None);
        }

        let completed = if total < MULTIPART_THRESHOLD {
            // A single PUT cannot stop halfway, so pauses are refused from here on
            while !self.control.begin_commit() {
                if self.checkpoint(0, total).await == Checkpoint::Canceled {
                    return Ok(None);
                }
            }
            self.put_single(source).await?
        } else {
            let reader = match source {
                UploadSource::Bytes(data) => PartReader::Bytes { data, offset: 0 },
                UploadSource::File(path) => {
                    PartReader::File(File::open(&path).await.map_err(|e| read_error(&e))?)
                }
            };
            self.put_multipart(reader, total).await?
        };
        if !completed {
            return Ok(None);
        }

        self.progress(total, total);
        let metadata = match objects::head(&self.client, &self.reference).await {
            Ok(metadata) => metadata,
            Err(e) => {
                debug!("upload: metadata lookup after upload failed: {}", e);
                self.local_metadata(total)
            }
        };
        Ok(Some(TaskSnapshot {
            path: self.reference.path.clone(),
            bytes_transferred: total,
            total_bytes: total,
            metadata: Some(metadata),
        }))
    }

    async fn put_single(&self, source: UploadSource) -> Result<bool, StorageError> {
        let body = match source {
            UploadSource::Bytes(data) => ByteStream::from(data),
            UploadSource::File(path) => ByteStream::from_path(&path)
                .await
                .map_err(|e| read_error(&e))?,
        };

        let request = self
            .client
            .put_object()
            .bucket(&self.reference.bucket)
            .key(&self.reference.path)
            .body(body);
        let request = apply_metadata!(request, self.metadata.as_ref());

        tokio::select! {
            result = request.send() => {
                result.map_err(from_sdk_error)?;
                Ok(true)
            }
            _ = self.control.cancelled() => Ok(false),
        }
    }

    async fn put_multipart(&self, mut reader: PartReader, total: u64) -> Result<bool, StorageError> {
        let request = self
            .client
            .create_multipart_upload()
            .bucket(&self.reference.bucket)
            .key(&self.reference.path);
        let response = apply_metadata!(request, self.metadata.as_ref())
            .send()
            .await
            .map_err(from_sdk_error)?;
        let upload_id = response
            .upload_id()
            .ok_or_else(|| StorageError::new(StorageErrorCode::Unknown, "No upload ID returned"))?
            .to_string();

        let total_parts = total.div_ceil(PART_SIZE);
        info!(
            "upload: {} multipart {} ({} parts)",
            self.reference.path, upload_id, total_parts
        );

        match self.upload_parts(&mut reader, &upload_id, total).await {
            Ok(Some(parts)) => {
                let completed_upload = CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build();
                let result = self
                    .client
                    .complete_multipart_upload()
                    .bucket(&self.reference.bucket)
                    .key(&self.reference.path)
                    .upload_id(&upload_id)
                    .multipart_upload(completed_upload)
                    .send()
                    .await;
                if let Err(e) = result {
                    self.abort(&upload_id).await;
                    return Err(from_sdk_error(e));
                }
                Ok(true)
            }
            Ok(None) => {
                self.abort(&upload_id).await;
                Ok(false)
            }
            Err(e) => {
                self.abort(&upload_id).await;
                Err(e)
            }
        }
    }

    async fn upload_parts(
        &self,
        reader: &mut PartReader,
        upload_id: &str,
        total: u64,
    ) -> Result<Option<Vec<CompletedPart>>, StorageError> {
        let mut parts = Vec::new();
        let mut sent = 0u64;
        let mut part_number = 1i32;

        while sent < total {
            if self.checkpoint(sent, total).await == Checkpoint::Canceled {
                return Ok(None);
            }

            let len = PART_SIZE.min(total - sent) as usize;
            let data = reader.next_part(len).await?;

            let request = self
                .client
                .upload_part()
                .bucket(&self.reference.bucket)
                .key(&self.reference.path)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(data))
                .send();
            let response = tokio::select! {
                result = request => result.map_err(from_sdk_error)?,
                _ = self.control.cancelled() => return Ok(None),
            };

            parts.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .e_tag(response.e_tag().unwrap_or_default())
                    .build(),
            );
            sent += len as u64;
            part_number += 1;
            self.progress(sent, total);
        }

        Ok(Some(parts))
    }

    async fn abort(&self, upload_id: &str) {
        let result = self
            .client
            .abort_multipart_upload()
            .bucket(&self.reference.bucket)
            .key(&self.reference.path)
            .upload_id(upload_id)
            .send()
            .await;
        if let Err(e) = result {
            warn!("upload: failed to abort multipart {}: {}", upload_id, e);
        }
    }

    async fn checkpoint(&self, sent: u64, total: u64) -> Checkpoint {
        self.control
            .checkpoint(&*self.listener, || self.snapshot(sent, total))
            .await
    }

    fn progress(&self, sent: u64, total: u64) {
        self.listener
            .on_event(NativeEvent::Progress(self.snapshot(sent, total)));
    }

    fn snapshot(&self, sent: u64, total: u64) -> TaskSnapshot {
        TaskSnapshot {
            path: self.reference.path.clone(),
            bytes_transferred: sent,
            total_bytes: total,
            metadata: Some(self.local_metadata(total)),
        }
    }

    /// Metadata as known before the backend confirms the object.
    fn local_metadata(&self, size: u64) -> ObjectMetadata {
        ObjectMetadata {
            name: Some(self.reference.name().to_string()),
            bucket: Some(self.reference.bucket.clone()),
            full_path: self.reference.path.clone(),
            size,
            settable: self.metadata.clone().unwrap_or_default(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn byte_parts_are_read_in_order() {
        let mut reader = PartReader::Bytes {
            data: (0u8..10).collect(),
            offset: 0,
        };
        assert_eq!(reader.next_part(4).await.unwrap(), vec![0, 1, 2, 3]);
        assert_eq!(reader.next_part(4).await.unwrap(), vec![4, 5, 6, 7]);
        assert_eq!(reader.next_part(4).await.unwrap(), vec![8, 9]);
    }

    #[tokio::test]
    async fn file_parts_are_read_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("source.bin");
        tokio::fs::write(&path, b"abcdefg").await.unwrap();

        let mut reader = PartReader::File(File::open(&path).await.unwrap());
        assert_eq!(reader.next_part(4).await.unwrap(), b"abcd".to_vec());
        assert_eq!(reader.next_part(3).await.unwrap(), b"efg".to_vec());
    }
}
