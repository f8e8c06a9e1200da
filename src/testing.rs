//! Scripted storage client and recording sink for tests

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{StorageError, StorageErrorCode};
use crate::metadata::{ObjectMetadata, TransferMetadata};
use crate::sink::NotificationSink;
use crate::storage::{
    ListOptions, ListResult, NativeEvent, RetrySettings, StorageClient, StorageRef,
    TransferListener, TransferOperation,
};

/// Operation whose notifications are raised by the test itself.
pub struct FakeOperation {
    listener: Arc<dyn TransferListener>,
    accepts: AtomicBool,
    pause_calls: AtomicUsize,
    resume_calls: AtomicUsize,
    cancel_calls: AtomicUsize,
}

impl FakeOperation {
    pub fn emit(&self, event: NativeEvent) {
        self.listener.on_event(event);
    }

    pub fn set_accepts(&self, accepts: bool) {
        self.accepts.store(accepts, Ordering::SeqCst);
    }

    pub fn pause_calls(&self) -> usize {
        self.pause_calls.load(Ordering::SeqCst)
    }

    pub fn resume_calls(&self) -> usize {
        self.resume_calls.load(Ordering::SeqCst)
    }

    pub fn cancel_calls(&self) -> usize {
        self.cancel_calls.load(Ordering::SeqCst)
    }
}

impl TransferOperation for FakeOperation {
    fn pause(&self) -> bool {
        self.pause_calls.fetch_add(1, Ordering::SeqCst);
        self.accepts.load(Ordering::SeqCst)
    }

    fn resume(&self) -> bool {
        self.resume_calls.fetch_add(1, Ordering::SeqCst);
        self.accepts.load(Ordering::SeqCst)
    }

    fn cancel(&self) -> bool {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        self.accepts.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Started {
    Bytes(StorageRef, Vec<u8>, Option<TransferMetadata>),
    File(StorageRef, PathBuf, Option<TransferMetadata>),
    Download(StorageRef, PathBuf),
}

/// In-memory storage client. Objects live in a map keyed by path.
pub struct FakeStorageClient {
    bucket: String,
    settings: Mutex<RetrySettings>,
    operations: Mutex<Vec<Arc<FakeOperation>>>,
    started: Mutex<Vec<Started>>,
    objects: Mutex<HashMap<String, ObjectMetadata>>,
}

impl FakeStorageClient {
    pub fn new() -> Self {
        Self {
            bucket: "default-bucket".to_string(),
            settings: Mutex::new(RetrySettings::default()),
            operations: Mutex::new(Vec::new()),
            started: Mutex::new(Vec::new()),
            objects: Mutex::new(HashMap::new()),
        }
    }

    pub fn insert_object(&self, metadata: ObjectMetadata) {
        self.objects
            .lock()
            .unwrap()
            .insert(metadata.full_path.clone(), metadata);
    }

    pub fn started(&self) -> usize {
        self.started.lock().unwrap().len()
    }

    pub fn started_calls(&self) -> Vec<Started> {
        self.started.lock().unwrap().clone()
    }

    pub fn last_operation(&self) -> Arc<FakeOperation> {
        self.operations
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no operation started")
    }

    pub fn operation(&self, index: usize) -> Arc<FakeOperation> {
        self.operations.lock().unwrap()[index].clone()
    }

    fn launch(&self, call: Started, listener: Arc<dyn TransferListener>) -> Arc<dyn TransferOperation> {
        let op = Arc::new(FakeOperation {
            listener,
            accepts: AtomicBool::new(true),
            pause_calls: AtomicUsize::new(0),
            resume_calls: AtomicUsize::new(0),
            cancel_calls: AtomicUsize::new(0),
        });
        self.started.lock().unwrap().push(call);
        self.operations.lock().unwrap().push(op.clone());
        op
    }

    fn lookup(&self, reference: &StorageRef) -> Result<ObjectMetadata, StorageError> {
        self.objects
            .lock()
            .unwrap()
            .get(&reference.path)
            .cloned()
            .ok_or_else(|| StorageError::from_code(StorageErrorCode::ObjectNotFound))
    }
}

#[async_trait]
impl StorageClient for FakeStorageClient {
    fn default_bucket(&self) -> &str {
        &self.bucket
    }

    fn retry_settings(&self) -> RetrySettings {
        *self.settings.lock().unwrap()
    }

    fn set_retry_settings(&self, settings: RetrySettings) {
        *self.settings.lock().unwrap() = settings;
    }

    fn put_bytes(
        &self,
        reference: &StorageRef,
        data: Vec<u8>,
        metadata: Option<TransferMetadata>,
        listener: Arc<dyn TransferListener>,
    ) -> Arc<dyn TransferOperation> {
        self.launch(Started::Bytes(reference.clone(), data, metadata), listener)
    }

    fn put_file(
        &self,
        reference: &StorageRef,
        source: PathBuf,
        metadata: Option<TransferMetadata>,
        listener: Arc<dyn TransferListener>,
    ) -> Arc<dyn TransferOperation> {
        self.launch(Started::File(reference.clone(), source, metadata), listener)
    }

    fn get_file(
        &self,
        reference: &StorageRef,
        destination: PathBuf,
        listener: Arc<dyn TransferListener>,
    ) -> Arc<dyn TransferOperation> {
        self.launch(Started::Download(reference.clone(), destination), listener)
    }

    async fn delete(&self, reference: &StorageRef) -> Result<(), StorageError> {
        self.objects
            .lock()
            .unwrap()
            .remove(&reference.path)
            .map(|_| ())
            .ok_or_else(|| StorageError::from_code(StorageErrorCode::ObjectNotFound))
    }

    async fn get_metadata(&self, reference: &StorageRef) -> Result<ObjectMetadata, StorageError> {
        self.lookup(reference)
    }

    async fn update_metadata(
        &self,
        reference: &StorageRef,
        metadata: TransferMetadata,
    ) -> Result<ObjectMetadata, StorageError> {
        let mut current = self.lookup(reference)?;
        current.settable = metadata;
        self.insert_object(current.clone());
        Ok(current)
    }

    async fn download_url(&self, reference: &StorageRef) -> Result<String, StorageError> {
        self.lookup(reference)?;
        Ok(format!("https://example.test/{}/{}", reference.bucket, reference.path))
    }

    async fn list(
        &self,
        reference: &StorageRef,
        options: ListOptions,
    ) -> Result<ListResult, StorageError> {
        let mut all = self.list_all(reference).await?;
        all.items.truncate(options.max_results as usize);
        Ok(all)
    }

    async fn list_all(&self, reference: &StorageRef) -> Result<ListResult, StorageError> {
        let prefix = format!("{}/", reference.path.trim_end_matches('/'));
        let mut items: Vec<String> = self
            .objects
            .lock()
            .unwrap()
            .keys()
            .filter(|key| key.starts_with(&prefix))
            .cloned()
            .collect();
        items.sort();
        Ok(ListResult {
            items,
            ..Default::default()
        })
    }
}

/// Sink that records every event.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<(String, Value)>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<(String, Value)> {
        self.events.lock().unwrap().clone()
    }

    pub fn names(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }
}

impl NotificationSink for RecordingSink {
    fn emit(&self, event: &str, payload: Value) {
        self.events
            .lock()
            .unwrap()
            .push((event.to_string(), payload));
    }
}
