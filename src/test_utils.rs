//! Shared fakes for unit tests.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{GatewayError, GatewayResult};
use crate::models::{ContainerId, ItemId, TransferDescriptor};
use crate::remote::store::{CHUNK_SIZE, RemoteStore};

#[derive(Debug, Clone)]
enum FailKind {
    Throttled(u64),
    Transient(String),
}

impl FailKind {
    fn to_error(&self) -> GatewayError {
        match self {
            FailKind::Throttled(wait_secs) => GatewayError::Throttled {
                wait_secs: *wait_secs,
            },
            FailKind::Transient(msg) => GatewayError::Transient(msg.clone()),
        }
    }
}

impl From<GatewayError> for FailKind {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Throttled { wait_secs } => FailKind::Throttled(wait_secs),
            GatewayError::Transient(msg) => FailKind::Transient(msg),
            other => FailKind::Transient(other.to_string()),
        }
    }
}

/// In-memory [`RemoteStore`] backed by one file, with per-session failure
/// injection and request counting.
pub struct FakeRemoteStore {
    sessions: usize,
    file: Vec<u8>,
    reported_size: AtomicU64,
    mime_type: Mutex<Option<String>>,
    file_name: Mutex<Option<String>>,
    // session -> (fail after N successful chunk fetches, error to raise)
    failures: Mutex<HashMap<usize, (u64, FailKind)>>,
    chunk_counts: Vec<AtomicU64>,
    locate_count: AtomicU64,
    chunk_delay: Mutex<Option<std::time::Duration>>,
}

impl FakeRemoteStore {
    pub fn new(sessions: usize, file: Vec<u8>) -> Self {
        let size = file.len() as u64;
        Self {
            sessions,
            file,
            reported_size: AtomicU64::new(size),
            mime_type: Mutex::new(Some("video/mp4".to_string())),
            file_name: Mutex::new(Some("fixture.mp4".to_string())),
            failures: Mutex::new(HashMap::new()),
            chunk_counts: (0..sessions).map(|_| AtomicU64::new(0)).collect(),
            locate_count: AtomicU64::new(0),
            chunk_delay: Mutex::new(None),
        }
    }

    /// Slow every chunk fetch down, keeping downloads in flight long enough
    /// for tests to observe them.
    pub fn set_chunk_delay(&self, delay: std::time::Duration) {
        *self.chunk_delay.lock().unwrap() = Some(delay);
    }

    pub fn descriptor(&self) -> TransferDescriptor {
        TransferDescriptor {
            handle: "fake-handle".to_string(),
            size: self.reported_size.load(Ordering::Relaxed),
            mime_type: self.mime_type.lock().unwrap().clone(),
            file_name: self.file_name.lock().unwrap().clone(),
            content_id: "ab12cd34".to_string(),
        }
    }

    /// Make the descriptor report a size different from the delivered bytes.
    pub fn set_reported_size(&self, size: u64) {
        self.reported_size.store(size, Ordering::Relaxed);
    }

    pub fn set_file_name(&self, name: Option<&str>) {
        *self.file_name.lock().unwrap() = name.map(str::to_string);
    }

    pub fn set_mime_type(&self, mime: Option<&str>) {
        *self.mime_type.lock().unwrap() = mime.map(str::to_string);
    }

    /// Every chunk fetch on `session` fails.
    pub fn fail_session(&self, session: usize, err: GatewayError) {
        self.fail_session_after(session, 0, err);
    }

    /// Chunk fetches on `session` fail after `ok_fetches` successes.
    pub fn fail_session_after(&self, session: usize, ok_fetches: u64, err: GatewayError) {
        self.failures
            .lock()
            .unwrap()
            .insert(session, (ok_fetches, err.into()));
    }

    pub fn clear_failures(&self) {
        self.failures.lock().unwrap().clear();
    }

    pub fn chunk_requests(&self, session: usize) -> u64 {
        self.chunk_counts[session].load(Ordering::Relaxed)
    }

    pub fn locate_calls(&self) -> u64 {
        self.locate_count.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl RemoteStore for FakeRemoteStore {
    fn session_count(&self) -> usize {
        self.sessions
    }

    async fn locate(
        &self,
        _session: usize,
        _container_id: &ContainerId,
        _item_id: &ItemId,
    ) -> GatewayResult<TransferDescriptor> {
        self.locate_count.fetch_add(1, Ordering::Relaxed);
        Ok(self.descriptor())
    }

    async fn fetch_chunk(
        &self,
        session: usize,
        _descriptor: &TransferDescriptor,
        offset: u64,
    ) -> GatewayResult<Bytes> {
        let delay = *self.chunk_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let served = self.chunk_counts[session].fetch_add(1, Ordering::Relaxed);
        if let Some((ok_fetches, kind)) = self.failures.lock().unwrap().get(&session) {
            if served >= *ok_fetches {
                return Err(kind.to_error());
            }
        }

        let start = offset as usize;
        if start >= self.file.len() {
            return Ok(Bytes::new());
        }
        let end = (start + CHUNK_SIZE as usize).min(self.file.len());
        Ok(Bytes::copy_from_slice(&self.file[start..end]))
    }

    async fn thumbnail(
        &self,
        _session: usize,
        _container_id: &ContainerId,
        _item_id: &ItemId,
    ) -> GatewayResult<Bytes> {
        Ok(Bytes::from_static(b"\xff\xd8fake-jpeg"))
    }
}
