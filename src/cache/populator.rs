use anyhow::Result;
use futures::StreamExt;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::media::is_cacheable;
use super::store::CacheStore;
use crate::error::{GatewayError, GatewayResult};
use crate::models::{CacheKey, ContainerId, ItemId, TransferDescriptor};
use crate::remote::{RemoteStore, SessionPool, stream_range};

/// Ratio of the descriptor-reported size a download must reach to commit.
/// The remote occasionally reports sizes slightly off the delivered byte
/// count; a near-complete file is accepted, a short read is rejected.
const COMPLETENESS_RATIO: f64 = 0.99;

const ROTATE_BACKOFF: Duration = Duration::from_secs(1);

/// What the admission check decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// A background download task was spawned.
    Started,
    AlreadyDownloading,
    AlreadyCached,
    NotCacheable,
    Disabled,
}

/// Single-flight background cache population.
///
/// Admission collapses concurrent requests for one cache key into a single
/// download; the work itself runs detached so a viewer disconnecting never
/// cancels a population (its value is for future viewers). Tasks stop only
/// at process shutdown, deleting partial files on the way out.
pub struct Populator {
    store: Arc<CacheStore>,
    remote: Arc<dyn RemoteStore>,
    pool: Arc<SessionPool>,
    downloading: Mutex<HashSet<String>>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
    enabled: bool,
}

impl Populator {
    pub fn new(
        store: Arc<CacheStore>,
        remote: Arc<dyn RemoteStore>,
        pool: Arc<SessionPool>,
        shutdown: CancellationToken,
        enabled: bool,
    ) -> Self {
        Self {
            store,
            remote,
            pool,
            downloading: Mutex::new(HashSet::new()),
            tracker: TaskTracker::new(),
            shutdown,
            enabled,
        }
    }

    pub fn is_downloading(&self, key: &CacheKey) -> bool {
        self.downloading.lock().unwrap().contains(&key.to_string())
    }

    #[cfg(test)]
    pub(crate) fn downloading_count(&self) -> usize {
        self.downloading.lock().unwrap().len()
    }

    /// Admit one population request.
    ///
    /// The check-and-insert on the downloading set is atomic under its
    /// mutex; everything slower (the index probe, the download itself)
    /// happens after the key is claimed.
    pub async fn admit(
        self: &Arc<Self>,
        key: CacheKey,
        container_id: ContainerId,
        item_id: ItemId,
        descriptor: &TransferDescriptor,
        session: usize,
    ) -> Result<Admission> {
        if !self.enabled {
            return Ok(Admission::Disabled);
        }
        if !is_cacheable(
            descriptor.mime_type.as_deref(),
            descriptor.file_name.as_deref(),
        ) {
            return Ok(Admission::NotCacheable);
        }

        let key_string = key.to_string();
        {
            let mut downloading = self.downloading.lock().unwrap();
            if downloading.contains(&key_string) {
                debug!("Already downloading: {key_string}");
                return Ok(Admission::AlreadyDownloading);
            }
            downloading.insert(key_string.clone());
        }
        let mark = DownloadMark {
            populator: Arc::clone(self),
            key: key_string.clone(),
        };

        if self.store.lookup(&key).await?.is_some() {
            debug!("Already cached: {key_string}");
            return Ok(Admission::AlreadyCached);
        }

        info!(
            "Starting background download: {} ({:.1} MB) on session {}",
            descriptor
                .file_name
                .as_deref()
                .unwrap_or(key_string.as_str()),
            descriptor.size as f64 / 1024.0 / 1024.0,
            session
        );

        let populator = Arc::clone(self);
        self.tracker.spawn(async move {
            let _mark = mark;
            populator.run_download(key, container_id, item_id, session).await;
        });

        Ok(Admission::Started)
    }

    /// Retry loop around one population attempt. Rotates to the next
    /// session on retryable failures, bounded by the pool size.
    async fn run_download(
        &self,
        key: CacheKey,
        container_id: ContainerId,
        item_id: ItemId,
        session: usize,
    ) {
        let max_attempts = self.pool.len();
        let mut session = session;
        let mut attempts = 0;

        loop {
            attempts += 1;
            match self.try_download(&key, &container_id, &item_id, session).await {
                Ok(size) => {
                    info!(
                        "Background download complete: {} ({:.1} MB)",
                        key,
                        size as f64 / 1024.0 / 1024.0
                    );
                    return;
                }
                Err(GatewayError::Cancelled) => {
                    debug!("Background download cancelled: {key}");
                    return;
                }
                Err(e) if e.is_retryable() && attempts < max_attempts => {
                    let next = self.pool.pick_other(session);
                    warn!(
                        "Background download hit {} on session {}, rotating to {}",
                        e, session, next
                    );
                    session = next;
                    tokio::select! {
                        _ = tokio::time::sleep(ROTATE_BACKOFF) => {}
                        _ = self.shutdown.cancelled() => return,
                    }
                }
                Err(e) => {
                    error!("Background download failed for {key}: {e}");
                    return;
                }
            }
        }
    }

    /// One complete population attempt on one session.
    async fn try_download(
        &self,
        key: &CacheKey,
        container_id: &ContainerId,
        item_id: &ItemId,
        session: usize,
    ) -> GatewayResult<u64> {
        // Fresh descriptor every attempt; remote handles expire.
        let descriptor = self.remote.locate(session, container_id, item_id).await?;

        self.store.reserve(descriptor.size).await?;

        let path = self.store.entry_path(
            key,
            descriptor.file_name.as_deref(),
            descriptor.mime_type.as_deref(),
        );
        let mut writer = self.store.write_streaming(&path).await?;
        let guard = PartialFileGuard::new(path.clone());

        let until = descriptor.size.saturating_sub(1);
        let stream = stream_range(
            Arc::clone(&self.remote),
            Arc::clone(&self.pool),
            session,
            container_id.clone(),
            item_id.clone(),
            descriptor.clone(),
            0,
            until,
        );
        futures::pin_mut!(stream);

        let mut written: u64 = 0;
        let mut last_logged_percent = 0;
        while let Some(chunk) = stream.next().await {
            if self.shutdown.is_cancelled() {
                return Err(GatewayError::Cancelled);
            }
            let chunk = chunk?;
            writer.write_all(&chunk).await?;
            written += chunk.len() as u64;

            if descriptor.size > 0 {
                let percent = (written * 100 / descriptor.size) as u32;
                if percent >= last_logged_percent + 10 {
                    info!(
                        "Downloading [{}]: {}% ({:.1} MB / {:.1} MB)",
                        descriptor.file_name.as_deref().unwrap_or("?"),
                        percent,
                        written as f64 / 1024.0 / 1024.0,
                        descriptor.size as f64 / 1024.0 / 1024.0
                    );
                    last_logged_percent = percent;
                }
            }
        }
        writer.flush().await?;
        drop(writer);

        let measured = tokio::fs::metadata(&path).await.map(|m| m.len()).unwrap_or(written);
        if (measured as f64) < descriptor.size as f64 * COMPLETENESS_RATIO {
            warn!(
                "Incomplete download: {} ({measured}/{} bytes)",
                key, descriptor.size
            );
            return Err(GatewayError::Transient("short download".to_string()));
        }

        self.store
            .commit(
                key,
                &path,
                measured,
                descriptor.mime_type.clone(),
                descriptor.file_name.clone(),
            )
            .await?;
        guard.defuse();
        Ok(measured)
    }

    /// Cancel outstanding population tasks and wait for their partial-file
    /// cleanup to finish.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}

/// Clears the downloading mark when a task ends, on every path.
struct DownloadMark {
    populator: Arc<Populator>,
    key: String,
}

impl Drop for DownloadMark {
    fn drop(&mut self) {
        self.populator.downloading.lock().unwrap().remove(&self.key);
    }
}

/// Deletes the in-progress file unless the download committed.
struct PartialFileGuard {
    path: PathBuf,
    armed: bool,
}

impl PartialFileGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn defuse(mut self) {
        self.armed = false;
    }
}

impl Drop for PartialFileGuard {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = std::fs::remove_file(&self.path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to remove partial file {:?}: {}", self.path, e);
                }
            }
        }
    }
}
