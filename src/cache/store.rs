use anyhow::{Context, Result};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs as tokio_fs;
use tracing::{debug, info, warn};

use super::media::extension_for;
use super::score::compute_score;
use crate::db::repository::{CacheRepository, NewCacheEntry};
use crate::db::entities::CacheEntryModel;
use crate::models::CacheKey;

/// Outcome of one cleanup pass.
#[derive(Debug, Clone)]
pub struct CleanupReport {
    pub orphans_removed: u64,
    pub scores_recomputed: u64,
    pub entries: u64,
    pub total_bytes: i64,
}

/// Owns the on-disk cache directory and enforces the size budget.
///
/// Files are whole downloads named `md5(cache_key)<ext>`; metadata lives in
/// the [`CacheRepository`] index. Eviction walks the index in ascending
/// score order until the incoming write fits.
pub struct CacheStore {
    root: PathBuf,
    max_bytes: u64,
    index: Arc<dyn CacheRepository>,
}

impl CacheStore {
    pub async fn new(
        root: PathBuf,
        max_bytes: u64,
        index: Arc<dyn CacheRepository>,
    ) -> Result<Self> {
        tokio_fs::create_dir_all(&root)
            .await
            .with_context(|| format!("Failed to create cache directory {root:?}"))?;

        let store = Self {
            root,
            max_bytes,
            index,
        };
        info!(
            "Cache store initialized at {:?} (budget {} MB)",
            store.root,
            store.max_bytes / 1024 / 1024
        );
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    pub fn index(&self) -> &Arc<dyn CacheRepository> {
        &self.index
    }

    /// On-disk path a population for this key will write to.
    pub fn entry_path(
        &self,
        key: &CacheKey,
        file_name: Option<&str>,
        mime_type: Option<&str>,
    ) -> PathBuf {
        let ext = extension_for(file_name, mime_type);
        self.root.join(format!("{}{}", key.file_stem(), ext))
    }

    /// Committed entry for `key` whose file is still on disk.
    ///
    /// An index row whose file has gone missing is pruned on observation so
    /// the next request repopulates it.
    pub async fn lookup(&self, key: &CacheKey) -> Result<Option<CacheEntryModel>> {
        let Some(entry) = self.index.get(&key.to_string()).await? else {
            return Ok(None);
        };

        if tokio_fs::try_exists(&entry.file_path).await.unwrap_or(false) {
            Ok(Some(entry))
        } else {
            warn!("Cache file missing, pruning index row: {}", entry.cache_key);
            self.index.delete(&entry.cache_key).await?;
            Ok(None)
        }
    }

    /// Make room for `needed_bytes` by evicting lowest-score entries until
    /// the budget holds. Evictions are not rolled back if the incoming
    /// write later fails; the next population simply finds the space free.
    pub async fn reserve(&self, needed_bytes: u64) -> Result<()> {
        let mut current = self.index.sum_size().await?;
        let target = self.max_bytes as i64 - needed_bytes as i64;
        if current <= target {
            return Ok(());
        }

        info!(
            "Cache eviction triggered: need {} MB, holding {} MB of {} MB",
            needed_bytes / 1024 / 1024,
            current / 1024 / 1024,
            self.max_bytes / 1024 / 1024
        );

        for entry in self.index.iter_by_score_asc().await? {
            if current <= target {
                break;
            }

            if let Err(e) = tokio_fs::remove_file(&entry.file_path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Eviction unlink failed for {}: {}", entry.file_path, e);
                }
            }
            self.index.delete(&entry.cache_key).await?;
            current -= entry.file_size;
            info!(
                "Evicted: {} (score {:.1}, {} MB)",
                entry.file_name.as_deref().unwrap_or(&entry.cache_key),
                entry.score,
                entry.file_size / 1024 / 1024
            );
        }

        Ok(())
    }

    /// Open a fresh file for exclusive sequential writes.
    pub async fn write_streaming(&self, path: &Path) -> Result<tokio_fs::File> {
        tokio_fs::File::create(path)
            .await
            .with_context(|| format!("Failed to open cache file for writing: {path:?}"))
    }

    /// Register a completed download in the index. Idempotent: committing
    /// the same arguments twice leaves the index unchanged.
    pub async fn commit(
        &self,
        key: &CacheKey,
        path: &Path,
        measured_size: u64,
        mime_type: Option<String>,
        file_name: Option<String>,
    ) -> Result<CacheEntryModel> {
        let now = Utc::now();
        let entry = self
            .index
            .upsert(NewCacheEntry {
                cache_key: key.to_string(),
                file_path: path.to_string_lossy().into_owned(),
                file_size: measured_size as i64,
                mime_type,
                file_name,
                hits: 1,
                last_access: now,
                created_at: now,
                score: compute_score(1, now, now),
            })
            .await?;
        debug!("Cache commit: {} ({} bytes)", entry.cache_key, measured_size);
        Ok(entry)
    }

    /// Positioned reads for serving byte ranges from a committed file.
    pub async fn open_read(&self, path: &Path) -> Result<tokio_fs::File> {
        tokio_fs::File::open(path)
            .await
            .with_context(|| format!("Failed to open cache file {path:?}"))
    }

    /// Orphan reconciliation and score refresh, run periodically and at
    /// startup.
    pub async fn cleanup(&self) -> Result<CleanupReport> {
        let mut orphans_removed = 0;
        for entry in self.index.list_all().await? {
            if !tokio_fs::try_exists(&entry.file_path).await.unwrap_or(false) {
                warn!("Cleanup: removing orphan index row {}", entry.cache_key);
                self.index.delete(&entry.cache_key).await?;
                orphans_removed += 1;
            }
        }

        let scores_recomputed = self.index.recompute_scores(Utc::now()).await?;
        let entries = self.index.count().await?;
        let total_bytes = self.index.sum_size().await?;

        Ok(CleanupReport {
            orphans_removed,
            scores_recomputed,
            entries,
            total_bytes,
        })
    }
}
