use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
};

use super::BaseRepository;
use crate::cache::score::compute_score;
use crate::db::connection::DatabaseConnection;
use crate::db::entities::{CacheEntry, CacheEntryActiveModel, CacheEntryModel, cache_entries};

/// Logical cache entry handed to `upsert`. The row id is assigned by the
/// index.
#[derive(Debug, Clone)]
pub struct NewCacheEntry {
    pub cache_key: String,
    pub file_path: String,
    pub file_size: i64,
    pub mime_type: Option<String>,
    pub file_name: Option<String>,
    pub hits: i64,
    pub last_access: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub score: f64,
}

/// Persistent cache index: one row per committed whole file on disk.
#[async_trait]
pub trait CacheRepository: Send + Sync {
    async fn get(&self, cache_key: &str) -> Result<Option<CacheEntryModel>>;

    /// Insert or replace the row for `entry.cache_key`. Calling twice with
    /// the same arguments leaves the index in the same state.
    async fn upsert(&self, entry: NewCacheEntry) -> Result<CacheEntryModel>;

    async fn delete(&self, cache_key: &str) -> Result<()>;

    /// All entries in ascending score order; the eviction scan.
    async fn iter_by_score_asc(&self) -> Result<Vec<CacheEntryModel>>;

    /// Total committed bytes.
    async fn sum_size(&self) -> Result<i64>;

    async fn count(&self) -> Result<u64>;

    async fn list_all(&self) -> Result<Vec<CacheEntryModel>>;

    /// Bump hits and recency for one entry and recompute its score.
    /// Returns the updated row, or `None` when the key is not indexed.
    async fn record_access(
        &self,
        cache_key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<CacheEntryModel>>;

    /// Recompute every score against `now`. Returns the number of rows
    /// touched.
    async fn recompute_scores(&self, now: DateTime<Utc>) -> Result<u64>;
}

#[derive(Debug)]
pub struct CacheRepositoryImpl {
    base: BaseRepository,
}

impl CacheRepositoryImpl {
    pub fn new(db: DatabaseConnection) -> Self {
        Self {
            base: BaseRepository::new(db),
        }
    }
}

#[async_trait]
impl CacheRepository for CacheRepositoryImpl {
    async fn get(&self, cache_key: &str) -> Result<Option<CacheEntryModel>> {
        Ok(CacheEntry::find()
            .filter(cache_entries::Column::CacheKey.eq(cache_key))
            .one(self.base.db.as_ref())
            .await?)
    }

    async fn upsert(&self, entry: NewCacheEntry) -> Result<CacheEntryModel> {
        let existing = self.get(&entry.cache_key).await?;

        let mut active_model = CacheEntryActiveModel {
            id: sea_orm::NotSet,
            cache_key: Set(entry.cache_key.clone()),
            file_path: Set(entry.file_path.clone()),
            file_size: Set(entry.file_size),
            mime_type: Set(entry.mime_type.clone()),
            file_name: Set(entry.file_name.clone()),
            hits: Set(entry.hits),
            last_access: Set(entry.last_access.naive_utc()),
            created_at: Set(entry.created_at.naive_utc()),
            score: Set(entry.score),
        };

        let model = match existing {
            Some(current) => {
                active_model.id = Set(current.id);
                active_model.update(self.base.db.as_ref()).await?
            }
            None => active_model.insert(self.base.db.as_ref()).await?,
        };
        Ok(model)
    }

    async fn delete(&self, cache_key: &str) -> Result<()> {
        CacheEntry::delete_many()
            .filter(cache_entries::Column::CacheKey.eq(cache_key))
            .exec(self.base.db.as_ref())
            .await?;
        Ok(())
    }

    async fn iter_by_score_asc(&self) -> Result<Vec<CacheEntryModel>> {
        Ok(CacheEntry::find()
            .order_by_asc(cache_entries::Column::Score)
            .all(self.base.db.as_ref())
            .await?)
    }

    async fn sum_size(&self) -> Result<i64> {
        let entries = CacheEntry::find().all(self.base.db.as_ref()).await?;
        Ok(entries.iter().map(|e| e.file_size).sum())
    }

    async fn count(&self) -> Result<u64> {
        Ok(CacheEntry::find().count(self.base.db.as_ref()).await?)
    }

    async fn list_all(&self) -> Result<Vec<CacheEntryModel>> {
        Ok(CacheEntry::find().all(self.base.db.as_ref()).await?)
    }

    async fn record_access(
        &self,
        cache_key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<CacheEntryModel>> {
        let Some(entry) = self.get(cache_key).await? else {
            return Ok(None);
        };

        let hits = entry.hits + 1;
        let mut active_model: CacheEntryActiveModel = entry.into();
        active_model.hits = Set(hits);
        active_model.last_access = Set(now.naive_utc());
        active_model.score = Set(compute_score(hits, now, now));

        Ok(Some(active_model.update(self.base.db.as_ref()).await?))
    }

    async fn recompute_scores(&self, now: DateTime<Utc>) -> Result<u64> {
        let entries = self.list_all().await?;
        let mut touched = 0;
        for entry in entries {
            let score = compute_score(entry.hits, entry.last_access.and_utc(), now);
            if (score - entry.score).abs() > f64::EPSILON {
                let mut active_model: CacheEntryActiveModel = entry.into();
                active_model.score = Set(score);
                active_model.update(self.base.db.as_ref()).await?;
                touched += 1;
            }
        }
        Ok(touched)
    }
}
