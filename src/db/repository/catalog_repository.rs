use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::RegexBuilder;
use sea_orm::sea_query::{Alias, Expr};
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set};

use super::BaseRepository;
use crate::db::connection::DatabaseConnection;
use crate::db::entities::{CatalogFile, CatalogFileActiveModel, catalog_files};
use crate::models::{CacheableCandidate, ContainerId, ItemId};

#[derive(Debug, Clone)]
pub struct NewCatalogFile {
    pub container_id: String,
    pub item_id: String,
    pub content_id: String,
    pub file_name: String,
    pub file_size: Option<i64>,
    pub mime_type: Option<String>,
}

/// Filename index over the external catalog, consumed by the predictor.
#[async_trait]
pub trait CatalogRepository: Send + Sync {
    /// First catalog row of the container whose filename matches `pattern`
    /// (case-insensitive). Newest item wins when several match; the pick is
    /// best-effort by design.
    async fn find_by_container_and_title_regex(
        &self,
        container_id: &ContainerId,
        pattern: &str,
    ) -> Result<Option<CacheableCandidate>>;

    async fn upsert_file(&self, file: NewCatalogFile) -> Result<()>;

    /// Prune a row whose item the remote store no longer knows.
    async fn delete_item(&self, container_id: &ContainerId, item_id: &ItemId) -> Result<bool>;
}

#[derive(Debug)]
pub struct CatalogRepositoryImpl {
    base: BaseRepository,
}

impl CatalogRepositoryImpl {
    pub fn new(db: DatabaseConnection) -> Self {
        Self {
            base: BaseRepository::new(db),
        }
    }
}

#[async_trait]
impl CatalogRepository for CatalogRepositoryImpl {
    async fn find_by_container_and_title_regex(
        &self,
        container_id: &ContainerId,
        pattern: &str,
    ) -> Result<Option<CacheableCandidate>> {
        // SQLite ships no REGEXP operator, so the container's rows are
        // filtered in-process.
        let matcher = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .with_context(|| format!("Invalid catalog search pattern: {pattern}"))?;

        // Item ids are decimal on the wire but stored as strings; cast so
        // "10" sorts after "9".
        let rows = CatalogFile::find()
            .filter(catalog_files::Column::ContainerId.eq(container_id.as_str()))
            .order_by_desc(Expr::col(catalog_files::Column::ItemId).cast_as(Alias::new("integer")))
            .all(self.base.db.as_ref())
            .await?;

        Ok(rows
            .into_iter()
            .find(|row| matcher.is_match(&row.file_name))
            .map(|row| CacheableCandidate {
                item_id: ItemId::from(row.item_id),
                content_id: row.content_id,
                file_name: row.file_name,
            }))
    }

    async fn upsert_file(&self, file: NewCatalogFile) -> Result<()> {
        let existing = CatalogFile::find()
            .filter(catalog_files::Column::ContainerId.eq(file.container_id.as_str()))
            .filter(catalog_files::Column::ItemId.eq(file.item_id.as_str()))
            .one(self.base.db.as_ref())
            .await?;

        let mut active_model = CatalogFileActiveModel {
            id: sea_orm::NotSet,
            container_id: Set(file.container_id),
            item_id: Set(file.item_id),
            content_id: Set(file.content_id),
            file_name: Set(file.file_name),
            file_size: Set(file.file_size),
            mime_type: Set(file.mime_type),
        };

        match existing {
            Some(current) => {
                active_model.id = Set(current.id);
                active_model.update(self.base.db.as_ref()).await?;
            }
            None => {
                active_model.insert(self.base.db.as_ref()).await?;
            }
        }
        Ok(())
    }

    async fn delete_item(&self, container_id: &ContainerId, item_id: &ItemId) -> Result<bool> {
        let result = CatalogFile::delete_many()
            .filter(catalog_files::Column::ContainerId.eq(container_id.as_str()))
            .filter(catalog_files::Column::ItemId.eq(item_id.as_str()))
            .exec(self.base.db.as_ref())
            .await?;
        Ok(result.rows_affected > 0)
    }
}
