pub mod cache_repository;
pub mod catalog_repository;

pub use cache_repository::{CacheRepository, CacheRepositoryImpl, NewCacheEntry};
pub use catalog_repository::{CatalogRepository, CatalogRepositoryImpl, NewCatalogFile};

use crate::db::connection::DatabaseConnection;

/// Shared base for repository implementations.
#[derive(Debug, Clone)]
pub struct BaseRepository {
    pub(crate) db: DatabaseConnection,
}

impl BaseRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}
