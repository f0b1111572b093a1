use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // cache_entries - committed whole files in the on-disk cache
        manager
            .create_table(
                Table::create()
                    .table(CacheEntries::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CacheEntries::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(CacheEntries::CacheKey).string().not_null())
                    .col(ColumnDef::new(CacheEntries::FilePath).string().not_null())
                    .col(
                        ColumnDef::new(CacheEntries::FileSize)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(CacheEntries::MimeType).string())
                    .col(ColumnDef::new(CacheEntries::FileName).string())
                    .col(
                        ColumnDef::new(CacheEntries::Hits)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(CacheEntries::LastAccess)
                            .timestamp()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(CacheEntries::CreatedAt)
                            .timestamp()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(CacheEntries::Score)
                            .double()
                            .not_null()
                            .default(0.0),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_cache_entries_cache_key")
                    .table(CacheEntries::Table)
                    .col(CacheEntries::CacheKey)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Eviction scans the index in ascending score order.
        manager
            .create_index(
                Index::create()
                    .name("idx_cache_entries_score")
                    .table(CacheEntries::Table)
                    .col(CacheEntries::Score)
                    .to_owned(),
            )
            .await?;

        // catalog_files - filename index consulted by the predictor
        manager
            .create_table(
                Table::create()
                    .table(CatalogFiles::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CatalogFiles::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(CatalogFiles::ContainerId)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(CatalogFiles::ItemId).string().not_null())
                    .col(ColumnDef::new(CatalogFiles::ContentId).string().not_null())
                    .col(ColumnDef::new(CatalogFiles::FileName).string().not_null())
                    .col(ColumnDef::new(CatalogFiles::FileSize).big_integer())
                    .col(ColumnDef::new(CatalogFiles::MimeType).string())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_catalog_files_container_item")
                    .table(CatalogFiles::Table)
                    .col(CatalogFiles::ContainerId)
                    .col(CatalogFiles::ItemId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_catalog_files_container")
                    .table(CatalogFiles::Table)
                    .col(CatalogFiles::ContainerId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(CatalogFiles::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(CacheEntries::Table).to_owned())
            .await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum CacheEntries {
    Table,
    Id,
    CacheKey,
    FilePath,
    FileSize,
    MimeType,
    FileName,
    Hits,
    LastAccess,
    CreatedAt,
    Score,
}

#[derive(DeriveIden)]
enum CatalogFiles {
    Table,
    Id,
    ContainerId,
    ItemId,
    ContentId,
    FileName,
    FileSize,
    MimeType,
}
