use anyhow::{Context, Result};
use sea_orm::{ConnectOptions, Database as SeaOrmDatabase, DatabaseConnection as SeaOrmConnection};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub type DatabaseConnection = Arc<SeaOrmConnection>;

pub struct Database {
    connection: DatabaseConnection,
}

impl Database {
    /// Connect to the index database at the given path, creating it if
    /// needed.
    pub async fn connect(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }

        let db_url = format!("sqlite://{}?mode=rwc", path.display());
        info!("Connecting to index database at: {}", db_url);

        let mut opt = ConnectOptions::new(db_url);
        opt.max_connections(10)
            .min_connections(1)
            .connect_timeout(Duration::from_secs(8))
            .acquire_timeout(Duration::from_secs(8))
            .sqlx_logging(false);

        let connection = SeaOrmDatabase::connect(opt)
            .await
            .context("Failed to connect to database")?;

        // WAL keeps concurrent index reads from blocking on populator commits.
        use sea_orm::{ConnectionTrait, Statement};
        connection
            .execute(Statement::from_string(
                sea_orm::DatabaseBackend::Sqlite,
                "PRAGMA journal_mode = WAL",
            ))
            .await
            .context("Failed to enable WAL mode")?;

        Ok(Self {
            connection: Arc::new(connection),
        })
    }

    /// In-memory database for tests. A single pooled connection keeps every
    /// handle on the same memory store.
    pub async fn connect_in_memory() -> Result<Self> {
        let mut opt = ConnectOptions::new("sqlite::memory:");
        opt.max_connections(1).sqlx_logging(false);

        let connection = SeaOrmDatabase::connect(opt)
            .await
            .context("Failed to open in-memory database")?;

        Ok(Self {
            connection: Arc::new(connection),
        })
    }

    pub fn get_connection(&self) -> DatabaseConnection {
        self.connection.clone()
    }

    /// Run pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        use crate::db::migrations::Migrator;
        use sea_orm_migration::MigratorTrait;

        Migrator::up(&*self.connection, None)
            .await
            .context("Failed to run migrations")?;
        Ok(())
    }
}
