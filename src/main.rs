use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tidegate::cache::{CacheStore, Populator, Predictor};
use tidegate::config::Config;
use tidegate::db::Database;
use tidegate::db::repository::{CacheRepositoryImpl, CatalogRepositoryImpl};
use tidegate::remote::{HttpRemoteStore, RemoteStore, SessionPool};
use tidegate::server::render::BasicPageRenderer;
use tidegate::server::{AppContext, build_router};
use tidegate::workers::CleanupWorker;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tidegate=info")),
        )
        .init();

    info!("Starting tidegate");

    let config = Config::load()?;

    let database = Database::connect(&config.database_path()?).await?;
    database.migrate().await?;

    let cache_index = Arc::new(CacheRepositoryImpl::new(database.get_connection()));
    let catalog = Arc::new(CatalogRepositoryImpl::new(database.get_connection()));

    let remote = Arc::new(
        HttpRemoteStore::new(config.remote.api_base.clone(), &config.remote.credentials)
            .context("Failed to initialize remote store sessions")?,
    );
    let pool = Arc::new(SessionPool::new(remote.session_count()));
    info!("Session pool initialized with {} sessions", pool.len());

    let store = Arc::new(
        CacheStore::new(
            config.cache_directory()?,
            config.cache_max_bytes(),
            cache_index.clone(),
        )
        .await?,
    );

    let shutdown = CancellationToken::new();

    let populator = Arc::new(Populator::new(
        store.clone(),
        remote.clone(),
        pool.clone(),
        shutdown.clone(),
        config.cache.enabled,
    ));
    let predictor = Arc::new(Predictor::new(
        catalog.clone(),
        remote.clone(),
        pool.clone(),
        store.clone(),
        populator.clone(),
    ));

    let cleanup_handle = if config.cache.enabled {
        info!(
            "Media cache enabled: max {:.1} GB at {:?}",
            config.cache.max_size_gb,
            store.root()
        );
        Some(CleanupWorker::new(store.clone()).spawn(shutdown.clone()))
    } else {
        info!("Media cache is disabled");
        None
    };

    let ctx = Arc::new(AppContext {
        remote,
        pool,
        store,
        catalog,
        populator: populator.clone(),
        predictor,
        renderer: Arc::new(BasicPageRenderer),
        cache_enabled: config.cache.enabled,
    });

    let app = build_router(ctx);
    let addr = format!("0.0.0.0:{}", config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await
        .context("Server error")?;

    // Populator tasks delete their partial files before we exit.
    info!("Shutting down, waiting for background downloads to clean up");
    populator.shutdown().await;
    if let Some(handle) = cleanup_handle {
        handle.await.ok();
    }
    info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("Shutdown signal received");
    shutdown.cancel();
}
