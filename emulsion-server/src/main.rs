//! Process bootstrap: loads [`Settings`], wires the
//! Postgres-backed stores, starts the ingestion queue workers and the
//! sync subsystem for every known repository, and serves the ingest/retry
//! HTTP boundary.

pub mod errors;
pub mod job_handlers;
pub mod routes;

use std::collections::HashMap;
use std::sync::Arc;

use emulsion_config::Settings;
use emulsion_core::processor::retry::RetryProcessor;
use emulsion_core::processor::AssetProcessor;
use emulsion_core::queue::{spawn_worker_pool, JobQueue, LeaderElection};
use emulsion_core::sync::{FileWatcher, ReconciliationScanner, ReconciliationSettings, SyncManager};
use emulsion_core::{
    metadata::MetadataExtractor, ml::MlBatcher, ml::MlClient, staging::StagingManager,
    thumbnail::Thumbnailer, PostgresAssetIndex, PostgresRepositoryStore, RepositoryLayout,
    RepositoryManager,
};
use emulsion_core::sync::file_index_postgres::PostgresFileIndex;
use emulsion_model::QueueName;
use sqlx::postgres::PgPoolOptions;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use job_handlers::{MlHandler, ProcessAssetHandler, RetryAssetHandler};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "emulsion_server=info,emulsion_core=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::from_env()?;
    info!("settings loaded");

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .connect(&settings.database_url)
        .await?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    let asset_index: Arc<dyn emulsion_core::AssetIndex> = Arc::new(PostgresAssetIndex::new(pool.clone()));
    let file_index: Arc<dyn emulsion_core::sync::FileIndex> = Arc::new(PostgresFileIndex::new(pool.clone()));
    let repository_store: Arc<dyn emulsion_core::RepositoryStore> =
        Arc::new(PostgresRepositoryStore::new(pool.clone()));

    let repository_manager = Arc::new(RepositoryManager::new(repository_store));
    repository_manager.load_all().await?;
    let repositories = repository_manager.list();
    if repositories.is_empty() {
        warn!("no repositories registered yet; register one before ingesting");
    }

    let metadata_extractor = Arc::new(MetadataExtractor::new(
        num_cpus(),
        settings.exiftool_path.clone(),
        settings.ffprobe_path.clone(),
    ));

    let ml_batcher = match settings.ml_endpoint {
        Some(addr) => {
            let client = MlClient::connect(addr).await?;
            Some(MlBatcher::new(client, settings.ml_batch_max_size, settings.ml_batch_max_wait).spawn())
        }
        None => {
            warn!("ML_ENDPOINT not set; label predictions and embeddings are skipped");
            None
        }
    };

    let job_queue = JobQueue::new(pool.clone(), settings.queue_max_attempts);
    let mut leader = LeaderElection::new(pool.clone());
    let is_leader = leader.try_acquire().await?;
    if is_leader {
        info!("acquired reconciliation-scheduling leadership");
        spawn_lease_reclaim_sweep(job_queue.clone());
    } else {
        info!("another process holds reconciliation-scheduling leadership; running workers only");
    }

    let file_watcher = Arc::new(FileWatcher::new(file_index.clone(), settings.reconciliation_parallelism));
    let reconciliation_scanner = Arc::new(ReconciliationScanner::new(
        file_index.clone(),
        ReconciliationSettings {
            batch_size: settings.reconciliation_batch_size,
            parallelism: settings.reconciliation_parallelism,
            hash_files: settings.hash_during_reconciliation,
        },
    ));
    let sync_manager = Arc::new(SyncManager::new(
        file_index.clone(),
        file_watcher,
        reconciliation_scanner,
        settings.watcher_debounce,
        settings.reconciliation_interval,
    ));

    let mut asset_processors = HashMap::new();
    let mut retry_processors = Vec::new();
    for repository in &repositories {
        let layout = RepositoryLayout::new(repository.root.clone());
        layout.ensure_system_dirs()?;

        if is_leader {
            sync_manager.add_repository(repository.id, layout.clone())?;
        } else {
            info!(repository_id = %repository.id, "not leader; skipping sync scheduling for this repository");
        }

        let thumbnailer = Arc::new(Thumbnailer::new(layout.clone(), settings.dcraw_path.clone(), "ffmpeg"));
        let staging = StagingManager::new(layout.clone());
        asset_processors.insert(
            repository.id,
            Arc::new(AssetProcessor::new(
                layout.clone(),
                asset_index.clone(),
                staging,
                metadata_extractor.clone(),
                thumbnailer.clone(),
                ml_batcher.as_ref().map(|_| job_queue.clone()),
                repository.config.storage_strategy,
                repository.config.local_settings.handle_duplicate_filenames,
            )),
        );
        retry_processors.push(Arc::new(RetryProcessor::new(
            layout,
            asset_index.clone(),
            metadata_extractor.clone(),
            thumbnailer,
            ml_batcher.clone(),
        )));
    }

    spawn_worker_pool(
        job_queue.clone(),
        QueueName::ProcessAsset,
        settings.queue_workers_process_asset,
        Arc::new(ProcessAssetHandler::new(asset_processors)),
    );
    spawn_worker_pool(
        job_queue.clone(),
        QueueName::RetryAsset,
        settings.queue_workers_retry_asset,
        Arc::new(RetryAssetHandler::new(retry_processors)),
    );
    if let Some(ml_batcher) = ml_batcher.clone() {
        spawn_worker_pool(
            job_queue.clone(),
            QueueName::ProcessMl,
            settings.queue_workers_process_ml,
            Arc::new(MlHandler::new(ml_batcher, asset_index.clone())),
        );
    }

    let app_state = routes::AppState {
        job_queue,
        repository_manager,
    };
    let app = routes::router(app_state).layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", settings.server_host, settings.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr, "emulsion-server listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received, draining in-flight requests");
}

fn num_cpus() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}

/// Reclaims jobs whose lease expired without a worker reporting back, per
/// the leader's queue-maintenance responsibility. Runs only on the
/// process holding reconciliation-scheduling leadership so multiple
/// replicas don't race each other re-queuing the same stale leases.
fn spawn_lease_reclaim_sweep(job_queue: JobQueue) {
    const SWEEP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(60);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            match job_queue.reclaim_expired_leases().await {
                Ok(0) => {}
                Ok(n) => info!(count = n, "reclaimed jobs with expired leases"),
                Err(e) => warn!(error = %e, "lease reclaim sweep failed"),
            }
        }
    });
}
