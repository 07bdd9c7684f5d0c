use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use emulsion_model::QueueName;

/// Process-wide environment knobs. Loaded once at
/// startup; `emulsion-server::main` constructs this before building any
/// long-lived singleton.
#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: String,
    pub staging_root: PathBuf,
    pub queue_workers_process_asset: u32,
    pub queue_workers_process_ml: u32,
    pub queue_workers_retry_asset: u32,
    pub queue_max_attempts: u32,
    pub ml_endpoint: Option<SocketAddr>,
    pub watcher_debounce: Duration,
    pub reconciliation_interval: Duration,
    pub reconciliation_batch_size: usize,
    pub reconciliation_parallelism: usize,
    pub hash_during_reconciliation: bool,
    pub ml_batch_max_size: usize,
    pub ml_batch_max_wait: Duration,
    pub exiftool_path: String,
    pub ffprobe_path: String,
    pub dcraw_path: String,
    pub ffmpeg_path: String,
    pub server_host: String,
    pub server_port: u16,
}

impl Settings {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            database_url: env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable is required"))?,
            staging_root: env_path("STAGING_ROOT", "./data/staging"),
            queue_workers_process_asset: env_u32(
                "QUEUE_WORKERS_PROCESS_ASSET",
                QueueName::ProcessAsset.default_max_workers(),
            ),
            queue_workers_process_ml: env_u32(
                "QUEUE_WORKERS_PROCESS_ML",
                QueueName::ProcessMl.default_max_workers(),
            ),
            queue_workers_retry_asset: env_u32(
                "QUEUE_WORKERS_RETRY_ASSET",
                QueueName::RetryAsset.default_max_workers(),
            ),
            queue_max_attempts: env_u32("QUEUE_MAX_ATTEMPTS", 25),
            ml_endpoint: env::var("ML_ENDPOINT").ok().and_then(|s| s.parse().ok()),
            watcher_debounce: Duration::from_millis(env_u64("WATCHER_DEBOUNCE_MS", 500)),
            reconciliation_interval: Duration::from_secs(env_u64(
                "RECONCILIATION_INTERVAL_SECS",
                24 * 60 * 60,
            )),
            reconciliation_batch_size: env_u64("RECONCILIATION_BATCH_SIZE", 100) as usize,
            reconciliation_parallelism: env_u64("RECONCILIATION_PARALLELISM", 4) as usize,
            hash_during_reconciliation: env_bool("HASH_DURING_RECONCILIATION", true),
            ml_batch_max_size: env_u64("ML_BATCH_MAX_SIZE", 16) as usize,
            ml_batch_max_wait: Duration::from_millis(env_u64("ML_BATCH_MAX_WAIT_MS", 1500)),
            exiftool_path: env::var("EXIFTOOL_PATH").unwrap_or_else(|_| "exiftool".to_string()),
            ffprobe_path: env::var("FFPROBE_PATH").unwrap_or_else(|_| "ffprobe".to_string()),
            dcraw_path: env::var("DCRAW_PATH").unwrap_or_else(|_| "dcraw".to_string()),
            server_host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            server_port: env_u32("SERVER_PORT", 8080) as u16,
        })
    }

    pub fn max_workers(&self, queue: QueueName) -> u32 {
        match queue {
            QueueName::ProcessAsset => self.queue_workers_process_asset,
            QueueName::ProcessMl => self.queue_workers_process_ml,
            QueueName::RetryAsset => self.queue_workers_retry_asset,
        }
    }
}

fn env_path(key: &str, default: &str) -> PathBuf {
    env::var(key).unwrap_or_else(|_| default.to_string()).into()
}

fn env_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
