//! Ingest/retry HTTP boundary. Auth and the wider
//! relational query surface are external collaborators this router doesn't
//! attempt to stand in for.

use std::io::Cursor;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use emulsion_core::queue::JobQueue;
use emulsion_core::{RepositoryLayout, RepositoryManager};
use emulsion_core::staging::StagingManager;
use emulsion_model::{AssetId, JobPayload, ProcessAssetPayload, RepositoryId, RetryAssetPayload, UserId};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use crate::errors::AppError;

#[derive(Clone)]
pub struct AppState {
    pub job_queue: JobQueue,
    pub repository_manager: Arc<RepositoryManager>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/repositories/:repository_id/ingest", post(ingest_handler))
        .route("/assets/:asset_id/retry", post(retry_handler))
        .with_state(state)
}

async fn health_handler() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[derive(Serialize)]
struct IngestResponse {
    job_id: emulsion_model::JobId,
    status: &'static str,
}

/// `POST /repositories/:repository_id/ingest`: body is the raw file
/// bytes; declared hash, MIME, original filename, and acting user travel as
/// headers so the body stays a pure byte stream.
async fn ingest_handler(
    State(state): State<AppState>,
    Path(repository_id): Path<Uuid>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<(StatusCode, Json<IngestResponse>), AppError> {
    let repository_id = RepositoryId(repository_id);
    let client_hash = header_str(&headers, "x-content-hash")
        .ok_or_else(|| AppError::new(StatusCode::BAD_REQUEST, "missing X-Content-Hash header"))?;
    let mime = header_str(&headers, "x-content-type").unwrap_or_else(|| "application/octet-stream".to_string());
    let original_filename = header_str(&headers, "x-original-filename")
        .ok_or_else(|| AppError::new(StatusCode::BAD_REQUEST, "missing X-Original-Filename header"))?;
    let user_id = header_str(&headers, "x-user-id")
        .and_then(|s| uuid::Uuid::parse_str(&s).ok())
        .map(UserId)
        .ok_or_else(|| AppError::new(StatusCode::BAD_REQUEST, "missing or invalid X-User-Id header"))?;

    let repository = state
        .repository_manager
        .get(repository_id)
        .ok_or_else(|| AppError::new(StatusCode::NOT_FOUND, format!("repository {repository_id}")))?;

    let staging = StagingManager::new(RepositoryLayout::new(repository.root.clone()));
    let max_bytes = repository.config.local_settings.max_file_size.saturating_mul(1024);
    let staged_path = staging
        .stage(Cursor::new(body.to_vec()), &original_filename, max_bytes)
        .await?;

    let job_id = state
        .job_queue
        .enqueue(JobPayload::ProcessAsset(ProcessAssetPayload {
            staged_path: staged_path.to_string_lossy().into_owned(),
            client_hash,
            user_id,
            repository_id,
            original_filename,
            mime,
            timestamp: Utc::now(),
        }))
        .await?;

    info!(job_id = %job_id, repository_id = %repository_id, "accepted upload");
    Ok((
        StatusCode::ACCEPTED,
        Json(IngestResponse {
            job_id,
            status: "accepted",
        }),
    ))
}

#[derive(Deserialize)]
struct RetryRequest {
    #[serde(default)]
    tasks: Option<Vec<String>>,
    #[serde(default)]
    force_full_retry: bool,
}

#[derive(Serialize)]
struct RetryResponse {
    asset_id: AssetId,
    status: &'static str,
    retry_tasks: Vec<String>,
}

/// `POST /assets/:asset_id/retry`: enqueues a `retry_asset` job rather
/// than running the retry inline, so it shares the queue's backoff/dead-
/// letter machinery with ordinary ingestion.
async fn retry_handler(
    State(state): State<AppState>,
    Path(asset_id): Path<Uuid>,
    Json(request): Json<RetryRequest>,
) -> Result<Json<RetryResponse>, AppError> {
    let asset_id = AssetId(asset_id);
    let tasks = match (request.tasks, request.force_full_retry) {
        (Some(tasks), _) if !tasks.is_empty() => tasks,
        (_, true) => default_recoverable_subtasks(),
        _ => {
            return Err(AppError::new(
                StatusCode::BAD_REQUEST,
                "must specify tasks or force_full_retry",
            ))
        }
    };

    let job_id = state
        .job_queue
        .enqueue(JobPayload::RetryAsset(RetryAssetPayload {
            asset_id,
            tasks: tasks.clone(),
        }))
        .await?;

    info!(job_id = %job_id, asset_id = %asset_id, "queued retry");
    Ok(Json(RetryResponse {
        asset_id,
        status: "queued",
        retry_tasks: tasks,
    }))
}

/// Every subtask outside the fatal set, used when a caller asks for
/// `force_full_retry` without naming specific subtasks.
fn default_recoverable_subtasks() -> Vec<String> {
    use emulsion_model::subtask;
    [
        subtask::EXTRACT_EXIF,
        subtask::EXTRACT_METADATA,
        subtask::RAW_PROCESSING,
        subtask::GENERATE_THUMBNAILS,
        subtask::SAVE_THUMBNAILS,
        subtask::CLIP_PROCESSING,
        subtask::GENERATE_WEB_VERSION,
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers.get(name)?.to_str().ok().map(str::to_string)
}
