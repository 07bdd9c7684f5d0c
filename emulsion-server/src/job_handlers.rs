//! Bridges queue payloads to the ingestion engine's processors.
//! Each named queue gets its own [`JobHandler`]: `process_asset` and
//! `retry_asset` dispatch to [`AssetProcessor`]/[`RetryProcessor`], and
//! `process_ml` dispatches to [`MlHandler`], which submits the decoded
//! image to the ML batcher and persists whatever comes back.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use emulsion_core::ml::{apply_ml_outcome, MlBatcherHandle};
use emulsion_core::processor::retry::RetryProcessor;
use emulsion_core::processor::AssetProcessor;
use emulsion_core::queue::{JobHandler, JobHandlerError};
use emulsion_core::AssetIndex;
use emulsion_model::{subtask, AssetStatus, JobId, JobPayload, RepositoryId, TaskError};
use tracing::info;

/// One [`AssetProcessor`]/[`RetryProcessor`] pair per known repository,
/// keyed by repository id since both are built from a repository-specific
/// [`emulsion_core::RepositoryLayout`] and storage policy.
pub struct ProcessAssetHandler {
    processors: HashMap<RepositoryId, Arc<AssetProcessor>>,
}

impl ProcessAssetHandler {
    pub fn new(processors: HashMap<RepositoryId, Arc<AssetProcessor>>) -> Self {
        Self { processors }
    }
}

#[async_trait]
impl JobHandler for ProcessAssetHandler {
    async fn handle(&self, job_id: JobId, payload: JobPayload) -> Result<(), JobHandlerError> {
        let JobPayload::ProcessAsset(payload) = payload else {
            return Err(JobHandlerError::permanent("process_asset handler received a foreign payload"));
        };

        let processor = self
            .processors
            .get(&payload.repository_id)
            .ok_or_else(|| JobHandlerError::permanent(format!("unknown repository {}", payload.repository_id)))?;

        match processor.process(&payload, payload.repository_id).await {
            Ok(asset_id) => {
                info!(job_id = %job_id, asset_id = %asset_id, "processed asset");
                Ok(())
            }
            Err(err) => Err(JobHandlerError::transient(err.to_string())),
        }
    }
}

pub struct RetryAssetHandler {
    /// Every repository's [`RetryProcessor`] is tried in turn; the asset's
    /// home repository isn't known until its row is read, and that lookup
    /// already lives inside `retry`, so dispatch here is by asset id alone.
    processors: Vec<Arc<RetryProcessor>>,
}

impl RetryAssetHandler {
    pub fn new(processors: Vec<Arc<RetryProcessor>>) -> Self {
        Self { processors }
    }
}

#[async_trait]
impl JobHandler for RetryAssetHandler {
    async fn handle(&self, job_id: JobId, payload: JobPayload) -> Result<(), JobHandlerError> {
        let JobPayload::RetryAsset(payload) = payload else {
            return Err(JobHandlerError::permanent("retry_asset handler received a foreign payload"));
        };

        let mut last_err = None;
        for processor in &self.processors {
            match processor.retry(payload.asset_id, payload.tasks.clone()).await {
                Ok(status) => {
                    info!(job_id = %job_id, asset_id = %payload.asset_id, status = ?status, "retried asset");
                    return Ok(());
                }
                Err(emulsion_core::EngineError::NotFound(_)) => continue,
                Err(err) => last_err = Some(err),
            }
        }

        match last_err {
            Some(err) => Err(JobHandlerError::transient(err.to_string())),
            None => Err(JobHandlerError::permanent(format!("asset {} not found in any repository", payload.asset_id))),
        }
    }
}

/// Consumes `process_ml`: submits the decoded image to the ML batcher,
/// persists the resulting embedding/labels, and folds a failure into the
/// asset's status the same way a failed inline subtask used to.
pub struct MlHandler {
    ml_batcher: MlBatcherHandle,
    index: Arc<dyn AssetIndex>,
}

impl MlHandler {
    pub fn new(ml_batcher: MlBatcherHandle, index: Arc<dyn AssetIndex>) -> Self {
        Self { ml_batcher, index }
    }
}

#[async_trait]
impl JobHandler for MlHandler {
    async fn handle(&self, job_id: JobId, payload: JobPayload) -> Result<(), JobHandlerError> {
        let JobPayload::ProcessMl(payload) = payload else {
            return Err(JobHandlerError::permanent("process_ml handler received a foreign payload"));
        };

        let result = self.ml_batcher.submit(payload.asset_id, payload.image_bytes).await;

        let task_error = match result {
            Ok(outcome) => {
                if let Err(e) = apply_ml_outcome(self.index.as_ref(), outcome).await {
                    Some(e.to_string())
                } else {
                    None
                }
            }
            Err(e) => Some(e.to_string()),
        };

        let asset = self
            .index
            .get(payload.asset_id)
            .await
            .map_err(|e| JobHandlerError::transient(e.to_string()))?
            .ok_or_else(|| JobHandlerError::permanent(format!("asset {} not found", payload.asset_id)))?;

        let mut errors: Vec<TaskError> = asset
            .status
            .errors()
            .iter()
            .filter(|e| e.task != subtask::CLIP_PROCESSING)
            .cloned()
            .collect();
        if let Some(message) = &task_error {
            errors.push(TaskError::new(subtask::CLIP_PROCESSING, message.clone()));
        }
        let status = AssetStatus::from_errors(errors);

        self.index
            .update_status(payload.asset_id, &status)
            .await
            .map_err(|e| JobHandlerError::transient(e.to_string()))?;

        match task_error {
            None => {
                info!(job_id = %job_id, asset_id = %payload.asset_id, "ml processing complete");
                Ok(())
            }
            Some(message) => Err(JobHandlerError::transient(message)),
        }
    }
}
