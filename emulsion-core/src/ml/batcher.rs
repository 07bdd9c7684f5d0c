//! Coalesces individual embedding/label requests into batches bounded by
//! size and a maximum wait window before handing them to the ML client
//!.

use std::collections::HashMap;
use std::time::Duration;

use emulsion_model::{AssetId, Embedding, EmbeddingId, LabelPrediction};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{error, warn};
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::index::AssetIndex;

use super::client::{MlClient, MlRequest, MlTaskKind};

pub struct MlOutcome {
    pub asset_id: AssetId,
    pub embedding: Option<Vec<f32>>,
    pub labels: Vec<super::client::MlLabel>,
}

/// Writes one ML outcome's embedding/labels through `index`. Shared by the
/// `process_ml` queue handler and the selective-retry path so both persist
/// results the same way.
pub async fn apply_ml_outcome(index: &dyn AssetIndex, outcome: MlOutcome) -> Result<()> {
    if let Some(vector) = outcome.embedding {
        index
            .upsert_embedding(&Embedding {
                id: EmbeddingId::new(),
                asset_id: outcome.asset_id,
                embedding_kind: "clip".to_string(),
                model: "clip-vit-b32".to_string(),
                vector,
                primary: true,
            })
            .await?;
    }
    if !outcome.labels.is_empty() {
        let predictions: Vec<_> = outcome
            .labels
            .into_iter()
            .map(|l| LabelPrediction {
                asset_id: outcome.asset_id,
                label: l.label,
                score: l.score,
                group: None,
            })
            .collect();
        index.store_label_predictions(&predictions).await?;
    }
    Ok(())
}

struct PendingItem {
    asset_id: AssetId,
    image_bytes: Vec<u8>,
    reply: oneshot::Sender<Result<MlOutcome>>,
}

/// Handle used by callers to submit work into the batcher's queue.
#[derive(Clone)]
pub struct MlBatcherHandle {
    submit: mpsc::UnboundedSender<PendingItem>,
}

impl MlBatcherHandle {
    /// Submits one asset for ML processing and awaits its outcome. The
    /// actual network round trip may be shared with other assets submitted
    /// within the same batching window.
    pub async fn submit(&self, asset_id: AssetId, image_bytes: Vec<u8>) -> Result<MlOutcome> {
        let (tx, rx) = oneshot::channel();
        self.submit
            .send(PendingItem {
                asset_id,
                image_bytes,
                reply: tx,
            })
            .map_err(|_| EngineError::Internal("ml batcher shut down".to_string()))?;
        rx.await
            .map_err(|_| EngineError::Internal("ml batcher dropped request".to_string()))?
    }
}

/// Background task that drains submitted items into batches of at most
/// `max_batch_size`, flushing early once `max_wait` has elapsed since the
/// first item in the current batch arrived.
pub struct MlBatcher {
    client: MlClient,
    max_batch_size: usize,
    max_wait: Duration,
}

impl MlBatcher {
    pub fn new(client: MlClient, max_batch_size: usize, max_wait: Duration) -> Self {
        Self {
            client,
            max_batch_size: max_batch_size.max(1),
            max_wait,
        }
    }

    /// Spawns the batching loop and returns a cheaply cloneable handle for
    /// submitting work to it.
    pub fn spawn(self) -> MlBatcherHandle {
        let (tx, mut rx) = mpsc::unbounded_channel::<PendingItem>();

        tokio::spawn(async move {
            let mut batch: Vec<PendingItem> = Vec::with_capacity(self.max_batch_size);
            loop {
                let Some(first) = rx.recv().await else {
                    break;
                };
                batch.push(first);
                let deadline = Instant::now() + self.max_wait;

                while batch.len() < self.max_batch_size {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        break;
                    }
                    match tokio::time::timeout(remaining, rx.recv()).await {
                        Ok(Some(item)) => batch.push(item),
                        Ok(None) => break,
                        Err(_) => break,
                    }
                }

                let flushed = std::mem::take(&mut batch);
                self.flush(flushed).await;

                if rx.is_closed() && rx.len() == 0 {
                    break;
                }
            }
        });

        MlBatcherHandle { submit: tx }
    }

    /// Fires every request in the batch onto the wire without waiting for
    /// any individual response, then awaits them all concurrently — the
    /// point of batching is overlapping round trips, not serializing them.
    async fn flush(&self, items: Vec<PendingItem>) {
        let futures = items
            .into_iter()
            .enumerate()
            .map(|(sequence, item)| async move {
                let correlation_id = Uuid::new_v4();
                let request = MlRequest {
                    task_kind: MlTaskKind::Both,
                    payload: item.image_bytes,
                    sequence: sequence as u64,
                    correlation_id,
                    metadata: HashMap::from([("asset_id".to_string(), item.asset_id.to_string())]),
                };

                let result = self.client.send(request).await.map(|response| {
                    if response.correlation_id != correlation_id {
                        warn!("ml response correlation id mismatch");
                    }
                    MlOutcome {
                        asset_id: item.asset_id,
                        embedding: response.embedding,
                        labels: response.labels,
                    }
                });

                if let Err(ref e) = result {
                    error!(error = %e, asset_id = %item.asset_id, "ml request failed");
                }
                let _ = item.reply.send(result);
            });

        futures::future::join_all(futures).await;
    }
}
