//! Bidirectional stream client for the remote ML inference service.
//! Framing is newline-delimited JSON over a persistent TCP connection (see
//! DESIGN.md for why this resolves the wire-format Open Question).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, warn};
use uuid::Uuid;

use crate::error::{EngineError, Result};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MlTaskKind {
    Embedding,
    Labels,
    Both,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MlRequest {
    pub task_kind: MlTaskKind,
    pub payload: Vec<u8>,
    pub sequence: u64,
    pub correlation_id: Uuid,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MlResponse {
    pub correlation_id: Uuid,
    pub embedding: Option<Vec<f32>>,
    pub labels: Vec<MlLabel>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MlLabel {
    pub label: String,
    pub score: f32,
}

type Pending = Arc<Mutex<HashMap<Uuid, oneshot::Sender<Result<MlResponse>>>>>;

/// Owns one persistent connection to the ML service and the correlation
/// table that routes asynchronous responses back to their request's caller.
pub struct MlClient {
    outbound: mpsc::UnboundedSender<MlRequest>,
    pending: Pending,
}

impl MlClient {
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| EngineError::Internal(format!("ml connect failed: {e}")))?;
        let (read_half, mut write_half) = stream.into_split();

        let (tx, mut rx) = mpsc::unbounded_channel::<MlRequest>();
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));

        // Writer task: serialize each request as one NDJSON line.
        tokio::spawn(async move {
            while let Some(req) = rx.recv().await {
                let mut line = match serde_json::to_vec(&req) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        error!(error = %e, "failed to serialize ml request");
                        continue;
                    }
                };
                line.push(b'\n');
                if let Err(e) = write_half.write_all(&line).await {
                    error!(error = %e, "ml connection write failed");
                    break;
                }
            }
        });

        // Reader task: dispatch responses back by correlation id, never by
        // arrival order.
        let pending_reader = pending.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(read_half).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => match serde_json::from_str::<MlResponse>(&line) {
                        Ok(resp) => {
                            if let Some(sender) = pending_reader.lock().remove(&resp.correlation_id) {
                                let _ = sender.send(Ok(resp));
                            } else {
                                warn!(correlation_id = %resp.correlation_id, "unmatched ml response");
                            }
                        }
                        Err(e) => error!(error = %e, "failed to parse ml response"),
                    },
                    Ok(None) => break,
                    Err(e) => {
                        error!(error = %e, "ml connection read failed");
                        break;
                    }
                }
            }

            // The connection is gone; every request still waiting on a
            // response needs to fail rather than hang forever. The queue's
            // handler timeout is a backstop, not a substitute for this —
            // failing here is immediate instead of waiting out the timeout.
            let stragglers: Vec<_> = pending_reader.lock().drain().collect();
            for (correlation_id, sender) in stragglers {
                warn!(%correlation_id, "ml connection closed with request still in flight, failing it");
                let _ = sender.send(Err(EngineError::Internal("ml connection closed".to_string())));
            }
        });

        Ok(Self {
            outbound: tx,
            pending,
        })
    }

    /// Sends one request and awaits its matching response. The batcher is
    /// the usual caller; this also works for unbatched single requests.
    pub async fn send(&self, request: MlRequest) -> Result<MlResponse> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(request.correlation_id, tx);

        self.outbound
            .send(request)
            .map_err(|_| EngineError::Internal("ml connection closed".to_string()))?;

        rx.await
            .map_err(|_| EngineError::Internal("ml connection reset before response".to_string()))?
    }
}
