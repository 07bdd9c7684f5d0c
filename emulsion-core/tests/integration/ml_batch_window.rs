//! Scenario: three requests arrive 400 ms apart against an 8-item batch
//! size and a 1500 ms window. None of them individually fills the batch, so
//! all three should be flushed together once the window elapses after the
//! first arrival.
//!
//! Uses a paused clock so the test resolves instantly instead of actually
//! waiting ~1.5 real seconds.

use std::sync::Arc;
use std::time::Duration;

use emulsion_core::ml::{MlBatcher, MlClient};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::Mutex;

/// Records the wall-clock-relative arrival order of every request it sees
/// and replies immediately, echoing the correlation id back.
async fn spawn_recording_ml_server(received: Arc<Mutex<Vec<serde_json::Value>>>) -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let request: serde_json::Value = serde_json::from_str(&line).unwrap();
            received.lock().await.push(request.clone());
            let response = serde_json::json!({
                "correlation_id": request["correlation_id"],
                "embedding": [0.0_f32],
                "labels": [],
            });
            let mut bytes = serde_json::to_vec(&response).unwrap();
            bytes.push(b'\n');
            if write_half.write_all(&bytes).await.is_err() {
                break;
            }
        }
    });

    addr
}

#[tokio::test(start_paused = true)]
async fn three_requests_within_the_window_flush_as_one_batch() {
    let received = Arc::new(Mutex::new(Vec::new()));
    let addr = spawn_recording_ml_server(received.clone()).await;

    let client = MlClient::connect(addr).await.unwrap();
    let batcher = MlBatcher::new(client, 8, Duration::from_millis(1500)).spawn();

    let asset_ids: Vec<_> = (0..3).map(|_| emulsion_model::AssetId::new()).collect();

    let mut handles = Vec::new();
    for (i, asset_id) in asset_ids.iter().copied().enumerate() {
        let batcher = batcher.clone();
        handles.push(tokio::spawn(async move {
            batcher.submit(asset_id, vec![i as u8]).await
        }));
        tokio::time::advance(Duration::from_millis(400)).await;
    }

    // The window started when the first item arrived; two more 400ms steps
    // have elapsed (800ms total) so the batch hasn't flushed yet. Advance
    // past the full 1500ms window from the first arrival.
    tokio::time::advance(Duration::from_millis(1500 - 800 + 50)).await;

    let mut outcomes = Vec::new();
    for handle in handles {
        outcomes.push(handle.await.unwrap().unwrap());
    }

    assert_eq!(outcomes.len(), 3);
    for outcome in &outcomes {
        assert_eq!(outcome.embedding, Some(vec![0.0_f32]));
    }

    let seen = received.lock().await;
    assert_eq!(seen.len(), 3, "all three requests should reach the ml server in a single flushed batch");
}
