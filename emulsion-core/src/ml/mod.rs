//! ML Client + Batcher: a long-lived connection to the embedding/
//! label inference service, with request coalescing so a burst of photo
//! ingests doesn't open one connection per asset.

pub mod batcher;
pub mod client;

pub use batcher::{apply_ml_outcome, MlBatcher, MlBatcherHandle, MlOutcome};
pub use client::{MlClient, MlLabel, MlRequest, MlResponse, MlTaskKind};
