//! Durable Job Queue: a Postgres-backed work table with named
//! queues, bounded worker pools, exponential-backoff retries, and a
//! singular leader for reconciliation scheduling.

pub mod leader;
pub mod postgres;
pub mod record;
pub mod worker;

pub use leader::LeaderElection;
pub use postgres::JobQueue;
pub use record::{ClaimedJob, JobState};
pub use worker::{spawn_worker_pool, JobHandler, JobHandlerError};
