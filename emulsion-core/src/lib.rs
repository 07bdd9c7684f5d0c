//! Ingestion pipeline and filesystem synchronization engine. Two largely independent subsystems share this crate:
//!
//! - ingestion: staging, metadata extraction, thumbnailing, ML batching,
//!   the durable job queue, and the asset processor/retry processor that
//!   orchestrate them.
//! - sync: the file watcher, reconciliation scanner, sync manager, and
//!   repository manager that keep a database file index consistent with a
//!   user-managed directory tree.
//!
//! Both share [`layout::RepositoryLayout`] as the single source of truth
//! for which subtrees are protected from scanning.

pub mod error;
pub mod fault_tolerant;
pub mod index;
pub mod index_postgres;
pub mod layout;
pub mod metadata;
pub mod ml;
pub mod processor;
pub mod queue;
pub mod repository_manager;
pub mod repository_store_postgres;
pub mod staging;
pub mod sync;
pub mod thumbnail;

pub use error::{EngineError, Result};
pub use index::AssetIndex;
pub use index_postgres::PostgresAssetIndex;
pub use layout::RepositoryLayout;
pub use repository_manager::{RepositoryManager, RepositoryStore};
pub use repository_store_postgres::PostgresRepositoryStore;
