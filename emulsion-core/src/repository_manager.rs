//! Repository Manager: tracks known repositories and loads their
//! per-repository configuration (storage strategy, duplicate-filename
//! policy, maximum file size, original-filename preservation). Exposes
//! lookup by ID or by path.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use emulsion_model::{Repository, RepositoryConfigFile, RepositoryId, RepositoryStatus};
use parking_lot::RwLock;

use crate::error::{EngineError, Result};
use crate::layout::RepositoryLayout;

/// Durable persistence for the repository registry itself (distinct from
/// [`crate::index::AssetIndex`] and [`crate::sync::FileIndex`] — a
/// repository row is metadata about a directory tree, not derived from its
/// contents).
#[async_trait]
pub trait RepositoryStore: Send + Sync {
    async fn list_repositories(&self) -> Result<Vec<Repository>>;
    async fn create_repository(&self, repository: &Repository) -> Result<()>;
    async fn update_repository(&self, repository: &Repository) -> Result<()>;
}

/// In-memory registry of known repositories, backed by a [`RepositoryStore`]
/// for durability across restarts. Each repository's `emulsion.toml` is read
/// from disk at registration time; a brand-new root gets a default one
/// written.
pub struct RepositoryManager {
    store: Arc<dyn RepositoryStore>,
    by_id: RwLock<HashMap<RepositoryId, Repository>>,
    by_path: RwLock<HashMap<PathBuf, RepositoryId>>,
}

impl RepositoryManager {
    pub fn new(store: Arc<dyn RepositoryStore>) -> Self {
        Self {
            store,
            by_id: RwLock::new(HashMap::new()),
            by_path: RwLock::new(HashMap::new()),
        }
    }

    /// Loads every known repository from the store into the in-memory
    /// registry. Call once at startup before watching or serving requests.
    pub async fn load_all(&self) -> Result<()> {
        let repositories = self.store.list_repositories().await?;
        let mut by_id = self.by_id.write();
        let mut by_path = self.by_path.write();
        for repository in repositories {
            by_path.insert(repository.root.clone(), repository.id);
            by_id.insert(repository.id, repository);
        }
        Ok(())
    }

    /// Registers a brand-new repository rooted at `root`: creates the
    /// `.system`/`inbox` subtrees, loads or writes `emulsion.toml`, and
    /// persists the repository row.
    pub async fn register(&self, root: PathBuf) -> Result<Repository> {
        if self.by_path.read().contains_key(&root) {
            return Err(EngineError::InvalidRequest(format!("{} is already registered", root.display())));
        }

        let layout = RepositoryLayout::new(&root);
        layout.ensure_system_dirs()?;
        let config = load_or_write_default_config(&root)?;

        let repository = Repository {
            id: RepositoryId::new(),
            root: root.clone(),
            config,
            status: RepositoryStatus::Active,
            last_sync_at: None,
        };

        self.store.create_repository(&repository).await?;
        self.by_id.write().insert(repository.id, repository.clone());
        self.by_path.write().insert(root, repository.id);
        Ok(repository)
    }

    pub fn get(&self, id: RepositoryId) -> Option<Repository> {
        self.by_id.read().get(&id).cloned()
    }

    pub fn find_by_path(&self, path: &Path) -> Option<Repository> {
        let id = *self.by_path.read().get(path)?;
        self.get(id)
    }

    pub fn list(&self) -> Vec<Repository> {
        self.by_id.read().values().cloned().collect()
    }

    pub async fn set_status(&self, id: RepositoryId, status: RepositoryStatus) -> Result<()> {
        let mut repository = self.get(id).ok_or_else(|| EngineError::NotFound(format!("repository {id}")))?;
        repository.status = status;
        self.store.update_repository(&repository).await?;
        self.by_id.write().insert(id, repository);
        Ok(())
    }
}

fn load_or_write_default_config(root: &Path) -> Result<RepositoryConfigFile> {
    match emulsion_config::repository_config::load(root) {
        Ok(config) => Ok(config),
        Err(_) => emulsion_config::repository_config::write_default(root).map_err(|e| EngineError::Internal(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct InMemoryStore {
        repositories: StdMutex<Vec<Repository>>,
    }

    #[async_trait]
    impl RepositoryStore for InMemoryStore {
        async fn list_repositories(&self) -> Result<Vec<Repository>> {
            Ok(self.repositories.lock().unwrap().clone())
        }

        async fn create_repository(&self, repository: &Repository) -> Result<()> {
            self.repositories.lock().unwrap().push(repository.clone());
            Ok(())
        }

        async fn update_repository(&self, repository: &Repository) -> Result<()> {
            let mut repositories = self.repositories.lock().unwrap();
            if let Some(existing) = repositories.iter_mut().find(|r| r.id == repository.id) {
                *existing = repository.clone();
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn register_writes_default_config_and_is_lookupable_by_path_and_id() {
        let dir = tempfile::tempdir().unwrap();
        let manager = RepositoryManager::new(Arc::new(InMemoryStore::default()));

        let repository = manager.register(dir.path().to_path_buf()).await.unwrap();
        assert!(dir.path().join("emulsion.toml").exists());
        assert_eq!(manager.get(repository.id).unwrap().root, dir.path());
        assert_eq!(manager.find_by_path(dir.path()).unwrap().id, repository.id);
    }

    #[tokio::test]
    async fn registering_the_same_path_twice_fails() {
        let dir = tempfile::tempdir().unwrap();
        let manager = RepositoryManager::new(Arc::new(InMemoryStore::default()));
        manager.register(dir.path().to_path_buf()).await.unwrap();
        assert!(manager.register(dir.path().to_path_buf()).await.is_err());
    }
}
