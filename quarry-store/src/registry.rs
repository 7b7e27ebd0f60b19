use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use crate::file::validate_namespace;
use crate::{FileKnowledgeStore, StoreError};

/// Hands out one shared store per namespace, so every session working on
/// the same dataset goes through the same lock.
pub struct StoreRegistry {
    dir: PathBuf,
    stores: Mutex<HashMap<String, Arc<FileKnowledgeStore>>>,
}

impl StoreRegistry {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            stores: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn open(&self, namespace: &str) -> Result<Arc<FileKnowledgeStore>, StoreError> {
        validate_namespace(namespace)?;
        let mut stores = self.stores.lock().await;
        if let Some(store) = stores.get(namespace) {
            return Ok(Arc::clone(store));
        }
        // Loading reads and parses the whole file; keep it off the runtime.
        let dir = self.dir.clone();
        let name = namespace.to_string();
        let store = tokio::task::spawn_blocking(move || FileKnowledgeStore::open(&dir, &name))
            .await
            .map_err(|e| StoreError::Io {
                path: self.dir.clone(),
                source: std::io::Error::new(std::io::ErrorKind::Other, e),
            })??;
        debug!(namespace, entries = store.len().await, "opened knowledge store");
        let store = Arc::new(store);
        stores.insert(namespace.to_string(), Arc::clone(&store));
        Ok(store)
    }

    /// Namespaces opened through this registry so far.
    pub async fn open_namespaces(&self) -> Vec<String> {
        let mut names: Vec<String> = self.stores.lock().await.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_namespace_shares_one_store() {
        let dir = tempfile::tempdir().unwrap();
        let registry = StoreRegistry::new(dir.path());

        let a = registry.open("sales").await.unwrap();
        let b = registry.open("sales").await.unwrap();
        let c = registry.open("hr").await.unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(registry.open_namespaces().await, vec!["hr", "sales"]);
        assert!(registry.open("../etc").await.is_err());
    }

    #[tokio::test]
    async fn concurrent_opens_load_once() {
        let dir = tempfile::tempdir().unwrap();
        let registry = StoreRegistry::new(dir.path());
        let (a, b) = tokio::join!(registry.open("sales"), registry.open("sales"));
        assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
    }

    #[tokio::test]
    async fn unreadable_store_is_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("sales.json"), b"not json").unwrap();
        let registry = StoreRegistry::new(dir.path());

        assert!(matches!(
            registry.open("sales").await,
            Err(StoreError::Corrupt { .. })
        ));
        assert!(registry.open_namespaces().await.is_empty());

        std::fs::remove_file(dir.path().join("sales.json")).unwrap();
        assert!(registry.open("sales").await.unwrap().is_empty().await);
    }
}
