use std::io::{self, Write};
use std::path::{Path, PathBuf};

use quarry_types::{KnowledgeEntry, TrainingRecord};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::StoreError;

const FORMAT_VERSION: u32 = 1;

#[derive(Serialize)]
struct StoreFileRef<'a> {
    version: u32,
    entries: &'a [KnowledgeEntry],
}

#[derive(Deserialize)]
struct StoreFile {
    version: u32,
    #[serde(default)]
    entries: Vec<KnowledgeEntry>,
}

/// Knowledge entries of one namespace, persisted as a single JSON document.
///
/// The whole namespace is loaded on open. Every mutation rewrites the file
/// through a temp file and a rename while the write lock is held, and is
/// rolled back in memory if the write fails.
pub struct FileKnowledgeStore {
    namespace: String,
    path: PathBuf,
    entries: RwLock<Vec<KnowledgeEntry>>,
}

impl FileKnowledgeStore {
    /// Open `{dir}/{namespace}.json`. A missing file is an empty store.
    pub fn open(dir: impl AsRef<Path>, namespace: &str) -> Result<Self, StoreError> {
        validate_namespace(namespace)?;
        let path = dir.as_ref().join(format!("{namespace}.json"));
        let entries = load(&path)?;
        info!(namespace, entries = entries.len(), path = %path.display(), "opened knowledge store");
        Ok(Self {
            namespace: namespace.to_string(),
            path,
            entries: RwLock::new(entries),
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Embedding length shared by all entries, if any are stored.
    pub async fn dim(&self) -> Option<usize> {
        self.entries.read().await.first().map(|e| e.embedding.len())
    }

    /// Run `f` over the entries under the read lock, without cloning them.
    pub async fn with_entries<R>(&self, f: impl FnOnce(&[KnowledgeEntry]) -> R) -> R {
        let guard = self.entries.read().await;
        f(&guard)
    }

    pub async fn get_all(&self) -> Vec<TrainingRecord> {
        self.entries
            .read()
            .await
            .iter()
            .map(TrainingRecord::from)
            .collect()
    }

    pub async fn insert(&self, entry: KnowledgeEntry) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        if let Some(first) = entries.first() {
            if first.embedding.len() != entry.embedding.len() {
                return Err(StoreError::DimensionMismatch {
                    expected: first.embedding.len(),
                    actual: entry.embedding.len(),
                });
            }
        }

        entries.push(entry);
        if let Err(e) = self.persist(&entries).await {
            entries.pop();
            return Err(e);
        }
        debug!(namespace = %self.namespace, entries = entries.len(), "inserted knowledge entry");
        Ok(())
    }

    /// Remove by id. Returns `false` when no such entry exists.
    pub async fn remove(&self, id: &str) -> Result<bool, StoreError> {
        let mut entries = self.entries.write().await;
        let Some(pos) = entries.iter().position(|e| e.id == id) else {
            return Ok(false);
        };

        let removed = entries.remove(pos);
        if let Err(e) = self.persist(&entries).await {
            entries.insert(pos, removed);
            return Err(e);
        }
        info!(namespace = %self.namespace, id, "removed knowledge entry");
        Ok(true)
    }

    pub async fn clear(&self) -> Result<usize, StoreError> {
        let mut entries = self.entries.write().await;
        let previous = std::mem::take(&mut *entries);
        if let Err(e) = self.persist(&entries).await {
            *entries = previous;
            return Err(e);
        }
        Ok(previous.len())
    }

    async fn persist(&self, entries: &[KnowledgeEntry]) -> Result<(), StoreError> {
        let io_err = |source: io::Error| StoreError::Io {
            path: self.path.clone(),
            source,
        };
        let bytes = serde_json::to_vec_pretty(&StoreFileRef {
            version: FORMAT_VERSION,
            entries,
        })
        .map_err(|e| io_err(e.into()))?;

        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomically(&path, &bytes))
            .await
            .map_err(|e| io_err(io::Error::new(io::ErrorKind::Other, e)))?
            .map_err(io_err)
    }
}

/// Namespaces become file names, so only `[A-Za-z0-9_.-]` is allowed and
/// dot-only names are rejected.
pub fn validate_namespace(namespace: &str) -> Result<(), StoreError> {
    let valid_chars = namespace
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
    if namespace.is_empty() || !valid_chars || namespace.chars().all(|c| c == '.') {
        return Err(StoreError::InvalidNamespace(namespace.to_string()));
    }
    Ok(())
}

fn load(path: &Path) -> Result<Vec<KnowledgeEntry>, StoreError> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let corrupt = |reason: String| StoreError::Corrupt {
        path: path.to_path_buf(),
        reason,
    };
    let file: StoreFile = serde_json::from_slice(&bytes).map_err(|e| corrupt(e.to_string()))?;
    if file.version != FORMAT_VERSION {
        return Err(corrupt(format!("unsupported format version {}", file.version)));
    }
    if let Some(first) = file.entries.first() {
        let dim = first.embedding.len();
        if let Some(bad) = file.entries.iter().find(|e| e.embedding.len() != dim) {
            return Err(corrupt(format!(
                "entry {} has {} dimensions, expected {dim}",
                bad.id,
                bad.embedding.len()
            )));
        }
    }
    Ok(file.entries)
}

fn write_atomically(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
