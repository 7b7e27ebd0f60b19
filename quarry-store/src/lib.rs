use std::path::PathBuf;

use quarry_embed::EmbeddingError;
use thiserror::Error;

pub mod file;
pub use file::FileKnowledgeStore;

pub mod registry;
pub use registry::StoreRegistry;

pub mod index;
pub use index::EmbeddingIndex;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt knowledge store {}: {reason}", .path.display())]
    Corrupt { path: PathBuf, reason: String },
    #[error("entry embedding has {actual} dimensions, store holds {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("invalid namespace '{0}'")]
    InvalidNamespace(String),
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("training input needs a question with its sql, ddl, or documentation")]
    InvalidTraining,
    #[error("embedder produces {embedder} dimensions, store holds {store}")]
    DimensionMismatch { embedder: usize, store: usize },
}
