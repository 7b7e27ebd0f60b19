use quarry_embed::EmbeddingError;
use quarry_exec::ExecutionError;
use quarry_infer::GenerationError;
use quarry_store::{IndexError, StoreError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    MissingVar(&'static str),
    #[error("{var} has invalid value '{value}'")]
    Invalid { var: &'static str, value: String },
}

#[derive(Debug, Error)]
pub enum AnalystError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Knowledge(#[from] IndexError),
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
}
