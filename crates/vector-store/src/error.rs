use crate::embeddings::EmbedError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, VectorStoreError>;

#[derive(Error, Debug)]
pub enum VectorStoreError {
    #[error("index capacity exceeded: {requested} elements requested, capacity {capacity}")]
    CapacityExceeded { requested: usize, capacity: usize },

    #[error("invalid vector dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },

    #[error("embedding error: {0}")]
    Embedding(#[from] EmbedError),

    #[error("graph codec error: {0}")]
    GraphCodec(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}
