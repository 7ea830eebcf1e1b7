use thiserror::Error;

pub type Result<T> = std::result::Result<T, IndexerError>;

#[derive(Error, Debug)]
pub enum IndexerError {
    #[error("vector store error: {0}")]
    VectorStore(#[from] kb_vector_store::VectorStoreError),

    #[error("{0}")]
    Other(String),
}
