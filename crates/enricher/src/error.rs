use thiserror::Error;

pub type Result<T> = std::result::Result<T, EnrichError>;

#[derive(Error, Debug)]
pub enum EnrichError {
    #[error("context generation failed: {0}")]
    Generation(String),

    #[error("{0}")]
    Other(String),
}
