use kb_vector_store::{Durability, SourceSummary};
use serde::{Deserialize, Serialize};

/// Structured result of one batch indexing call. Internal failures are
/// caught at the batch boundary and land here instead of propagating; the
/// caller can tell full success, in-memory-only success, and failure apart
/// without reading logs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexOutcome {
    pub source_path: String,
    /// Number of chunks actually indexed.
    pub chunks: usize,
    pub success: bool,
    /// Present on success; `memory_only` means the snapshot save failed and
    /// the data lives only in this process.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub durability: Option<Durability>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IndexOutcome {
    pub fn success(source_path: impl Into<String>, chunks: usize, durability: Durability) -> Self {
        Self {
            source_path: source_path.into(),
            chunks,
            success: true,
            durability: Some(durability),
            error: None,
        }
    }

    pub fn failure(source_path: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            source_path: source_path.into(),
            chunks: 0,
            success: false,
            durability: None,
            error: Some(error.into()),
        }
    }
}

/// Lightweight description of what the knowledge base currently holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeBaseSummary {
    pub documents: Vec<SourceSummary>,
    pub total_chunks: usize,
}
