use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One indexed chunk of a source document.
///
/// Records are addressed by dense integer ids assigned at insertion time;
/// the id is the record's position in the store's mapping and is renumbered
/// on every rebuild.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// Raw chunk text as produced by extraction.
    pub content: String,
    /// Enrichment-augmented text actually used for embedding. Falls back to
    /// `content` when enrichment failed for this chunk.
    pub contextual_content: String,
    /// Path of the source document the chunk came from.
    pub source_path: String,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// Position of this chunk within its source document.
    pub chunk_index: usize,
    /// Number of chunks the source document was split into.
    pub total_chunks: usize,
    /// Whether `contextual_content` carries generated context.
    #[serde(default)]
    pub is_contextual: bool,
}

/// Per-source chunk count, as reported by [`crate::IndexStore::source_summary`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSummary {
    pub source_path: String,
    pub chunks: usize,
}
