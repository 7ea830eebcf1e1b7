//! # KB Indexer
//!
//! Batch indexing pipeline: chunks in, searchable records out.
//!
//! ```text
//! chunks ──> ContextualEnricher ──> Embedder ──> IndexStore ──> snapshot
//!                (bounded pool)      (batched)    (insert)     (best-effort)
//! ```
//!
//! Failures are caught at the batch boundary and reported as structured
//! [`IndexOutcome`] values, one per source.

mod error;
mod indexer;
mod outcome;

pub use error::{IndexerError, Result};
pub use indexer::ChunkIndexer;
pub use outcome::{IndexOutcome, KnowledgeBaseSummary};
