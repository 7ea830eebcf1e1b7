//! # KB Enricher
//!
//! Contextual enrichment pipeline for knowledge-base chunks.
//!
//! Each chunk is prefixed with a short generated sentence situating it
//! within its source document before embedding, which improves retrieval
//! recall for context-poor chunks. Generation runs on a bounded worker pool
//! and degrades per chunk: a failed generation leaves that chunk raw and the
//! batch continues.

mod enricher;
mod error;
mod prompt;

pub use enricher::{ContextGenerator, ContextualEnricher, EnrichedChunk};
pub use error::{EnrichError, Result};
pub use prompt::{
    build_context_prompt, compose_contextual_text, MAX_CHUNK_CHARS, MAX_CONTEXT_CHARS,
    MAX_DOCUMENT_CHARS, MIN_CONTEXT_CHARS,
};
