//! # KB Vector Store
//!
//! Vector index lifecycle management for knowledge-base chunks.
//!
//! ## Features
//!
//! - **ANN search** via an in-memory HNSW graph (cosine distance)
//! - **Dense id mapping** from graph slots to chunk records
//! - **Best-effort persistence** through pluggable snapshot stores
//! - **Embedding policy** (retry, throttle, degrade) wrapped around a
//!   pluggable provider
//!
//! ## Architecture
//!
//! ```text
//! ChunkRecord[] + Vec<f32>[]
//!     │
//!     ├──> HnswGraph ──────> kNN search (ids + distances)
//!     │
//!     ├──> mapping (Vec)───> dense id -> ChunkRecord
//!     │
//!     └──> SnapshotStore ──> durable IndexSnapshot (best-effort)
//! ```
//!
//! The in-memory state is always authoritative: persistence failures are
//! logged and surfaced as [`Durability::MemoryOnly`], never as errors. The
//! graph has no live delete; [`IndexStore::remove_by_source`] rebuilds it
//! from the surviving records.
//!
//! ## Example
//!
//! ```no_run
//! use kb_vector_store::{
//!     Embedder, FileSnapshotStore, IndexParams, IndexStore, StubEmbeddingClient,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let embedder = Arc::new(Embedder::new(Arc::new(StubEmbeddingClient::new(768))));
//!     let snapshots = Arc::new(FileSnapshotStore::new(".kb/indexes"));
//!     let store =
//!         IndexStore::open("kb", IndexParams::default(), embedder, snapshots).await?;
//!
//!     let hits = store.nearest(&vec![0.0; 768], 5).await?;
//!     for (id, distance) in hits {
//!         println!("{id}: {distance:.3}");
//!     }
//!     Ok(())
//! }
//! ```

mod embeddings;
mod error;
mod hnsw;
mod persistence;
mod store;
mod types;

pub use embeddings::{
    cosine_similarity, stub_embedding, EmbedError, Embedder, EmbeddingClient, RetryPolicy,
    StubEmbeddingClient, DEFAULT_MIN_CALL_INTERVAL,
};
pub use error::{Result, VectorStoreError};
pub use hnsw::{GraphParams, HnswGraph, GRAPH_FORMAT_VERSION};
pub use persistence::{FileSnapshotStore, IndexSnapshot, NoopSnapshotStore, SnapshotStore};
pub use store::{Durability, IndexParams, IndexStore, InsertReceipt, RemovalReceipt};
pub use types::{ChunkRecord, SourceSummary};
