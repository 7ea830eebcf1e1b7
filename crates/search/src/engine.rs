use crate::error::Result;
use kb_vector_store::IndexStore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// One ranked hit. `similarity` is `1 - cosine_distance`, so an exact match
/// scores ~1.0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: usize,
    pub content: String,
    pub source_path: String,
    pub metadata: HashMap<String, serde_json::Value>,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub similarity: f32,
}

/// Semantic query engine layered on [`IndexStore`].
///
/// The raw query text is embedded directly: no enrichment and nothing is
/// persisted. Search availability wins over error surfacing; every internal
/// failure degrades to an empty result set.
pub struct SearchEngine {
    store: Arc<IndexStore>,
}

impl SearchEngine {
    pub fn new(store: Arc<IndexStore>) -> Self {
        Self { store }
    }

    /// Up to `limit` records ranked by descending similarity.
    pub async fn query(&self, text: &str, limit: usize) -> Vec<SearchResult> {
        match self.try_query(text, limit).await {
            Ok(results) => results,
            Err(err) => {
                log::warn!("search failed, returning no results: {err}");
                Vec::new()
            }
        }
    }

    async fn try_query(&self, text: &str, limit: usize) -> Result<Vec<SearchResult>> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let query_vector = self.store.embedder().embed_one(text).await?;
        let neighbors = self.store.nearest(&query_vector, limit).await?;

        let mut results = Vec::with_capacity(neighbors.len());
        for (id, distance) in neighbors {
            // An id the mapping does not know signals divergence between
            // graph and mapping; skip it rather than failing the query.
            let Some(record) = self.store.record(id).await else {
                log::debug!("search hit id {id} missing from the record mapping, skipping");
                continue;
            };
            results.push(SearchResult {
                id,
                content: record.content,
                source_path: record.source_path,
                metadata: record.metadata,
                chunk_index: record.chunk_index,
                total_chunks: record.total_chunks,
                similarity: 1.0 - distance,
            });
        }
        log::debug!("query returned {} results", results.len());
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use kb_vector_store::{
        ChunkRecord, EmbedError, Embedder, EmbeddingClient, IndexParams, IndexStore,
        NoopSnapshotStore, RetryPolicy,
    };
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    const DIM: usize = 4;

    /// Maps known texts onto fixed basis vectors so ranking is exact.
    struct FixedClient;

    fn fixed_vector(text: &str) -> Vec<f32> {
        let axis = match text {
            "zero" => 0,
            "one" => 1,
            "two" => 2,
            _ => 3,
        };
        let mut vector = vec![0.0; DIM];
        vector[axis] = 1.0;
        vector
    }

    #[async_trait]
    impl EmbeddingClient for FixedClient {
        fn dimension(&self) -> usize {
            DIM
        }

        async fn embed_batch(
            &self,
            texts: &[String],
        ) -> std::result::Result<Vec<Vec<f32>>, EmbedError> {
            Ok(texts.iter().map(|text| fixed_vector(text)).collect())
        }
    }

    struct DownClient;

    #[async_trait]
    impl EmbeddingClient for DownClient {
        fn dimension(&self) -> usize {
            DIM
        }

        async fn embed_batch(
            &self,
            _texts: &[String],
        ) -> std::result::Result<Vec<Vec<f32>>, EmbedError> {
            Err(EmbedError::QuotaExceeded)
        }
    }

    fn params() -> IndexParams {
        IndexParams {
            dimension: DIM,
            max_elements: 100,
            ef_construction: 50,
            m: 8,
            ef_search: 50,
        }
    }

    fn record(content: &str, index: usize) -> ChunkRecord {
        ChunkRecord {
            content: content.to_string(),
            contextual_content: content.to_string(),
            source_path: "docs/a.txt".to_string(),
            metadata: Default::default(),
            chunk_index: index,
            total_chunks: 3,
            is_contextual: false,
        }
    }

    async fn seeded_store(client: Arc<dyn EmbeddingClient>) -> Arc<IndexStore> {
        let embedder = Arc::new(Embedder::with_policy(
            client,
            RetryPolicy {
                max_attempts: 2,
                ..RetryPolicy::default()
            },
            Duration::ZERO,
        ));
        let store = Arc::new(
            IndexStore::open("kb", params(), embedder, Arc::new(NoopSnapshotStore))
                .await
                .unwrap(),
        );
        store
            .insert_batch(
                vec![fixed_vector("zero"), fixed_vector("one"), fixed_vector("two")],
                vec![record("zero", 0), record("one", 1), record("two", 2)],
            )
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn query_returns_own_record_with_unit_similarity() {
        let engine = SearchEngine::new(seeded_store(Arc::new(FixedClient)).await);
        let results = engine.query("one", 1).await;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, 1);
        assert_eq!(results[0].content, "one");
        assert!((results[0].similarity - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn results_are_ordered_by_descending_similarity() {
        let engine = SearchEngine::new(seeded_store(Arc::new(FixedClient)).await);
        let results = engine.query("two", 3).await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].id, 2);
        for pair in results.windows(2) {
            assert!(pair[0].similarity >= pair[1].similarity);
        }
    }

    #[tokio::test]
    async fn limit_is_clamped_to_store_size() {
        let engine = SearchEngine::new(seeded_store(Arc::new(FixedClient)).await);
        let results = engine.query("zero", 50).await;
        assert_eq!(results.len(), 3);
    }

    #[tokio::test]
    async fn empty_query_returns_no_results() {
        let engine = SearchEngine::new(seeded_store(Arc::new(FixedClient)).await);
        assert!(engine.query("   ", 5).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn provider_failure_degrades_to_empty() {
        // Records inserted directly, queried through an embedder whose
        // quota is permanently exhausted: the failure must not surface.
        let embedder = Arc::new(Embedder::with_policy(
            Arc::new(DownClient),
            RetryPolicy {
                max_attempts: 2,
                ..RetryPolicy::default()
            },
            Duration::ZERO,
        ));
        let store = Arc::new(
            IndexStore::open("kb", params(), embedder, Arc::new(NoopSnapshotStore))
                .await
                .unwrap(),
        );
        store
            .insert_batch(vec![fixed_vector("zero")], vec![record("zero", 0)])
            .await
            .unwrap();

        let engine = SearchEngine::new(store);
        assert!(engine.query("anything", 5).await.is_empty());
    }
}
