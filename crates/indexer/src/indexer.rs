use crate::error::Result;
use crate::outcome::{IndexOutcome, KnowledgeBaseSummary};
use kb_enricher::ContextualEnricher;
use kb_vector_store::{ChunkRecord, Durability, IndexStore};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Embedding calls are batched so one document does not become one giant
/// provider request.
const EMBED_BATCH_SIZE: usize = 10;

/// Batch indexing pipeline for one knowledge base: enrich chunks, embed the
/// contextual texts, insert into the store, best-effort persist.
///
/// Extraction (PDF/text chunking) lives upstream; the indexer takes the
/// ordered chunk sequence a source was split into.
pub struct ChunkIndexer {
    store: Arc<IndexStore>,
    enricher: ContextualEnricher,
}

impl ChunkIndexer {
    pub fn new(store: Arc<IndexStore>, enricher: ContextualEnricher) -> Self {
        Self { store, enricher }
    }

    pub fn store(&self) -> &Arc<IndexStore> {
        &self.store
    }

    /// Index the chunks of one source document.
    ///
    /// Every internal failure is caught here and reported through the
    /// returned [`IndexOutcome`]; this method never propagates an error.
    pub async fn index_chunks(
        &self,
        source_path: &str,
        chunks: Vec<String>,
        metadata: HashMap<String, serde_json::Value>,
        max_chunks: Option<usize>,
    ) -> IndexOutcome {
        match self
            .try_index_chunks(source_path, chunks, metadata, max_chunks)
            .await
        {
            Ok((chunks, durability)) => {
                log::info!("indexed {source_path} with {chunks} chunks");
                IndexOutcome::success(source_path, chunks, durability)
            }
            Err(err) => {
                log::error!("failed to index {source_path}: {err}");
                IndexOutcome::failure(source_path, err.to_string())
            }
        }
    }

    async fn try_index_chunks(
        &self,
        source_path: &str,
        mut chunks: Vec<String>,
        mut metadata: HashMap<String, serde_json::Value>,
        max_chunks: Option<usize>,
    ) -> Result<(usize, Durability)> {
        if let Some(max) = max_chunks {
            if max > 0 && max < chunks.len() {
                log::info!("using only the first {max} of {} chunks", chunks.len());
                chunks.truncate(max);
            }
        }
        if chunks.is_empty() {
            log::debug!("source {source_path} produced no chunks");
            return Ok((0, self.store.persist().await));
        }

        stamp_metadata(&mut metadata, source_path);

        let full_document = chunks.join("\n");
        let enriched = self.enricher.enrich(&full_document, &chunks).await;
        debug_assert_eq!(enriched.len(), chunks.len());

        let contextual_texts: Vec<String> =
            enriched.iter().map(|slot| slot.text.clone()).collect();
        let mut vectors = Vec::with_capacity(contextual_texts.len());
        for batch in contextual_texts.chunks(EMBED_BATCH_SIZE) {
            vectors.extend(self.store.embedder().embed_batch(batch).await?);
        }

        let total = chunks.len();
        let records: Vec<ChunkRecord> = chunks
            .into_iter()
            .zip(enriched)
            .enumerate()
            .map(|(index, (content, slot))| ChunkRecord {
                content,
                contextual_content: slot.text,
                source_path: source_path.to_string(),
                metadata: metadata.clone(),
                chunk_index: index,
                total_chunks: total,
                is_contextual: slot.is_contextual,
            })
            .collect();

        let receipt = self.store.insert_batch(vectors, records).await?;
        Ok((total, receipt.durability))
    }

    /// Per-source chunk counts plus the total, for surfacing what the
    /// knowledge base holds.
    pub async fn summary(&self) -> KnowledgeBaseSummary {
        let documents = self.store.source_summary().await;
        let total_chunks = documents.iter().map(|doc| doc.chunks).sum();
        KnowledgeBaseSummary {
            documents,
            total_chunks,
        }
    }
}

fn stamp_metadata(metadata: &mut HashMap<String, serde_json::Value>, source_path: &str) {
    let indexed_at = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or(0.0);
    metadata.insert("indexed_at".to_string(), indexed_at.into());

    let file_name = Path::new(source_path)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| source_path.to_string());
    metadata.insert("file_name".to_string(), file_name.into());
}
