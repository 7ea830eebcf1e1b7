use crate::embeddings::Embedder;
use crate::error::{Result, VectorStoreError};
use crate::hnsw::{GraphParams, HnswGraph};
use crate::persistence::{IndexSnapshot, SnapshotStore};
use crate::types::{ChunkRecord, SourceSummary};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Re-embedding batch size during delete rebuilds.
const REBUILD_EMBED_BATCH: usize = 10;

/// Index construction parameters. Capacity and construction-time graph
/// parameters are fixed once a graph exists; `ef_search` is applied to
/// whatever graph ends up live, including ones adopted from a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexParams {
    pub dimension: usize,
    pub max_elements: usize,
    pub ef_construction: usize,
    pub m: usize,
    pub ef_search: usize,
}

impl Default for IndexParams {
    fn default() -> Self {
        Self {
            dimension: 768,
            max_elements: 1_000_000,
            ef_construction: 400,
            m: 64,
            ef_search: 100,
        }
    }
}

impl IndexParams {
    fn graph_params(&self) -> GraphParams {
        GraphParams {
            dimension: self.dimension,
            max_elements: self.max_elements,
            ef_construction: self.ef_construction,
            m: self.m,
        }
    }
}

/// Whether a mutation made it to durable storage or only to memory.
/// In-memory state is authoritative either way; `MemoryOnly` means a process
/// restart will not see the change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Durability {
    Durable,
    MemoryOnly,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertReceipt {
    /// Dense ids assigned to the batch, in input order.
    pub ids: Range<usize>,
    pub durability: Durability,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemovalReceipt {
    pub removed: usize,
    pub remaining: usize,
    pub durability: Durability,
}

struct Inner {
    graph: HnswGraph,
    records: Vec<ChunkRecord>,
}

/// Owner of the ANN graph and the id-to-record mapping.
///
/// Ids are dense `[0, len)` and double as positions in the record mapping;
/// a delete or clear rebuilds the graph and renumbers from 0. Mutations are
/// single-writer behind the inner `RwLock`; searches share the read side and
/// are excluded only while a mutation or rebuild holds the write guard.
pub struct IndexStore {
    name: String,
    params: IndexParams,
    embedder: Arc<Embedder>,
    snapshots: Arc<dyn SnapshotStore>,
    inner: RwLock<Inner>,
}

impl IndexStore {
    /// Open the named index: adopt a valid snapshot when one exists,
    /// otherwise build fresh at the desired capacity and best-effort persist
    /// the empty index.
    pub async fn open(
        name: impl Into<String>,
        params: IndexParams,
        embedder: Arc<Embedder>,
        snapshots: Arc<dyn SnapshotStore>,
    ) -> Result<Self> {
        let name = name.into();
        if embedder.dimension() != params.dimension {
            return Err(VectorStoreError::InvalidDimension {
                expected: params.dimension,
                actual: embedder.dimension(),
            });
        }

        match snapshots.load(&name).await {
            Ok(Some(snapshot)) => match adopt_snapshot(&params, &snapshot) {
                Ok(inner) => {
                    log::info!(
                        "loaded index '{name}' from snapshot with {} records",
                        inner.records.len()
                    );
                    return Ok(Self {
                        name,
                        params,
                        embedder,
                        snapshots,
                        inner: RwLock::new(inner),
                    });
                }
                Err(reason) => {
                    log::warn!("discarding snapshot for index '{name}': {reason}");
                }
            },
            Ok(None) => log::info!("no snapshot found for index '{name}'"),
            Err(err) => log::warn!("snapshot load failed for index '{name}': {err}"),
        }

        log::info!(
            "creating new index '{name}' with capacity {}",
            params.max_elements
        );
        let graph = HnswGraph::new(params.graph_params(), params.ef_search)?;
        let store = Self {
            name,
            params,
            embedder,
            snapshots,
            inner: RwLock::new(Inner {
                graph,
                records: Vec::new(),
            }),
        };
        {
            let inner = store.inner.read().await;
            if store.persist_inner(&inner).await == Durability::MemoryOnly {
                log::warn!(
                    "index '{}' exists only in memory for this session",
                    store.name
                );
            }
        }
        Ok(store)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dimension(&self) -> usize {
        self.params.dimension
    }

    pub fn embedder(&self) -> &Arc<Embedder> {
        &self.embedder
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.records.is_empty()
    }

    /// Capacity of the live graph. This is the snapshot's capacity when one
    /// was adopted, the desired capacity otherwise.
    pub async fn capacity(&self) -> usize {
        self.inner.read().await.graph.capacity()
    }

    /// Insert embedded chunks under freshly assigned dense ids. The whole
    /// batch is validated against capacity and dimension before any
    /// mutation; graph and mapping are updated under one writer guard.
    pub async fn insert_batch(
        &self,
        vectors: Vec<Vec<f32>>,
        records: Vec<ChunkRecord>,
    ) -> Result<InsertReceipt> {
        if vectors.len() != records.len() {
            return Err(VectorStoreError::Other(format!(
                "insert batch mismatch: {} vectors for {} records",
                vectors.len(),
                records.len()
            )));
        }

        let mut inner = self.inner.write().await;
        let start = inner.records.len();
        let requested = start + vectors.len();
        let capacity = inner.graph.capacity();
        if requested > capacity {
            return Err(VectorStoreError::CapacityExceeded {
                requested,
                capacity,
            });
        }
        let dimension = inner.graph.dimension();
        for vector in &vectors {
            if vector.len() != dimension {
                return Err(VectorStoreError::InvalidDimension {
                    expected: dimension,
                    actual: vector.len(),
                });
            }
        }

        for (offset, vector) in vectors.iter().enumerate() {
            inner.graph.insert(start + offset, vector)?;
        }
        inner.records.extend(records);

        let durability = self.persist_inner(&inner).await;
        log::info!(
            "inserted {} vectors into index '{}' (total {})",
            vectors.len(),
            self.name,
            inner.records.len()
        );
        Ok(InsertReceipt {
            ids: start..requested,
            durability,
        })
    }

    /// Drop every record sourced from `source_path` and rebuild the graph
    /// from the survivors.
    ///
    /// The graph keeps no recoverable vectors, so each survivor's contextual
    /// content is re-embedded; survivors keep their relative order and are
    /// renumbered densely from 0. The replacement graph is built off to the
    /// side, so an embedding failure leaves the live store untouched.
    pub async fn remove_by_source(&self, source_path: &str) -> Result<RemovalReceipt> {
        let mut inner = self.inner.write().await;
        let before = inner.records.len();
        let survivors: Vec<ChunkRecord> = inner
            .records
            .iter()
            .filter(|record| record.source_path != source_path)
            .cloned()
            .collect();
        let removed = before - survivors.len();
        if removed == 0 {
            log::debug!(
                "no records in index '{}' are sourced from {source_path}",
                self.name
            );
            let durability = self.persist_inner(&inner).await;
            return Ok(RemovalReceipt {
                removed: 0,
                remaining: before,
                durability,
            });
        }

        log::info!(
            "removing {removed} records sourced from {source_path}; rebuilding index '{}' \
             with {} survivors",
            self.name,
            survivors.len()
        );

        let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(survivors.len());
        for batch in survivors.chunks(REBUILD_EMBED_BATCH) {
            let texts: Vec<String> = batch
                .iter()
                .map(|record| record.contextual_content.clone())
                .collect();
            vectors.extend(self.embedder.embed_batch(&texts).await?);
        }

        let mut graph = HnswGraph::new(inner.graph.params(), self.params.ef_search)?;
        for (id, vector) in vectors.iter().enumerate() {
            graph.insert(id, vector)?;
        }
        inner.graph = graph;
        inner.records = survivors;

        let durability = self.persist_inner(&inner).await;
        Ok(RemovalReceipt {
            removed,
            remaining: inner.records.len(),
            durability,
        })
    }

    /// Reset to an empty graph at the existing capacity.
    pub async fn clear(&self) -> Result<Durability> {
        let mut inner = self.inner.write().await;
        inner.graph = HnswGraph::new(inner.graph.params(), self.params.ef_search)?;
        inner.records.clear();
        log::info!("cleared index '{}'", self.name);
        Ok(self.persist_inner(&inner).await)
    }

    /// Snapshot the current graph and mapping. Best-effort: a failure is
    /// logged and reported as `MemoryOnly`, never propagated, and the
    /// in-memory state stays authoritative.
    pub async fn persist(&self) -> Durability {
        let inner = self.inner.write().await;
        self.persist_inner(&inner).await
    }

    /// k nearest neighbors of `query`, ascending by cosine distance, with
    /// k clamped to the current record count.
    pub async fn nearest(&self, query: &[f32], limit: usize) -> Result<Vec<(usize, f32)>> {
        let inner = self.inner.read().await;
        let k = limit.min(inner.records.len());
        if k == 0 {
            return Ok(Vec::new());
        }
        inner.graph.search(query, k)
    }

    pub async fn record(&self, id: usize) -> Option<ChunkRecord> {
        self.inner.read().await.records.get(id).cloned()
    }

    /// Per-source chunk counts, sorted by source path.
    pub async fn source_summary(&self) -> Vec<SourceSummary> {
        let inner = self.inner.read().await;
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for record in &inner.records {
            *counts.entry(record.source_path.as_str()).or_insert(0) += 1;
        }
        counts
            .into_iter()
            .map(|(source_path, chunks)| SourceSummary {
                source_path: source_path.to_string(),
                chunks,
            })
            .collect()
    }

    async fn persist_inner(&self, inner: &Inner) -> Durability {
        if !self.snapshots.available() {
            log::debug!(
                "snapshot store unavailable; index '{}' changes stay in memory",
                self.name
            );
            return Durability::MemoryOnly;
        }

        let index_data = match inner.graph.to_bytes() {
            Ok(bytes) => bytes,
            Err(err) => {
                log::error!("failed to serialize graph for index '{}': {err}", self.name);
                return Durability::MemoryOnly;
            }
        };
        let graph_params = inner.graph.params();
        let snapshot = IndexSnapshot {
            index_name: self.name.clone(),
            index_data,
            mapping_data: inner
                .records
                .iter()
                .enumerate()
                .map(|(id, record)| (id.to_string(), record.clone()))
                .collect(),
            max_elements: graph_params.max_elements,
            ef_construction: graph_params.ef_construction,
            m_parameter: graph_params.m,
        };

        match self.snapshots.save(&self.name, &snapshot).await {
            Ok(()) => {
                log::debug!(
                    "persisted index '{}' with {} records",
                    self.name,
                    inner.records.len()
                );
                Durability::Durable
            }
            Err(err) => {
                log::warn!(
                    "failed to persist index '{}': {err}; in-memory state remains authoritative",
                    self.name
                );
                Durability::MemoryOnly
            }
        }
    }
}

fn adopt_snapshot(
    params: &IndexParams,
    snapshot: &IndexSnapshot,
) -> std::result::Result<Inner, String> {
    let stored = snapshot.mapping_data.len();
    if stored == 0 && snapshot.max_elements < params.max_elements {
        return Err(format!(
            "snapshot is empty with a smaller saved capacity ({} < {})",
            snapshot.max_elements, params.max_elements
        ));
    }
    if stored >= snapshot.max_elements {
        return Err(format!(
            "snapshot is full ({stored} of {} slots)",
            snapshot.max_elements
        ));
    }

    let mut graph = HnswGraph::from_bytes(&snapshot.index_data)
        .map_err(|err| format!("graph bytes unreadable: {err}"))?;
    if graph.dimension() != params.dimension {
        return Err(format!(
            "snapshot dimension {} does not match desired {}",
            graph.dimension(),
            params.dimension
        ));
    }
    if graph.len() != stored {
        return Err(format!(
            "graph holds {} vectors but mapping has {stored} records",
            graph.len()
        ));
    }
    graph.set_ef_search(params.ef_search);

    let mut slots: Vec<Option<ChunkRecord>> = vec![None; stored];
    for (key, record) in &snapshot.mapping_data {
        let id: usize = key
            .parse()
            .map_err(|_| format!("non-numeric mapping id '{key}'"))?;
        if id >= stored {
            return Err(format!("mapping id {id} out of range for {stored} records"));
        }
        slots[id] = Some(record.clone());
    }
    let records: Vec<ChunkRecord> = slots
        .into_iter()
        .map(|slot| slot.ok_or_else(|| "mapping ids are not contiguous from 0".to_string()))
        .collect::<std::result::Result<_, _>>()?;

    Ok(Inner { graph, records })
}
