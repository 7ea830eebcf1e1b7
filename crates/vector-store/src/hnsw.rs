use crate::embeddings::cosine_similarity;
use crate::error::{Result, VectorStoreError};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};

/// Bumped whenever the serialized graph layout changes.
pub const GRAPH_FORMAT_VERSION: u32 = 1;

/// Hard cap on layer levels; the geometric level sampler very rarely gets
/// anywhere near this.
const MAX_LEVEL: usize = 16;

/// Construction-time graph parameters. All of these are fixed for the
/// lifetime of a graph; growing past `max_elements` requires building a new
/// graph and reinserting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphParams {
    pub dimension: usize,
    pub max_elements: usize,
    pub ef_construction: usize,
    /// Degree parameter M: per-node neighbor budget on upper layers.
    /// Layer 0 allows `2 * m`.
    pub m: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct Node {
    vector: Vec<f32>,
    /// neighbors[layer] holds the ids linked at that layer;
    /// `neighbors.len() - 1` is the node's top level.
    neighbors: Vec<Vec<usize>>,
}

/// In-memory HNSW graph over cosine distance.
///
/// Ids are dense `[0, len)` and must be appended in order; the store above
/// this keeps ids aligned with its record mapping. There is no live delete:
/// removal is done by building a replacement graph and reinserting the
/// survivors.
///
/// Mutation is `&mut self` only; the owning store serializes writers, so the
/// graph itself carries no locks.
#[derive(Debug, Serialize, Deserialize)]
pub struct HnswGraph {
    params: GraphParams,
    level_mult: f64,
    entry_point: Option<usize>,
    top_layer: usize,
    nodes: Vec<Node>,
    /// Search breadth. Not part of the persisted structure; callers apply
    /// their desired value after a load.
    #[serde(skip, default = "default_ef_search")]
    ef_search: usize,
}

fn default_ef_search() -> usize {
    100
}

/// Heap entry ordered by distance, ties broken by id for determinism.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Candidate {
    distance: f32,
    id: usize,
}

impl Eq for Candidate {}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - cosine_similarity(a, b)
}

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    version: u32,
    graph: &'a HnswGraph,
}

#[derive(Deserialize)]
struct Envelope {
    version: u32,
    graph: HnswGraph,
}

impl HnswGraph {
    pub fn new(params: GraphParams, ef_search: usize) -> Result<Self> {
        if params.dimension == 0 {
            return Err(VectorStoreError::Other(
                "graph dimension must be non-zero".to_string(),
            ));
        }
        if params.m < 2 {
            return Err(VectorStoreError::Other(format!(
                "graph degree parameter must be at least 2, got {}",
                params.m
            )));
        }
        if params.max_elements == 0 {
            return Err(VectorStoreError::Other(
                "graph capacity must be non-zero".to_string(),
            ));
        }
        Ok(Self {
            level_mult: 1.0 / (params.m as f64).ln(),
            params,
            entry_point: None,
            top_layer: 0,
            nodes: Vec::new(),
            ef_search: ef_search.max(1),
        })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.params.dimension
    }

    pub fn capacity(&self) -> usize {
        self.params.max_elements
    }

    pub fn params(&self) -> GraphParams {
        self.params
    }

    pub fn set_ef_search(&mut self, ef_search: usize) {
        self.ef_search = ef_search.max(1);
    }

    /// Append a vector under the next dense id. The id is passed explicitly
    /// so the caller's mapping and the graph cannot drift silently.
    pub fn insert(&mut self, id: usize, vector: &[f32]) -> Result<()> {
        if id != self.nodes.len() {
            return Err(VectorStoreError::Other(format!(
                "non-contiguous graph insert: id {id} with {} nodes present",
                self.nodes.len()
            )));
        }
        if self.nodes.len() >= self.params.max_elements {
            return Err(VectorStoreError::CapacityExceeded {
                requested: self.nodes.len() + 1,
                capacity: self.params.max_elements,
            });
        }
        if vector.len() != self.params.dimension {
            return Err(VectorStoreError::InvalidDimension {
                expected: self.params.dimension,
                actual: vector.len(),
            });
        }

        let level = self.random_level();
        self.nodes.push(Node {
            vector: vector.to_vec(),
            neighbors: vec![Vec::new(); level + 1],
        });

        let Some(entry) = self.entry_point else {
            self.entry_point = Some(id);
            self.top_layer = level;
            return Ok(());
        };

        let mut ep = Candidate {
            distance: cosine_distance(vector, &self.nodes[entry].vector),
            id: entry,
        };

        // Greedy descent through the layers above the new node's level.
        for layer in ((level + 1)..=self.top_layer).rev() {
            ep = self.greedy_closest(vector, ep, layer);
        }

        // Connect on every layer the new node participates in.
        let mut entries = vec![ep];
        for layer in (0..=level.min(self.top_layer)).rev() {
            let found = self.search_layer(vector, &entries, self.params.ef_construction, layer);
            let selected = self.select_neighbors(&found, self.max_connections(layer));

            self.nodes[id].neighbors[layer] = selected.clone();
            for neighbor in selected {
                self.nodes[neighbor].neighbors[layer].push(id);
                self.prune_neighbors(neighbor, layer);
            }
            entries = found;
        }

        if level > self.top_layer {
            self.top_layer = level;
            self.entry_point = Some(id);
        }
        Ok(())
    }

    /// k nearest neighbors by cosine distance, ascending. Breadth is
    /// `max(ef_search, k)`.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(usize, f32)>> {
        if query.len() != self.params.dimension {
            return Err(VectorStoreError::InvalidDimension {
                expected: self.params.dimension,
                actual: query.len(),
            });
        }
        let Some(entry) = self.entry_point else {
            return Ok(Vec::new());
        };
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut ep = Candidate {
            distance: cosine_distance(query, &self.nodes[entry].vector),
            id: entry,
        };
        for layer in (1..=self.top_layer).rev() {
            ep = self.greedy_closest(query, ep, layer);
        }

        let found = self.search_layer(query, &[ep], self.ef_search.max(k), 0);
        Ok(found
            .into_iter()
            .take(k)
            .map(|c| (c.id, c.distance))
            .collect())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(&EnvelopeRef {
            version: GRAPH_FORMAT_VERSION,
            graph: self,
        })
        .map_err(|err| VectorStoreError::GraphCodec(err.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let envelope: Envelope = bincode::deserialize(bytes)
            .map_err(|err| VectorStoreError::GraphCodec(err.to_string()))?;
        if envelope.version != GRAPH_FORMAT_VERSION {
            return Err(VectorStoreError::GraphCodec(format!(
                "unsupported graph format version {} (expected {GRAPH_FORMAT_VERSION})",
                envelope.version
            )));
        }
        let mut graph = envelope.graph;
        graph.level_mult = 1.0 / (graph.params.m as f64).ln();
        Ok(graph)
    }

    fn max_connections(&self, layer: usize) -> usize {
        if layer == 0 {
            self.params.m * 2
        } else {
            self.params.m
        }
    }

    fn random_level(&self) -> usize {
        let mut rng = rand::thread_rng();
        let uniform: f64 = rng.gen_range(0.0..1.0);
        if uniform <= f64::MIN_POSITIVE {
            return MAX_LEVEL;
        }
        ((-uniform.ln() * self.level_mult) as usize).min(MAX_LEVEL)
    }

    /// Move to the locally closest node on one layer.
    fn greedy_closest(&self, query: &[f32], mut ep: Candidate, layer: usize) -> Candidate {
        loop {
            let mut improved = false;
            let node = &self.nodes[ep.id];
            if let Some(links) = node.neighbors.get(layer) {
                for &neighbor in links {
                    let distance = cosine_distance(query, &self.nodes[neighbor].vector);
                    if distance < ep.distance {
                        ep = Candidate {
                            distance,
                            id: neighbor,
                        };
                        improved = true;
                    }
                }
            }
            if !improved {
                return ep;
            }
        }
    }

    /// Beam search within one layer. Returns up to `ef` candidates in
    /// ascending distance order.
    fn search_layer(
        &self,
        query: &[f32],
        entries: &[Candidate],
        ef: usize,
        layer: usize,
    ) -> Vec<Candidate> {
        let ef = ef.max(1);
        let mut visited: HashSet<usize> = entries.iter().map(|c| c.id).collect();
        let mut candidates: BinaryHeap<Reverse<Candidate>> =
            entries.iter().map(|&c| Reverse(c)).collect();
        let mut results: BinaryHeap<Candidate> = entries.iter().copied().collect();
        while results.len() > ef {
            results.pop();
        }

        while let Some(Reverse(current)) = candidates.pop() {
            if results.len() >= ef {
                if let Some(worst) = results.peek() {
                    if current.distance > worst.distance {
                        break;
                    }
                }
            }

            let Some(links) = self.nodes[current.id].neighbors.get(layer) else {
                continue;
            };
            for &neighbor in links {
                if !visited.insert(neighbor) {
                    continue;
                }
                let distance = cosine_distance(query, &self.nodes[neighbor].vector);
                let candidate = Candidate {
                    distance,
                    id: neighbor,
                };
                if results.len() < ef {
                    candidates.push(Reverse(candidate));
                    results.push(candidate);
                } else if let Some(&worst) = results.peek() {
                    if distance < worst.distance {
                        candidates.push(Reverse(candidate));
                        results.pop();
                        results.push(candidate);
                    }
                }
            }
        }

        results.into_sorted_vec()
    }

    /// Diversity-aware neighbor selection: a candidate is kept only while it
    /// is closer to the query than to everything already selected. The
    /// candidate distances are distances to the query, in ascending order.
    fn select_neighbors(&self, candidates: &[Candidate], m: usize) -> Vec<usize> {
        let mut selected: Vec<Candidate> = Vec::with_capacity(m);
        for &candidate in candidates {
            if selected.len() >= m {
                break;
            }
            let dominated = selected.iter().any(|kept| {
                self.distance_between(candidate.id, kept.id) < candidate.distance
            });
            if !dominated {
                selected.push(candidate);
            }
        }
        if selected.is_empty() {
            if let Some(&closest) = candidates.first() {
                selected.push(closest);
            }
        }
        selected.into_iter().map(|c| c.id).collect()
    }

    /// Re-select a node's links after a reverse edge pushed it past budget.
    fn prune_neighbors(&mut self, id: usize, layer: usize) {
        let max_conn = self.max_connections(layer);
        if self.nodes[id].neighbors[layer].len() <= max_conn {
            return;
        }
        let own_vector = self.nodes[id].vector.clone();
        let mut candidates: Vec<Candidate> = self.nodes[id].neighbors[layer]
            .iter()
            .map(|&neighbor| Candidate {
                distance: cosine_distance(&own_vector, &self.nodes[neighbor].vector),
                id: neighbor,
            })
            .collect();
        candidates.sort_unstable();
        self.nodes[id].neighbors[layer] = self.select_neighbors(&candidates, max_conn);
    }

    fn distance_between(&self, a: usize, b: usize) -> f32 {
        cosine_distance(&self.nodes[a].vector, &self.nodes[b].vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::stub_embedding;

    fn small_graph(capacity: usize) -> HnswGraph {
        HnswGraph::new(
            GraphParams {
                dimension: 3,
                max_elements: capacity,
                ef_construction: 50,
                m: 8,
            },
            50,
        )
        .unwrap()
    }

    #[test]
    fn add_and_search() {
        let mut graph = small_graph(10);
        graph.insert(0, &[1.0, 0.0, 0.0]).unwrap();
        graph.insert(1, &[0.9, 0.1, 0.0]).unwrap();
        graph.insert(2, &[0.0, 1.0, 0.0]).unwrap();
        assert_eq!(graph.len(), 3);

        let results = graph.search(&[1.0, 0.0, 0.0], 2).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, 0);
        assert!(results[0].1.abs() < 1e-6);
        assert_eq!(results[1].0, 1);
        assert!(results[1].1 < 0.1);
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let mut graph = small_graph(10);
        assert!(graph.insert(0, &[1.0, 0.0]).is_err());
        assert_eq!(graph.len(), 0);

        graph.insert(0, &[1.0, 0.0, 0.0]).unwrap();
        assert!(graph.search(&[1.0, 0.0], 1).is_err());
    }

    #[test]
    fn capacity_is_enforced() {
        let mut graph = small_graph(2);
        graph.insert(0, &[1.0, 0.0, 0.0]).unwrap();
        graph.insert(1, &[0.0, 1.0, 0.0]).unwrap();
        let err = graph.insert(2, &[0.0, 0.0, 1.0]).unwrap_err();
        assert!(matches!(
            err,
            VectorStoreError::CapacityExceeded { capacity: 2, .. }
        ));
        assert_eq!(graph.len(), 2);
    }

    #[test]
    fn non_contiguous_ids_are_rejected() {
        let mut graph = small_graph(10);
        assert!(graph.insert(3, &[1.0, 0.0, 0.0]).is_err());
    }

    #[test]
    fn self_query_returns_self_over_larger_set() {
        let params = GraphParams {
            dimension: 16,
            max_elements: 500,
            ef_construction: 100,
            m: 16,
        };
        let mut graph = HnswGraph::new(params, 100).unwrap();
        let vectors: Vec<Vec<f32>> = (0..200)
            .map(|i| stub_embedding(&format!("chunk {i}"), 16))
            .collect();
        for (id, vector) in vectors.iter().enumerate() {
            graph.insert(id, vector).unwrap();
        }

        for probe in [0usize, 17, 63, 128, 199] {
            let results = graph.search(&vectors[probe], 1).unwrap();
            assert_eq!(results[0].0, probe, "probe {probe} did not find itself");
            assert!(results[0].1.abs() < 1e-5);
        }
    }

    #[test]
    fn bytes_round_trip_preserves_answers() {
        let mut graph = small_graph(10);
        graph.insert(0, &[1.0, 0.0, 0.0]).unwrap();
        graph.insert(1, &[0.0, 1.0, 0.0]).unwrap();
        graph.insert(2, &[0.0, 0.7, 0.7]).unwrap();

        let bytes = graph.to_bytes().unwrap();
        let mut restored = HnswGraph::from_bytes(&bytes).unwrap();
        restored.set_ef_search(50);

        assert_eq!(restored.len(), 3);
        assert_eq!(restored.capacity(), 10);
        let before = graph.search(&[0.0, 1.0, 0.0], 2).unwrap();
        let after = restored.search(&[0.0, 1.0, 0.0], 2).unwrap();
        assert_eq!(before.len(), after.len());
        for (b, a) in before.iter().zip(after.iter()) {
            assert_eq!(b.0, a.0);
            assert!((b.1 - a.1).abs() < 1e-6);
        }
    }

    #[test]
    fn rejects_foreign_format_version() {
        let mut graph = small_graph(4);
        graph.insert(0, &[1.0, 0.0, 0.0]).unwrap();
        let mut bytes = graph.to_bytes().unwrap();
        bytes[0] = bytes[0].wrapping_add(1);
        assert!(HnswGraph::from_bytes(&bytes).is_err());
    }
}
