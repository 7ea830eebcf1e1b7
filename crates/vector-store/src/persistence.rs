use crate::error::{Result, VectorStoreError};
use crate::types::ChunkRecord;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Durable mirror of a graph plus its id-to-record mapping.
///
/// The mapping is keyed by decimal string ids so the snapshot stays readable
/// and diffable; adopters parse the keys back to dense integers. The graph
/// itself travels as opaque bytes (base64 inside JSON).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexSnapshot {
    pub index_name: String,
    #[serde(with = "opaque_bytes")]
    pub index_data: Vec<u8>,
    pub mapping_data: BTreeMap<String, ChunkRecord>,
    pub max_elements: usize,
    pub ef_construction: usize,
    pub m_parameter: usize,
}

mod opaque_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// Capability contract for durable snapshot storage.
///
/// Availability is an explicit construction-time property: callers check
/// `available()` instead of probing the implementation type. Every
/// `IndexStore` operation stays correct in-memory when this collaborator
/// errors or reports unavailable throughout.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Whether saves have any durable backing at all.
    fn available(&self) -> bool;

    async fn load(&self, name: &str) -> Result<Option<IndexSnapshot>>;

    /// Idempotent upsert keyed by index name.
    async fn save(&self, name: &str, snapshot: &IndexSnapshot) -> Result<()>;
}

/// Snapshot store writing one JSON document per index under a directory.
pub struct FileSnapshotStore {
    dir: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn snapshot_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.index.json"))
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    fn available(&self) -> bool {
        true
    }

    async fn load(&self, name: &str) -> Result<Option<IndexSnapshot>> {
        let path = self.snapshot_path(name);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(VectorStoreError::Persistence(format!(
                    "failed to read {}: {err}",
                    path.display()
                )))
            }
        };
        let snapshot: IndexSnapshot = serde_json::from_slice(&bytes)?;
        Ok(Some(snapshot))
    }

    async fn save(&self, name: &str, snapshot: &IndexSnapshot) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.snapshot_path(name);
        let data = serde_json::to_vec(snapshot)?;

        // Atomic replace so a crashed save never leaves a torn snapshot.
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, data).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

/// Stand-in used when no durable backing was configured.
pub struct NoopSnapshotStore;

#[async_trait]
impl SnapshotStore for NoopSnapshotStore {
    fn available(&self) -> bool {
        false
    }

    async fn load(&self, _name: &str) -> Result<Option<IndexSnapshot>> {
        Ok(None)
    }

    async fn save(&self, _name: &str, _snapshot: &IndexSnapshot) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn sample_snapshot() -> IndexSnapshot {
        let mut mapping = BTreeMap::new();
        mapping.insert(
            "0".to_string(),
            ChunkRecord {
                content: "alpha".to_string(),
                contextual_content: "context\n---\nalpha".to_string(),
                source_path: "docs/a.txt".to_string(),
                metadata: Default::default(),
                chunk_index: 0,
                total_chunks: 1,
                is_contextual: true,
            },
        );
        IndexSnapshot {
            index_name: "kb".to_string(),
            index_data: vec![1, 2, 3, 250, 251],
            mapping_data: mapping,
            max_elements: 1000,
            ef_construction: 400,
            m_parameter: 64,
        }
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let tmp = TempDir::new().unwrap();
        let store = FileSnapshotStore::new(tmp.path());
        let snapshot = sample_snapshot();

        store.save("kb", &snapshot).await.unwrap();
        let loaded = store.load("kb").await.unwrap().expect("snapshot present");

        assert_eq!(loaded.index_name, snapshot.index_name);
        assert_eq!(loaded.index_data, snapshot.index_data);
        assert_eq!(loaded.mapping_data, snapshot.mapping_data);
        assert_eq!(loaded.max_elements, snapshot.max_elements);
        assert_eq!(loaded.ef_construction, snapshot.ef_construction);
        assert_eq!(loaded.m_parameter, snapshot.m_parameter);
    }

    #[tokio::test]
    async fn missing_snapshot_loads_as_none() {
        let tmp = TempDir::new().unwrap();
        let store = FileSnapshotStore::new(tmp.path());
        assert!(store.load("absent").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_is_an_upsert() {
        let tmp = TempDir::new().unwrap();
        let store = FileSnapshotStore::new(tmp.path());
        let mut snapshot = sample_snapshot();

        store.save("kb", &snapshot).await.unwrap();
        snapshot.index_data = vec![9, 9];
        store.save("kb", &snapshot).await.unwrap();

        let loaded = store.load("kb").await.unwrap().unwrap();
        assert_eq!(loaded.index_data, vec![9, 9]);
    }

    #[tokio::test]
    async fn noop_store_reports_unavailable() {
        let store = NoopSnapshotStore;
        assert!(!store.available());
        assert!(store.load("kb").await.unwrap().is_none());
        store.save("kb", &sample_snapshot()).await.unwrap();
        assert!(store.load("kb").await.unwrap().is_none());
    }

    #[test]
    fn graph_bytes_survive_json() {
        let snapshot = sample_snapshot();
        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains("\"index_data\":\"")); // base64, not an array
        let back: IndexSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back.index_data, snapshot.index_data);
    }
}
