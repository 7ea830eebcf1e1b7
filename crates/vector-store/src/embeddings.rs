use crate::error::{Result, VectorStoreError};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

/// Failure modes an embedding provider may surface.
///
/// Only `QuotaExceeded` is retried; everything else degrades to zero
/// vectors at the [`Embedder`] layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EmbedError {
    #[error("embedding quota exceeded")]
    QuotaExceeded,

    #[error("transient embedding failure: {0}")]
    Transient(String),
}

/// Capability contract for the external embedding model.
///
/// Implementations talk to whatever backend the process was wired with;
/// retry, throttling, and degradation policy all live in [`Embedder`], not
/// here.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Fixed output dimension of this backend.
    fn dimension(&self) -> usize;

    async fn embed_batch(&self, texts: &[String])
        -> std::result::Result<Vec<Vec<f32>>, EmbedError>;
}

/// Bounded exponential backoff applied to quota errors.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub multiplier: u32,
    pub min_wait: Duration,
    pub max_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            multiplier: 2,
            min_wait: Duration::from_secs(4),
            max_wait: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Wait before attempt `attempt + 1`; doubles each time, clamped to
    /// `[min_wait, max_wait]`.
    fn wait_after(&self, attempt: u32) -> Duration {
        let exp = 2u64.saturating_pow(attempt.saturating_sub(1));
        let secs = u64::from(self.multiplier).saturating_mul(exp);
        Duration::from_secs(secs).clamp(self.min_wait, self.max_wait)
    }
}

/// Minimum spacing between provider call starts. This serializes calls
/// across the process; it is a throughput ceiling, not a correctness
/// mechanism.
pub const DEFAULT_MIN_CALL_INTERVAL: Duration = Duration::from_secs(1);

/// Policy wrapper around an [`EmbeddingClient`].
///
/// Behavior on provider failure:
/// - `QuotaExceeded` is retried with bounded exponential backoff; running
///   out of attempts propagates the error.
/// - any other failure substitutes dimension-correct zero vectors and
///   returns success. Callers that need real vectors over availability must
///   not use this wrapper.
pub struct Embedder {
    client: Arc<dyn EmbeddingClient>,
    retry: RetryPolicy,
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl Embedder {
    pub fn new(client: Arc<dyn EmbeddingClient>) -> Self {
        Self::with_policy(client, RetryPolicy::default(), DEFAULT_MIN_CALL_INTERVAL)
    }

    pub fn with_policy(
        client: Arc<dyn EmbeddingClient>,
        retry: RetryPolicy,
        min_interval: Duration,
    ) -> Self {
        Self {
            client,
            retry,
            min_interval,
            last_call: Mutex::new(None),
        }
    }

    pub fn dimension(&self) -> usize {
        self.client.dimension()
    }

    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut attempt = 1u32;
        loop {
            self.throttle().await;
            match self.client.embed_batch(texts).await {
                Ok(vectors) => return Ok(self.validated(texts.len(), vectors)),
                Err(EmbedError::QuotaExceeded) => {
                    if attempt >= self.retry.max_attempts {
                        log::error!(
                            "embedding quota still exhausted after {attempt} attempts, giving up"
                        );
                        return Err(VectorStoreError::Embedding(EmbedError::QuotaExceeded));
                    }
                    let wait = self.retry.wait_after(attempt);
                    log::warn!(
                        "embedding quota exceeded (attempt {attempt}/{}), retrying in {}s",
                        self.retry.max_attempts,
                        wait.as_secs()
                    );
                    sleep(wait).await;
                    attempt += 1;
                }
                Err(EmbedError::Transient(reason)) => {
                    log::warn!(
                        "embedding provider failed ({reason}); substituting zero vectors for {} texts",
                        texts.len()
                    );
                    return Ok(self.zero_vectors(texts.len()));
                }
            }
        }
    }

    pub async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let batch = [text.to_string()];
        let mut vectors = self.embed_batch(&batch).await?;
        Ok(vectors.pop().unwrap_or_else(|| vec![0.0; self.dimension()]))
    }

    async fn throttle(&self) {
        let mut last = self.last_call.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    /// A malformed batch (wrong count or wrong dimension) is treated like a
    /// transient failure rather than poisoning the graph.
    fn validated(&self, expected: usize, vectors: Vec<Vec<f32>>) -> Vec<Vec<f32>> {
        let dimension = self.client.dimension();
        if vectors.len() != expected || vectors.iter().any(|v| v.len() != dimension) {
            log::warn!(
                "embedding provider returned a malformed batch ({} of {expected} vectors); \
                 substituting zero vectors",
                vectors.len()
            );
            return self.zero_vectors(expected);
        }
        vectors
    }

    fn zero_vectors(&self, count: usize) -> Vec<Vec<f32>> {
        vec![vec![0.0; self.client.dimension()]; count]
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Deterministic offline backend. Text hashes to a unit vector, so equal
/// texts embed identically and similarity search behaves sensibly without a
/// model. Used by tests and by deployments without provider credentials.
pub struct StubEmbeddingClient {
    dimension: usize,
}

impl StubEmbeddingClient {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

#[async_trait]
impl EmbeddingClient for StubEmbeddingClient {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_batch(
        &self,
        texts: &[String],
    ) -> std::result::Result<Vec<Vec<f32>>, EmbedError> {
        Ok(texts
            .iter()
            .map(|text| stub_embedding(text, self.dimension))
            .collect())
    }
}

/// Hash-derived unit vector for a text.
pub fn stub_embedding(text: &str, dimension: usize) -> Vec<f32> {
    let mut state = fnv1a(text.as_bytes()) ^ (dimension as u64).wrapping_mul(0x2545_F491_4F6C_DD1D);
    let mut vector = Vec::with_capacity(dimension);
    for _ in 0..dimension {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        let unit = (state >> 40) as f32 / (1u64 << 24) as f32;
        vector.push(unit * 2.0 - 1.0);
    }
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in &mut vector {
            *value /= norm;
        }
    }
    vector
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    // A zero hash would freeze the xorshift stream.
    hash | 1
}
