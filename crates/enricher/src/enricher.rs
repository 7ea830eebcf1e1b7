use crate::error::Result;
use crate::prompt::{build_context_prompt, compose_contextual_text};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

const MAX_ENRICH_CONCURRENCY: usize = 64;
const DEFAULT_ENRICH_CONCURRENCY: usize = 10;

/// Capability contract for the external context-generation model.
/// Invoked once per chunk; the enricher owns all scheduling and fallback.
#[async_trait]
pub trait ContextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// One enriched slot, positionally aligned with the input chunk sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrichedChunk {
    /// Context-prefixed chunk text, or the raw chunk when enrichment failed.
    pub text: String,
    pub is_contextual: bool,
}

fn parse_enrich_concurrency(raw: Option<&str>, default_value: usize) -> usize {
    raw.map(str::trim)
        .filter(|v| !v.is_empty())
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(default_value)
        .clamp(1, MAX_ENRICH_CONCURRENCY)
}

fn enrich_concurrency_from_env() -> usize {
    let raw = std::env::var("KB_ENRICH_CONCURRENCY").ok();
    parse_enrich_concurrency(raw.as_deref(), DEFAULT_ENRICH_CONCURRENCY)
}

/// Bounded-concurrency pipeline producing a context-augmented version of
/// each chunk before embedding.
///
/// Tasks complete in arbitrary order; results are collected keyed by the
/// original chunk index, so the output is always positionally aligned with
/// the input. A failed task degrades its own slot to the raw chunk and never
/// aborts the batch. There are no retries: a failed enrichment is a
/// permanent fallback for that call.
pub struct ContextualEnricher {
    generator: Arc<dyn ContextGenerator>,
    concurrency: usize,
}

impl ContextualEnricher {
    pub fn new(generator: Arc<dyn ContextGenerator>) -> Self {
        Self::with_concurrency(generator, enrich_concurrency_from_env())
    }

    pub fn with_concurrency(generator: Arc<dyn ContextGenerator>, concurrency: usize) -> Self {
        Self {
            generator,
            concurrency: concurrency.clamp(1, MAX_ENRICH_CONCURRENCY),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Enrich every chunk of `full_document`, blocking until each task has
    /// completed or permanently fallen back.
    pub async fn enrich(&self, full_document: &str, chunks: &[String]) -> Vec<EnrichedChunk> {
        if chunks.is_empty() {
            return Vec::new();
        }

        let document: Arc<str> = Arc::from(full_document);
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks: JoinSet<(usize, EnrichedChunk)> = JoinSet::new();

        for (index, chunk) in chunks.iter().cloned().enumerate() {
            let generator = self.generator.clone();
            let document = document.clone();
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                // The semaphore is never closed while tasks run.
                let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
                let prompt = build_context_prompt(&document, &chunk);
                match generator.generate(&prompt).await {
                    Ok(context) => {
                        let text = compose_contextual_text(&context, &chunk);
                        (
                            index,
                            EnrichedChunk {
                                text,
                                is_contextual: true,
                            },
                        )
                    }
                    Err(err) => {
                        log::warn!(
                            "context generation failed for chunk {index}: {err}; \
                             falling back to the raw chunk"
                        );
                        (
                            index,
                            EnrichedChunk {
                                text: chunk,
                                is_contextual: false,
                            },
                        )
                    }
                }
            });
        }

        let mut slots: Vec<Option<EnrichedChunk>> = vec![None; chunks.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, enriched)) => slots[index] = Some(enriched),
                Err(err) => log::warn!("enrichment task aborted: {err}"),
            }
        }

        // Any slot left empty (an aborted task) degrades like a failed one.
        slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.unwrap_or_else(|| EnrichedChunk {
                    text: chunks[index].clone(),
                    is_contextual: false,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EnrichError;
    use pretty_assertions::assert_eq;
    use rand::Rng;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Echoes a context derived from the prompt after a random delay, so
    /// completion order is shuffled relative to submission order.
    struct JitteryGenerator;

    #[async_trait]
    impl ContextGenerator for JitteryGenerator {
        async fn generate(&self, prompt: &str) -> Result<String> {
            let delay = rand::thread_rng().gen_range(0..40);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            let excerpt_section = prompt.split("Here is an excerpt").nth(1).unwrap_or("");
            let marker = excerpt_section
                .lines()
                .find(|line| line.starts_with("chunk-"))
                .unwrap_or("unknown")
                .to_string();
            Ok(format!("situates {marker} in the document"))
        }
    }

    struct FlakyGenerator {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ContextGenerator for FlakyGenerator {
        async fn generate(&self, _prompt: &str) -> Result<String> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call % 2 == 0 {
                Err(EnrichError::Generation("model unavailable".to_string()))
            } else {
                Ok("a perfectly fine situating sentence".to_string())
            }
        }
    }

    struct AlwaysFailing;

    #[async_trait]
    impl ContextGenerator for AlwaysFailing {
        async fn generate(&self, _prompt: &str) -> Result<String> {
            Err(EnrichError::Generation("no model configured".to_string()))
        }
    }

    fn chunks(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("chunk-{i}")).collect()
    }

    #[tokio::test]
    async fn output_is_positionally_aligned_despite_random_completion_order() {
        let enricher = ContextualEnricher::with_concurrency(Arc::new(JitteryGenerator), 10);
        let input = chunks(25);
        let document = input.join("\n");

        let enriched = enricher.enrich(&document, &input).await;
        assert_eq!(enriched.len(), input.len());
        for (i, slot) in enriched.iter().enumerate() {
            assert!(slot.is_contextual);
            assert!(
                slot.text.contains(&format!("situates chunk-{i} ")),
                "slot {i} holds context for the wrong chunk: {}",
                slot.text
            );
            assert!(slot.text.ends_with(&format!("chunk-{i}")));
        }
    }

    #[tokio::test]
    async fn failed_tasks_fall_back_without_aborting_the_batch() {
        let enricher = ContextualEnricher::with_concurrency(
            Arc::new(FlakyGenerator {
                calls: AtomicUsize::new(0),
            }),
            2,
        );
        let input = chunks(8);
        let enriched = enricher.enrich("doc", &input).await;

        assert_eq!(enriched.len(), 8);
        let fallbacks: Vec<_> = enriched.iter().filter(|c| !c.is_contextual).collect();
        assert_eq!(fallbacks.len(), 4);
        for (i, slot) in enriched.iter().enumerate() {
            if !slot.is_contextual {
                // Failed slots carry the raw chunk untouched.
                assert_eq!(slot.text, format!("chunk-{i}"));
            }
        }
    }

    #[tokio::test]
    async fn total_failure_degrades_every_slot() {
        let enricher = ContextualEnricher::with_concurrency(Arc::new(AlwaysFailing), 4);
        let input = chunks(5);
        let enriched = enricher.enrich("doc", &input).await;

        assert_eq!(enriched.len(), 5);
        for (i, slot) in enriched.iter().enumerate() {
            assert!(!slot.is_contextual);
            assert_eq!(slot.text, format!("chunk-{i}"));
        }
    }

    #[tokio::test]
    async fn empty_input_is_a_no_op() {
        let enricher = ContextualEnricher::with_concurrency(Arc::new(AlwaysFailing), 4);
        assert!(enricher.enrich("doc", &[]).await.is_empty());
    }

    #[test]
    fn parse_enrich_concurrency_defaults_and_clamps() {
        let default_value = DEFAULT_ENRICH_CONCURRENCY;
        assert_eq!(parse_enrich_concurrency(None, default_value), default_value);
        assert_eq!(
            parse_enrich_concurrency(Some(""), default_value),
            default_value
        );
        assert_eq!(parse_enrich_concurrency(Some("4"), default_value), 4);
        assert_eq!(parse_enrich_concurrency(Some("0"), default_value), 1);
        assert_eq!(
            parse_enrich_concurrency(Some("999"), default_value),
            MAX_ENRICH_CONCURRENCY
        );
        assert_eq!(
            parse_enrich_concurrency(Some("abc"), default_value),
            default_value
        );
    }
}
