//! Prompt assembly for per-chunk context generation.

/// Documents past this length are cut before they reach the prompt
/// (roughly 30k tokens).
pub const MAX_DOCUMENT_CHARS: usize = 200_000;

/// Chunks past this length are cut for the prompt only; the stored
/// contextual text always carries the full chunk.
pub const MAX_CHUNK_CHARS: usize = 10_000;

/// Generated context shorter than this is suspicious enough to log.
pub const MIN_CONTEXT_CHARS: usize = 10;

/// Generated context longer than this gets clipped.
pub const MAX_CONTEXT_CHARS: usize = 500;

const DOCUMENT_TRUNCATION_MARKER: &str = "\n[Document truncated due to length...]";
const CHUNK_TRUNCATION_MARKER: &str = "\n[Chunk truncated due to length...]";

/// Cap `text` at `max` characters, appending `marker` when anything was cut.
fn truncate_chars(text: &str, max: usize, marker: &str) -> String {
    match text.char_indices().nth(max) {
        Some((byte_offset, _)) => {
            let mut cut = text[..byte_offset].to_string();
            cut.push_str(marker);
            cut
        }
        None => text.to_string(),
    }
}

/// Build the context-generation prompt for one chunk of a document.
pub fn build_context_prompt(full_document: &str, chunk: &str) -> String {
    let document = truncate_chars(full_document, MAX_DOCUMENT_CHARS, DOCUMENT_TRUNCATION_MARKER);
    let excerpt = truncate_chars(chunk, MAX_CHUNK_CHARS, CHUNK_TRUNCATION_MARKER);
    if chunk.chars().count() > MAX_CHUNK_CHARS {
        log::debug!(
            "chunk truncated from {} to {MAX_CHUNK_CHARS} chars for context generation",
            chunk.chars().count()
        );
    }

    format!(
        "You are working on an information retrieval system. Your task is to provide a brief \
         context (2-3 sentences) explaining how a document excerpt fits within the overall \
         document. This context will be used to improve search.\n\
         \n\
         Here is the document:\n\
         ---\n\
         {document}\n\
         ---\n\
         \n\
         Here is an excerpt from the document:\n\
         ---\n\
         {excerpt}\n\
         ---\n\
         \n\
         Based on how this excerpt relates to the broader document, provide ONLY a brief \
         context (2-3 sentences) that would help a search system understand this excerpt \
         better. Do not summarize the excerpt itself."
    )
}

/// Combine generated context with the original (untruncated) chunk into the
/// text that gets embedded. Unusual context lengths are sanity-checked here.
pub fn compose_contextual_text(context: &str, chunk: &str) -> String {
    let context = context.trim();
    let length = context.chars().count();
    if length < MIN_CONTEXT_CHARS || length > MAX_CONTEXT_CHARS {
        log::warn!("context generation produced unusual output length ({length} chars)");
    }
    let context = if length > MAX_CONTEXT_CHARS {
        let mut clipped = truncate_chars(context, MAX_CONTEXT_CHARS, "");
        clipped.push_str("...");
        clipped
    } else {
        context.to_string()
    };
    format!("{context}\n---\n{chunk}")
}
