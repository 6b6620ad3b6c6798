// Chunk Builder
// Groups consecutive sentences into chunks that fit a classifier's token budget

use crate::models::{Chunk, SentenceSpan};
use crate::services::text_processor::TokenCounter;

/// Default per-chunk token budget; leaves headroom below a 512-position encoder
/// for special tokens.
pub const DEFAULT_TOKEN_BUDGET: usize = 450;

fn make_chunk(text: &str, index: usize, sentences: &[SentenceSpan], token_count: usize) -> Chunk {
    let start = sentences.first().map(|s| s.start).unwrap_or(0);
    let end = sentences.last().map(|s| s.end).unwrap_or(start);
    Chunk {
        index,
        sentences: sentences.to_vec(),
        start,
        end,
        text: text.get(start..end).unwrap_or("").to_string(),
        token_count,
    }
}

/// Greedily pack sentences into chunks of at most `token_budget` tokens.
///
/// A sentence is never split: one whose own count exceeds the budget becomes a
/// chunk by itself. Chunks partition `spans` in order.
pub fn build_chunks(
    text: &str,
    spans: &[SentenceSpan],
    token_budget: usize,
    counter: &dyn TokenCounter,
) -> Vec<Chunk> {
    let budget = token_budget.max(1);
    let mut chunks: Vec<Chunk> = Vec::new();
    let mut current: Vec<SentenceSpan> = Vec::new();
    let mut current_tokens: usize = 0;

    for span in spans {
        let sent_tokens = counter.count_tokens(span.content(text));

        // Oversized sentence becomes a standalone chunk
        if sent_tokens > budget {
            if !current.is_empty() {
                chunks.push(make_chunk(text, chunks.len(), &current, current_tokens));
                current.clear();
                current_tokens = 0;
            }
            chunks.push(make_chunk(text, chunks.len(), std::slice::from_ref(span), sent_tokens));
            continue;
        }

        if current.is_empty() || current_tokens + sent_tokens <= budget {
            current.push(*span);
            current_tokens += sent_tokens;
        } else {
            chunks.push(make_chunk(text, chunks.len(), &current, current_tokens));
            current = vec![*span];
            current_tokens = sent_tokens;
        }
    }

    if !current.is_empty() {
        chunks.push(make_chunk(text, chunks.len(), &current, current_tokens));
    }

    chunks
}
