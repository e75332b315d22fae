// src/retrieval/context.rs
// Context assembly: a token-budgeted text view of ranked chunks

use crate::types::FusedScoredChunk;

/// Approximate chars per token (conservative estimate)
const CHARS_PER_TOKEN: usize = 4;

/// Estimate the token footprint of a text.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(CHARS_PER_TOKEN)
}

/// Render ranked chunks into a text view sized to the token budget.
///
/// Chunks are emitted in rank order until the budget runs out; a chunk that
/// would overflow is truncated if it's the first, dropped otherwise.
pub fn assemble_text_view(chunks: &[FusedScoredChunk], max_tokens: usize) -> String {
    if chunks.is_empty() {
        return String::new();
    }

    let budget_chars = max_tokens.saturating_mul(CHARS_PER_TOKEN);
    let mut view = String::new();

    for (i, item) in chunks.iter().enumerate() {
        let sources = if item.sources.is_empty() {
            "graph".to_string()
        } else {
            item.sources
                .iter()
                .map(|s| s.to_string())
                .collect::<Vec<_>>()
                .join("+")
        };
        let block = format!(
            "## {}:{}-{} (score: {:.4}, via {})\n```\n{}\n```\n\n",
            item.chunk.file_path,
            item.chunk.start_line,
            item.chunk.end_line,
            item.fused_score,
            sources,
            item.chunk.content,
        );

        if view.len() + block.len() > budget_chars {
            if i == 0 {
                // Always surface something: truncate the top hit to budget.
                let take = budget_chars.min(block.len());
                let mut end = take;
                while end > 0 && !block.is_char_boundary(end) {
                    end -= 1;
                }
                view.push_str(&block[..end]);
            }
            break;
        }
        view.push_str(&block);
    }

    view
}
