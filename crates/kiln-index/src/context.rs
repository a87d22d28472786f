//! Budgeted evidence packing for prompt construction.

use crate::retriever::RetrievalHit;

/// Render one hit as a delimited evidence block.
#[must_use]
pub fn format_block(hit: &RetrievalHit) -> String {
    format!(
        "-----\n# Project: {}\n# File: {} [{}:{}]\n{}\n-----\n",
        hit.project, hit.file_path, hit.start_line, hit.end_line, hit.code
    )
}

/// Pack hits into at most `max_chars` characters.
///
/// Blocks are appended in the given order. Packing stops at the first block
/// that would overflow the budget; blocks are never truncated and later,
/// smaller blocks are not considered.
#[must_use]
pub fn build_context(hits: &[RetrievalHit], max_chars: usize) -> String {
    let mut out = String::new();
    let mut total = 0usize;
    for (rank, hit) in hits.iter().enumerate() {
        let block = format_block(hit);
        let len = block.chars().count();
        if total + len > max_chars {
            tracing::debug!(
                rank,
                included = rank,
                available = hits.len(),
                total,
                max_chars,
                "context budget reached"
            );
            break;
        }
        out.push_str(&block);
        total += len;
    }
    out
}
