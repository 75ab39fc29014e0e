//! Sliding-window text chunker.
//!
//! Splits extracted document text into fixed-size overlapping windows:
//! window `k` starts at `k * (chunk_size - overlap)` and spans up to
//! `chunk_size` characters. Counts are in characters, not bytes, so
//! multi-byte text never splits mid-codepoint.
//!
//! Callers must keep `overlap < chunk_size`; [`crate::config::validate`]
//! enforces this at load time, and the step computation here saturates to 1
//! so a bad pair can never loop forever.

/// Split `text` into overlapping windows. Empty input yields no chunks.
///
/// Deterministic and side-effect free: identical inputs always produce the
/// identical chunk sequence.
pub fn split(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    debug_assert!(overlap < chunk_size, "overlap must be < chunk_size");

    if text.is_empty() {
        return Vec::new();
    }

    let chars: Vec<char> = text.chars().collect();
    let total = chars.len();
    let step = chunk_size.saturating_sub(overlap).max(1);

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < total {
        let end = (start + chunk_size).min(total);
        chunks.push(chars[start..end].iter().collect());
        start += step;
    }

    chunks
}
