//! Overlapping fixed-window text chunker.
//!
//! Splits normalized document text into [`Chunk`]s of at most `size`
//! characters, where each chunk repeats the last `overlap` characters of its
//! predecessor. Sizes are measured in `char`s, never bytes, so multi-byte
//! text cannot be cut inside a code point.
//!
//! # Algorithm
//!
//! 1. Start a window at `start` with a hard end of `start + size`.
//! 2. If the window does not reach the end of the text, pull the end back to
//!    the last whitespace inside the window, as long as the window still
//!    extends past `start + overlap`; otherwise keep the hard end.
//! 3. Emit the window and continue at `end - overlap`.
//!
//! Because the next start is always `end - overlap`, consecutive chunks share
//! exactly `overlap` characters and the text can be rebuilt losslessly.
//!
//! ```rust
//! use paper_harness::chunk::{split_text, ChunkPolicy};
//!
//! let policy = ChunkPolicy::new(10, 4).unwrap();
//! let pieces = split_text("alpha beta gamma delta", &policy);
//! assert!(pieces.iter().all(|p| p.chars().count() <= 10));
//! ```

use std::sync::Arc;

use anyhow::{bail, Result};

use crate::hashing::sha256_hex;
use crate::models::{Chunk, DocumentMetadata};

/// Validated `(size, overlap)` pair. `overlap < size` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPolicy {
    size: usize,
    overlap: usize,
}

impl ChunkPolicy {
    pub fn new(size: usize, overlap: usize) -> Result<Self> {
        if size == 0 {
            bail!("chunk size must be > 0");
        }
        if overlap >= size {
            bail!(
                "chunk overlap ({}) must be smaller than chunk size ({})",
                overlap,
                size
            );
        }
        Ok(Self { size, overlap })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }
}

/// Normalize extracted page text before chunking.
///
/// Trims every line, collapses runs of spaces and tabs, and keeps at most one
/// blank line between paragraphs.
pub fn normalize_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0;
    for line in text.lines() {
        let line = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if line.is_empty() {
            blank_run += 1;
            continue;
        }
        if !out.is_empty() {
            out.push('\n');
            if blank_run > 0 {
                out.push('\n');
            }
        }
        blank_run = 0;
        out.push_str(&line);
    }
    out
}

/// Split `text` into overlapping windows under `policy`.
///
/// Empty text yields no pieces.
pub fn split_text(text: &str, policy: &ChunkPolicy) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let total = chars.len();
    let mut pieces = Vec::new();
    let mut start = 0;

    while start < total {
        let hard_end = (start + policy.size).min(total);
        if hard_end == total {
            pieces.push(chars[start..total].iter().collect());
            break;
        }

        let min_end = start + policy.overlap + 1;
        let end = (min_end..=hard_end)
            .rev()
            .find(|&i| chars[i].is_whitespace())
            .unwrap_or(hard_end);

        pieces.push(chars[start..end].iter().collect());
        start = end - policy.overlap;
    }

    pieces
}

/// Chunk one document's normalized text.
///
/// Chunk ids are deterministic (`{document_id}-{index:05}`) so rebuilding an
/// index from the same corpus yields the same rows.
pub fn chunk_document(
    metadata: &Arc<DocumentMetadata>,
    text: &str,
    policy: &ChunkPolicy,
) -> Vec<Chunk> {
    let document_id = metadata.unique_id();
    split_text(text, policy)
        .into_iter()
        .enumerate()
        .map(|(i, piece)| Chunk {
            id: format!("{}-{:05}", document_id, i),
            source_document_id: document_id.to_string(),
            chunk_index: i as i64,
            hash: sha256_hex(piece.as_bytes()),
            text: piece,
            metadata: Arc::clone(metadata),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MetadataFields;

    fn char_slice(s: &str, from: usize, to: usize) -> String {
        s.chars().skip(from).take(to - from).collect()
    }

    fn assert_invariants(text: &str, size: usize, overlap: usize) {
        let policy = ChunkPolicy::new(size, overlap).unwrap();
        let pieces = split_text(text, &policy);

        for p in &pieces {
            assert!(p.chars().count() <= size, "piece too long: {:?}", p);
        }
        for pair in pieces.windows(2) {
            let prev_len = pair[0].chars().count();
            assert_eq!(
                char_slice(&pair[0], prev_len - overlap, prev_len),
                char_slice(&pair[1], 0, overlap),
                "overlap mismatch for size={size} overlap={overlap}"
            );
        }

        let mut rebuilt = pieces.first().cloned().unwrap_or_default();
        for p in pieces.iter().skip(1) {
            rebuilt.push_str(&char_slice(p, overlap, p.chars().count()));
        }
        assert_eq!(rebuilt, text);
    }

    #[test]
    fn test_policy_rejects_overlap_not_below_size() {
        assert!(ChunkPolicy::new(10, 10).is_err());
        assert!(ChunkPolicy::new(10, 11).is_err());
        assert!(ChunkPolicy::new(0, 0).is_err());
        assert!(ChunkPolicy::new(10, 9).is_ok());
    }

    #[test]
    fn test_short_text_single_piece() {
        let policy = ChunkPolicy::new(1000, 500).unwrap();
        assert_eq!(split_text("Hello, world!", &policy), vec!["Hello, world!"]);
    }

    #[test]
    fn test_empty_text_no_pieces() {
        let policy = ChunkPolicy::new(1000, 500).unwrap();
        assert!(split_text("", &policy).is_empty());
    }

    #[test]
    fn test_invariants_hold_across_policies() {
        let prose = (0..120)
            .map(|i| format!("Sentence number {} talks about retrieval.", i))
            .collect::<Vec<_>>()
            .join(" ");
        let unbroken = "x".repeat(537);
        let multibyte = "┌──────┐ │ Grüße │ └──────┘ ".repeat(20);

        for text in [prose.as_str(), unbroken.as_str(), multibyte.as_str()] {
            for (size, overlap) in [(1000, 500), (200, 100), (50, 0), (17, 16), (3, 1)] {
                assert_invariants(text, size, overlap);
            }
        }
    }

    #[test]
    fn test_prefers_whitespace_boundaries() {
        let policy = ChunkPolicy::new(12, 0).unwrap();
        let pieces = split_text("alpha beta gamma delta", &policy);
        assert_eq!(pieces[0], "alpha beta");
    }

    #[test]
    fn test_normalize_text() {
        let raw = "  Title   line \n\n\n\nBody\t text\n  more  \n";
        assert_eq!(normalize_text(raw), "Title line\n\nBody text\nmore");
    }

    #[test]
    fn test_chunk_document_ids_and_shared_metadata() {
        let meta = Arc::new(DocumentMetadata::new(MetadataFields {
            filename: "a.pdf".to_string(),
            ..Default::default()
        }));
        let policy = ChunkPolicy::new(20, 5).unwrap();
        let chunks = chunk_document(&meta, &"word ".repeat(30), &policy);
        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64);
            assert_eq!(c.id, format!("{}-{:05}", meta.unique_id(), i));
            assert_eq!(c.source_document_id, meta.unique_id());
            assert!(Arc::ptr_eq(&c.metadata, &meta));
        }
    }

    #[test]
    fn test_deterministic() {
        let policy = ChunkPolicy::new(30, 10).unwrap();
        let text = "Alpha beta gamma delta epsilon zeta eta theta iota kappa";
        let a = split_text(text, &policy);
        let b = split_text(text, &policy);
        assert_eq!(a, b);
    }
}
