//! Overlapping window chunker with natural-boundary cut points.
//!
//! Splits a document's normalized text into [`Passage`]s of at most
//! `chunk_size` characters, where consecutive windows share `overlap`
//! characters. All sizes and offsets count Unicode scalar values.
//!
//! # Algorithm
//!
//! 1. Start a window at character `start`; the hard limit is
//!    `start + chunk_size`.
//! 2. If the hard limit reaches the end of the text, the window ends there.
//! 3. Otherwise look back over the last `boundary_tolerance` characters
//!    for a cut point, preferring in order a paragraph break (`\n\n`), a
//!    sentence end (`.`, `!` or `?` followed by whitespace, or a newline),
//!    then any whitespace. With none available, cut hard at the limit.
//! 4. The next window starts `overlap` characters before the cut.
//! 5. Windows containing only whitespace are not emitted.
//!
//! The tolerance is clamped below `chunk_size - overlap`, so every window
//! advances the start by at least one character.
//!
//! # Example
//!
//! ```rust
//! use marketmuse_core::chunk::split_text;
//!
//! let passages = split_text("doc-123", "Hello world.\n\nSecond paragraph.", 1000, 200).unwrap();
//! assert_eq!(passages.len(), 1);
//! assert_eq!(passages[0].ordinal, 0);
//! assert_eq!(passages[0].range.end, 31);
//! ```

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{OffsetRange, Passage};

pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_OVERLAP: usize = 200;

/// Validated chunking parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkConfig {
    chunk_size: usize,
    overlap: usize,
    boundary_tolerance: usize,
}

impl ChunkConfig {
    /// Rejects `chunk_size == 0` and `overlap >= chunk_size`.
    ///
    /// The boundary tolerance defaults to a fifth of the window.
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(Error::InvalidChunkConfig(
                "chunk_size must be greater than zero".to_string(),
            ));
        }
        if overlap >= chunk_size {
            return Err(Error::InvalidChunkConfig(format!(
                "overlap ({}) must be smaller than chunk_size ({})",
                overlap, chunk_size
            )));
        }
        Ok(Self {
            chunk_size,
            overlap,
            boundary_tolerance: chunk_size / 5,
        })
    }

    pub fn with_boundary_tolerance(mut self, tolerance: usize) -> Self {
        self.boundary_tolerance = tolerance;
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    fn tolerance(&self) -> usize {
        self.boundary_tolerance.min(self.chunk_size - self.overlap - 1)
    }
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_OVERLAP,
            boundary_tolerance: DEFAULT_CHUNK_SIZE / 5,
        }
    }
}

/// Validate `chunk_size`/`overlap` and split in one call.
pub fn split_text(
    document_id: &str,
    text: &str,
    chunk_size: usize,
    overlap: usize,
) -> Result<Vec<Passage>> {
    let config = ChunkConfig::new(chunk_size, overlap)?;
    Ok(split(document_id, text, &config))
}

/// Split `text` into overlapping passages.
///
/// # Guarantees
///
/// - Empty or whitespace-only text yields no passages.
/// - Every passage is at most `chunk_size` characters.
/// - Ordinals are contiguous: `0, 1, 2, …, N-1`.
/// - `passage.text` equals the characters `range.start..range.end` of `text`.
/// - Every character outside all ranges is whitespace.
pub fn split(document_id: &str, text: &str, config: &ChunkConfig) -> Vec<Passage> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let chars: Vec<char> = text.chars().collect();
    let byte_at: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let n = chars.len();
    let tolerance = config.tolerance();

    let mut passages = Vec::new();
    let mut start = 0;
    loop {
        let limit = (start + config.chunk_size).min(n);
        let end = if limit == n {
            n
        } else {
            find_cut(&chars, limit, limit - tolerance)
        };

        if chars[start..end].iter().any(|c| !c.is_whitespace()) {
            let ordinal = passages.len();
            passages.push(make_passage(
                document_id,
                ordinal,
                &text[byte_at[start]..byte_at[end]],
                OffsetRange::new(start, end),
            ));
        }

        if end == n {
            break;
        }
        start = end - config.overlap;
    }

    passages
}

/// Pick the best cut position in `lo..=limit`, where a cut at `j` ends the
/// window just before character `j`.
fn find_cut(chars: &[char], limit: usize, lo: usize) -> usize {
    let paragraph = |j: usize| chars[j - 1] == '\n' && chars[j - 2] == '\n';
    let sentence = |j: usize| {
        chars[j - 1] == '\n'
            || (chars[j - 1].is_whitespace() && matches!(chars[j - 2], '.' | '!' | '?'))
    };
    let whitespace = |j: usize| chars[j - 1].is_whitespace();

    last_matching(lo, limit, paragraph)
        .or_else(|| last_matching(lo, limit, sentence))
        .or_else(|| last_matching(lo, limit, whitespace))
        .unwrap_or(limit)
}

fn last_matching(lo: usize, limit: usize, pred: impl Fn(usize) -> bool) -> Option<usize> {
    (lo.max(2)..=limit).rev().find(|&j| pred(j))
}

/// Create a [`Passage`] with a fresh UUID and SHA-256 content hash.
fn make_passage(document_id: &str, ordinal: usize, text: &str, range: OffsetRange) -> Passage {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Passage {
        id: Uuid::new_v4().to_string(),
        document_id: document_id.to_string(),
        ordinal,
        text: text.to_string(),
        range,
        hash,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ranges(passages: &[Passage]) -> Vec<(usize, usize)> {
        passages.iter().map(|p| (p.range.start, p.range.end)).collect()
    }

    #[test]
    fn test_empty_text_yields_no_passages() {
        assert!(split_text("doc1", "", 100, 10).unwrap().is_empty());
        assert!(split_text("doc1", "  \n\n\t  ", 100, 10).unwrap().is_empty());
    }

    #[test]
    fn test_small_text_single_passage() {
        let passages = split_text("doc1", "Hello, world!", 1000, 200).unwrap();
        assert_eq!(passages.len(), 1);
        assert_eq!(passages[0].ordinal, 0);
        assert_eq!(passages[0].text, "Hello, world!");
        assert_eq!(passages[0].range, OffsetRange::new(0, 13));
        assert_eq!(passages[0].document_id, "doc1");
    }

    #[test]
    fn test_rejects_overlap_not_smaller_than_size() {
        for (size, overlap) in [(100, 100), (100, 150), (0, 0)] {
            let err = split_text("doc1", "text", size, overlap).unwrap_err();
            assert!(matches!(err, Error::InvalidChunkConfig(_)), "{size}/{overlap}");
        }
    }

    #[test]
    fn test_hard_cut_without_boundaries() {
        let text = "x".repeat(120);
        let passages = split_text("doc1", &text, 50, 10).unwrap();
        assert_eq!(ranges(&passages), vec![(0, 50), (40, 90), (80, 120)]);
        assert!(passages.iter().all(|p| p.char_len() <= 50));
    }

    #[test]
    fn test_prefers_paragraph_boundary() {
        let first = format!("{}.", "word ".repeat(8).trim_end());
        let second = "more words that keep going well past the window limit";
        let text = format!("{}\n\n{}", first, second);
        let passages = split_text("doc1", &text, 50, 10).unwrap();
        assert_eq!(passages[0].range.end, first.chars().count() + 2);
        assert_eq!(passages[0].text.trim_end(), first);
    }

    #[test]
    fn test_prefers_sentence_over_word_boundary() {
        let first = format!("{}.", "abcd ".repeat(8).trim_end());
        let text = format!("{} more words follow here without any stop at all", first);
        let passages = split_text("doc1", &text, 50, 10).unwrap();
        assert_eq!(passages[0].range.end, first.chars().count() + 1);
    }

    #[test]
    fn test_overlap_between_windows() {
        let text = (0..40)
            .map(|i| format!("Sentence number {} is here.", i))
            .collect::<Vec<_>>()
            .join(" ");
        let passages = split_text("doc1", &text, 120, 30).unwrap();
        assert!(passages.len() > 2);
        for pair in passages.windows(2) {
            assert_eq!(pair[0].range.end - pair[1].range.start, 30);
        }
    }

    #[test]
    fn test_multibyte_offsets_are_chars() {
        let text = "é".repeat(30);
        let passages = split_text("doc1", &text, 10, 2).unwrap();
        assert_eq!(ranges(&passages), vec![(0, 10), (8, 18), (16, 26), (24, 30)]);
        assert_eq!(passages[0].text, "é".repeat(10));
    }

    #[test]
    fn test_ordinals_contiguous() {
        let text = (0..50)
            .map(|i| format!("Paragraph number {}.", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let passages = split_text("doc1", &text, 60, 10).unwrap();
        for (i, p) in passages.iter().enumerate() {
            assert_eq!(p.ordinal, i, "ordinal mismatch at position {}", i);
        }
    }

    #[test]
    fn test_deterministic() {
        let text = "Alpha beta.\n\nGamma delta epsilon.\n\nZeta eta theta iota kappa.";
        let a = split_text("doc1", text, 20, 5).unwrap();
        let b = split_text("doc1", text, 20, 5).unwrap();
        assert_eq!(ranges(&a), ranges(&b));
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.text, y.text);
            assert_eq!(x.hash, y.hash);
        }
    }

    #[test]
    fn test_whitespace_tail_not_emitted() {
        let text = format!("{}{}", "a".repeat(10), " ".repeat(30));
        let passages = split_text("doc1", &text, 10, 2).unwrap();
        assert_eq!(ranges(&passages), vec![(0, 10), (8, 18)]);
    }

    proptest! {
        #[test]
        fn prop_passages_cover_text(
            text in "[a-zé .!?\n]{0,600}",
            size in 1usize..120,
            overlap_frac in 0.0f64..1.0,
        ) {
            let overlap = ((size as f64) * overlap_frac) as usize % size;
            let passages = split_text("doc", &text, size, overlap).unwrap();
            let chars: Vec<char> = text.chars().collect();
            let mut covered = vec![false; chars.len()];

            for (i, p) in passages.iter().enumerate() {
                prop_assert_eq!(p.ordinal, i);
                prop_assert!(p.char_len() <= size);
                prop_assert!(p.char_len() > 0);
                let expected: String = chars[p.range.start..p.range.end].iter().collect();
                prop_assert_eq!(&p.text, &expected);
                for c in covered.iter_mut().take(p.range.end).skip(p.range.start) {
                    *c = true;
                }
            }
            for pair in passages.windows(2) {
                prop_assert!(pair[1].range.start > pair[0].range.start);
                if pair[1].range.start < pair[0].range.end {
                    prop_assert!(pair[0].range.end - pair[1].range.start <= overlap);
                }
            }
            for (c, seen) in chars.iter().zip(covered.iter()) {
                prop_assert!(*seen || c.is_whitespace());
            }
        }
    }
}
