//! Boundary-aware sliding-window chunker.
//!
//! Splits document text into [`Chunk`]s of at most `chunk_size` characters
//! where each chunk starts exactly `chunk_overlap` characters before the
//! previous one ended. Chunks therefore cover the whole text with no gaps.
//!
//! # Algorithm
//!
//! 1. If the remaining text fits in one window, emit it and stop.
//! 2. Otherwise look for a cut point inside the window, trying separators
//!    from coarsest to finest: paragraph (`\n\n`), line (`\n`), sentence
//!    (`. `, `? `, `! `), word (` `). The latest occurrence of the first
//!    separator found wins; the cut lands just after it.
//! 3. A cut is only accepted if it keeps the chunk at least half full and
//!    past the overlap, so the window always advances.
//! 4. With no acceptable separator, cut hard at `chunk_size`.
//! 5. The next window starts `chunk_overlap` characters before the cut.
//!
//! Sizes are counted in Unicode scalar values, never bytes, so multi-byte
//! text is never split inside a character.

use sha2::{Digest, Sha256};

use crate::config::ChunkingConfig;
use crate::models::Chunk;

/// Cut-point separators, coarsest first.
const SEPARATORS: &[&str] = &["\n\n", "\n", ". ", "? ", "! ", " "];

/// Split `text` using the configured window.
pub fn chunk_document(text: &str, config: &ChunkingConfig) -> Vec<Chunk> {
    chunk_text(text, config.chunk_size, config.chunk_overlap)
}

/// Split `text` into overlapping chunks.
///
/// Returns an empty vector for empty or whitespace-only text. Indices are
/// contiguous from 0. The output depends only on the arguments.
pub fn chunk_text(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<Chunk> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let size = chunk_size.max(1);
    let overlap = chunk_overlap.min(size - 1);

    let chars: Vec<char> = text.chars().collect();
    let total = chars.len();

    let mut chunks = Vec::new();
    let mut start = 0usize;

    loop {
        let hard_end = (start + size).min(total);
        let end = if hard_end == total {
            total
        } else {
            let min_end = start + (overlap + 1).max(size / 2);
            find_cut(&chars, min_end, hard_end).unwrap_or(hard_end)
        };

        chunks.push(make_chunk(chunks.len(), start, end, &chars[start..end]));

        if end == total {
            break;
        }
        start = end - overlap;
    }

    chunks
}

/// Latest position in `min_end..=max_end` that sits right after a separator.
fn find_cut(chars: &[char], min_end: usize, max_end: usize) -> Option<usize> {
    if min_end > max_end {
        return None;
    }
    SEPARATORS.iter().find_map(|sep| {
        let sep: Vec<char> = sep.chars().collect();
        (min_end..=max_end)
            .rev()
            .find(|&end| end >= sep.len() && chars[end - sep.len()..end] == sep[..])
    })
}

fn make_chunk(index: usize, start: usize, end: usize, chars: &[char]) -> Chunk {
    let text: String = chars.iter().collect();

    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        index,
        start,
        end,
        text,
        hash,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn char_slice(text: &str, start: usize, end: usize) -> String {
        text.chars().skip(start).take(end - start).collect()
    }

    fn long_prose(paragraphs: usize) -> String {
        (0..paragraphs)
            .map(|p| {
                (0..12)
                    .map(|s| format!("Paragraph {} sentence {} talks about topic {}.", p, s, p * s))
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    #[test]
    fn small_text_single_chunk() {
        let chunks = chunk_text("Hello, world!", 800, 100);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].text, "Hello, world!");
        assert_eq!((chunks[0].start, chunks[0].end), (0, 13));
    }

    #[test]
    fn empty_and_blank_text_yield_no_chunks() {
        assert!(chunk_text("", 800, 100).is_empty());
        assert!(chunk_text("  \n\n\t ", 800, 100).is_empty());
    }

    #[test]
    fn chunks_respect_max_size() {
        let text = long_prose(10);
        let chunks = chunk_text(&text, 800, 100);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.char_len() <= 800, "chunk {} has {} chars", c.index, c.char_len());
            assert_eq!(c.text.chars().count(), c.char_len());
        }
    }

    #[test]
    fn adjacent_chunks_overlap_exactly() {
        let text = long_prose(10);
        let chunks = chunk_text(&text, 800, 100);
        for pair in chunks.windows(2) {
            assert_eq!(pair[1].start, pair[0].end - 100);
            let tail = char_slice(&pair[0].text, pair[0].char_len() - 100, pair[0].char_len());
            let head = char_slice(&pair[1].text, 0, 100);
            assert_eq!(tail, head);
        }
    }

    #[test]
    fn chunks_cover_text_without_gaps() {
        let text = long_prose(7);
        let chunks = chunk_text(&text, 800, 100);

        let mut rebuilt = chunks[0].text.clone();
        for c in &chunks[1..] {
            rebuilt.extend(c.text.chars().skip(100));
        }
        assert_eq!(rebuilt, text);
        assert_eq!(chunks.last().unwrap().end, text.chars().count());
        for c in &chunks {
            assert_eq!(c.text, char_slice(&text, c.start, c.end));
        }
    }

    #[test]
    fn prefers_paragraph_boundary() {
        let text = format!("{}\n\n{}", "a".repeat(500), "b".repeat(500));
        let chunks = chunk_text(&text, 800, 100);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].end, 502);
        assert!(chunks[0].text.ends_with("\n\n"));
        assert!(!chunks[0].text.contains('b'));
    }

    #[test]
    fn falls_back_to_word_boundary() {
        let text = "word ".repeat(300);
        let chunks = chunk_text(&text, 800, 100);
        for c in &chunks[..chunks.len() - 1] {
            assert!(c.text.ends_with(' '), "chunk {} cut mid-word", c.index);
        }
    }

    #[test]
    fn hard_cut_without_separators() {
        let text = "x".repeat(2000);
        let chunks = chunk_text(&text, 800, 100);
        assert_eq!(chunks[0].char_len(), 800);
        assert_eq!(chunks[1].start, 700);
        assert_eq!(chunks.len(), 3);
    }

    #[test]
    fn multibyte_text_is_split_on_characters() {
        let text = "日本語のテキスト。".repeat(200);
        let chunks = chunk_text(&text, 800, 100);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.char_len() <= 800);
        }
    }

    #[test]
    fn deterministic() {
        let text = long_prose(5);
        let a = chunk_text(&text, 800, 100);
        let b = chunk_text(&text, 800, 100);
        assert_eq!(a, b);
    }

    #[test]
    fn indices_contiguous() {
        let text = long_prose(12);
        let chunks = chunk_text(&text, 300, 50);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.index, i);
        }
    }

    #[test]
    fn config_wrapper_uses_configured_window() {
        let cfg = ChunkingConfig {
            chunk_size: 200,
            chunk_overlap: 20,
        };
        let chunks = chunk_document(&long_prose(3), &cfg);
        assert!(chunks.iter().all(|c| c.char_len() <= 200));
        assert_eq!(chunks[1].start, chunks[0].end - 20);
    }
}
