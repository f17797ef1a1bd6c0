//! Overlapping text chunker.
//!
//! Splits extracted text into chunks of at most `chunk_size` characters,
//! preferring to cut at paragraph, line, sentence, or word boundaries, with
//! `overlap` characters carried over between neighboring chunks. Chunk
//! indices are contiguous starting at 0, and output is deterministic for a
//! fixed (text, chunk_size, overlap).

use crate::models::Chunk;

/// Boundary characters tried from coarsest to finest when a chunk would
/// otherwise cut mid-word.
const SEPARATORS: [&str; 4] = ["\n\n", "\n", ".", " "];

/// Do not shrink a chunk below this fraction of `chunk_size` just to land
/// on a nicer boundary.
const MIN_FILL_NUM: usize = 1;
const MIN_FILL_DEN: usize = 2;

pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<Chunk> {
    let chars: Vec<char> = text.chars().collect();
    let total = chars.len();
    let overlap = overlap.min(chunk_size.saturating_sub(1));

    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut index: i64 = 0;

    while start < total {
        let hard_end = (start + chunk_size).min(total);
        let end = if hard_end < total {
            find_boundary(&chars, start, hard_end, chunk_size)
        } else {
            hard_end
        };

        let piece: String = chars[start..end].iter().collect();
        let trimmed = piece.trim();
        if !trimmed.is_empty() {
            chunks.push(Chunk {
                chunk_index: index,
                text: trimmed.to_string(),
            });
            index += 1;
        }

        if end >= total {
            break;
        }

        let next = end.saturating_sub(overlap);
        // The window must always advance, even when overlap swallows the
        // whole progress of a short boundary-trimmed chunk.
        start = if next > start { next } else { end };
    }

    chunks
}

/// Pick a cut point in `(min_fill, hard_end]`, scanning backward for the
/// coarsest separator available. Falls back to the hard character limit.
fn find_boundary(chars: &[char], start: usize, hard_end: usize, chunk_size: usize) -> usize {
    let min_fill = start + (chunk_size * MIN_FILL_NUM) / MIN_FILL_DEN;

    for sep in SEPARATORS {
        let sep_chars: Vec<char> = sep.chars().collect();
        let mut pos = hard_end;
        while pos > min_fill + sep_chars.len() {
            let candidate = pos - sep_chars.len();
            if chars[candidate..pos] == sep_chars[..] {
                return pos;
            }
            pos -= 1;
        }
    }

    hard_end
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_a_single_chunk() {
        let chunks = chunk_text("Hello, world!", 700, 100);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].text, "Hello, world!");
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        assert!(chunk_text("", 700, 100).is_empty());
        assert!(chunk_text("   \n\n  ", 700, 100).is_empty());
    }

    #[test]
    fn indices_are_contiguous_from_zero() {
        let text = (0..60)
            .map(|i| format!("Sentence number {} carries a bit of filler text.", i))
            .collect::<Vec<_>>()
            .join(" ");
        let chunks = chunk_text(&text, 200, 40);
        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64);
        }
    }

    #[test]
    fn chunks_respect_the_size_budget() {
        let text = "word ".repeat(1000);
        for chunk in chunk_text(&text, 300, 50) {
            assert!(chunk.text.chars().count() <= 300);
        }
    }

    #[test]
    fn neighbors_overlap() {
        let text = "abcdefghij ".repeat(200);
        let chunks = chunk_text(&text, 100, 30);
        assert!(chunks.len() > 2);
        for pair in chunks.windows(2) {
            let tail: String = pair[0].text.chars().rev().take(10).collect();
            let tail: String = tail.chars().rev().collect();
            assert!(
                pair[1].text.contains(tail.trim()),
                "expected overlap between consecutive chunks"
            );
        }
    }

    #[test]
    fn chunking_is_deterministic() {
        let text = "Alpha beta gamma. ".repeat(150);
        let a = chunk_text(&text, 250, 60);
        let b = chunk_text(&text, 250, 60);
        assert_eq!(a, b);
    }

    #[test]
    fn three_page_document_produces_at_least_three_chunks() {
        // ~2100 characters at chunk_size 700 / overlap 100.
        let text = "The quarterly report covers revenue and expenses in detail. "
            .repeat(35);
        assert!(text.chars().count() >= 2100);
        let chunks = chunk_text(&text, 700, 100);
        assert!(chunks.len() >= 3, "got {} chunks", chunks.len());
    }

    #[test]
    fn cuts_prefer_paragraph_boundaries() {
        let para = "x".repeat(400);
        let text = format!("{}\n\n{}\n\n{}", para, para, para);
        let chunks = chunk_text(&text, 700, 0);
        assert_eq!(chunks[0].text, para);
    }

    #[test]
    fn multibyte_text_does_not_split_mid_character() {
        let text = "héllö wörld ünïcödé ".repeat(100);
        let chunks = chunk_text(&text, 120, 20);
        assert!(!chunks.is_empty());
        for c in &chunks {
            assert!(c.text.chars().count() <= 120);
        }
    }
}
