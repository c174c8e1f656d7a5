//! Paragraph-boundary text chunker.
//!
//! Splits document body text into [`Chunk`]s bounded by a configurable
//! `max_tokens` limit. Paragraph breaks (`\n\n`) are preferred split points;
//! harvested web pages arrive with newlines flattened to spaces, so long
//! bodies fall back to word-boundary splits.
//!
//! Each chunk gets a fresh UUID and a SHA-256 hash of its text; the hash is
//! what embedding staleness checks compare against.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::Chunk;

/// Rough chars-per-token ratio used to convert the token budget to chars.
const CHARS_PER_TOKEN: usize = 4;

/// Split text into chunks on paragraph boundaries, respecting max_tokens.
/// Returns chunks with contiguous indices starting at 0; never returns
/// an empty list.
pub fn chunk_text(document_id: &str, text: &str, max_tokens: usize) -> Vec<Chunk> {
    let max_chars = max_tokens * CHARS_PER_TOKEN;

    if text.is_empty() {
        return vec![make_chunk(document_id, 0, text)];
    }

    let mut chunks = Vec::new();
    let mut pending = String::new();
    let mut next_index: i64 = 0;

    let mut flush = |buf: &mut String, index: &mut i64, out: &mut Vec<Chunk>| {
        if !buf.is_empty() {
            out.push(make_chunk(document_id, *index, buf));
            *index += 1;
            buf.clear();
        }
    };

    for para in text.split("\n\n") {
        let para = para.trim();
        if para.is_empty() {
            continue;
        }

        // Would appending this paragraph overflow the current chunk?
        let joined_len = if pending.is_empty() {
            para.len()
        } else {
            pending.len() + 2 + para.len()
        };
        if joined_len > max_chars {
            flush(&mut pending, &mut next_index, &mut chunks);
        }

        if para.len() > max_chars {
            for piece in hard_split(para, max_chars) {
                chunks.push(make_chunk(document_id, next_index, piece.trim()));
                next_index += 1;
            }
        } else {
            if !pending.is_empty() {
                pending.push_str("\n\n");
            }
            pending.push_str(para);
        }
    }

    flush(&mut pending, &mut next_index, &mut chunks);

    // Guarantee at least one chunk (whitespace-only input)
    if chunks.is_empty() {
        chunks.push(make_chunk(document_id, 0, text.trim()));
    }

    chunks
}

/// Break an oversized paragraph into pieces of at most `max_chars`,
/// preferring newline then space boundaries, falling back to a hard cut.
fn hard_split(text: &str, max_chars: usize) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.len() <= max_chars {
            pieces.push(remaining);
            break;
        }
        // max_chars may land inside a multibyte character
        let mut end = max_chars;
        while !remaining.is_char_boundary(end) {
            end -= 1;
        }
        if end == 0 {
            end = remaining
                .char_indices()
                .nth(1)
                .map(|(i, _)| i)
                .unwrap_or(remaining.len());
        }
        let window = &remaining[..end];
        let cut = window
            .rfind('\n')
            .or_else(|| window.rfind(' '))
            .map(|pos| pos + 1)
            .unwrap_or(end);
        pieces.push(&remaining[..cut]);
        remaining = &remaining[cut..];
    }

    pieces
}

fn make_chunk(document_id: &str, index: i64, text: &str) -> Chunk {
    let digest = Sha256::digest(text.as_bytes());

    Chunk {
        id: Uuid::new_v4().to_string(),
        document_id: document_id.to_string(),
        chunk_index: index,
        text: text.to_string(),
        hash: format!("{:x}", digest),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_single_chunk() {
        let chunks = chunk_text("CLC-241", "An employer shall post the notice.", 700);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].text, "An employer shall post the notice.");
    }

    #[test]
    fn test_empty_text() {
        let chunks = chunk_text("CLC-241", "", 700);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
    }

    #[test]
    fn test_paragraphs_packed_under_limit() {
        let text = "Hours of work.\n\nOvertime pay.\n\nAnnual vacations.";
        let chunks = chunk_text("LABOUR-1", text, 700);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].text.contains("Hours of work."));
        assert!(chunks[0].text.contains("Annual vacations."));
    }

    #[test]
    fn test_paragraphs_split_over_limit() {
        // max_tokens=5 => max_chars=20
        let text = "First labour standard.\n\nSecond labour standard.\n\nThird labour standard.";
        let chunks = chunk_text("LABOUR-1", text, 5);
        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64);
        }
    }

    #[test]
    fn test_flattened_body_splits_at_word_boundaries() {
        // Harvested pages have no paragraph breaks at all
        let text = "overtime ".repeat(40);
        let chunks = chunk_text("LABOUR-2", text.trim(), 10);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.text.len() <= 40);
            assert!(!c.text.starts_with(' '));
        }
    }

    #[test]
    fn test_unbroken_run_hard_cut() {
        let text = "x".repeat(100);
        let chunks = chunk_text("LABOUR-2", &text, 5);
        assert_eq!(chunks.len(), 5);
        for c in &chunks {
            assert_eq!(c.text.len(), 20);
        }
    }

    #[test]
    fn test_multibyte_text_splits_on_char_boundaries() {
        // "congé férié " puts an accented character right at the 20-byte
        // window edge for max_tokens=5
        let text = "congé férié ".repeat(30);
        let chunks = chunk_text("CLC-193", text.trim(), 5);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.text.contains("cong") || c.text.contains("féri"));
        }
    }

    #[test]
    fn test_indices_contiguous() {
        let text = (0..50)
            .map(|i| format!("Section {} of the Act.", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = chunk_text("CLC-1", &text, 10);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64, "Index mismatch at position {}", i);
        }
    }

    #[test]
    fn test_deterministic_text_and_hash() {
        let text = "Part I\n\nPart II\n\nPart III\n\nPart IV";
        let c1 = chunk_text("CLC-1", text, 5);
        let c2 = chunk_text("CLC-1", text, 5);
        assert_eq!(c1.len(), c2.len());
        for (a, b) in c1.iter().zip(c2.iter()) {
            assert_eq!(a.text, b.text);
            assert_eq!(a.hash, b.hash);
            assert_eq!(a.chunk_index, b.chunk_index);
        }
    }
}
