//! Overlapping recursive text chunker.
//!
//! Splits extracted document text into [`Chunk`]s of at most `chunk_size`
//! characters with a fixed `overlap` between consecutive chunks. Each window
//! ends preferentially on a semantic boundary (paragraph, then line, then
//! sentence, then word) found inside the window, falling back to a hard
//! character cut; the next window always starts exactly `overlap` characters
//! before the previous end. Dropping the first `overlap` characters of every
//! chunk after the first therefore reconstructs the input text exactly.
//!
//! Page numbers are recovered from the extractor's `--- Page N ---` markers
//! by position. Each chunk receives a UUID and a SHA-256 hash of its text
//! for staleness detection.

use anyhow::{bail, Result};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::extract::PAGE_MARKER_PREFIX;
use crate::models::Chunk;

/// Boundary patterns tried in order, largest first.
const BOUNDARIES: [&str; 4] = ["\n\n", "\n", ". ", " "];

/// Split `text` into overlapping chunks attributed to `source`.
///
/// Guarantees, for `chunk_size > overlap`:
/// - every chunk's text is at most `chunk_size` characters;
/// - consecutive chunks overlap by exactly `overlap` characters, except
///   that the final window may be shorter;
/// - chunk order follows document order with contiguous indices from 0;
/// - the output is empty only when `text` is empty.
pub fn split_text(source: &str, text: &str, chunk_size: usize, overlap: usize) -> Result<Vec<Chunk>> {
    if chunk_size == 0 {
        bail!("chunk_size must be > 0");
    }
    if overlap >= chunk_size {
        bail!(
            "overlap ({}) must be strictly less than chunk_size ({})",
            overlap,
            chunk_size
        );
    }
    if text.is_empty() {
        return Ok(Vec::new());
    }

    let chars: Vec<char> = text.chars().collect();
    let page_starts = page_marker_offsets(&chars);

    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut index: i64 = 0;

    while start < chars.len() {
        let hard_end = (start + chunk_size).min(chars.len());
        let end = if hard_end == chars.len() {
            hard_end
        } else {
            // Snap back to the best boundary inside the window, but never
            // so far that the next start would not advance.
            snap_to_boundary(&chars, start, hard_end, overlap).unwrap_or(hard_end)
        };

        let piece: String = chars[start..end].iter().collect();
        chunks.push(make_chunk(source, index, page_for(&page_starts, start), &piece));
        index += 1;

        if end == chars.len() {
            break;
        }
        start = end - overlap;
    }

    Ok(chunks)
}

/// Find the latest boundary whose cut point lies in `(start + overlap, hard_end)`,
/// trying paragraph breaks first, then lines, sentences, and words.
/// Returns the char offset to cut at (boundary text stays in the current chunk).
fn snap_to_boundary(chars: &[char], start: usize, hard_end: usize, overlap: usize) -> Option<usize> {
    let window = &chars[start..hard_end];
    // The cut must leave room for the next window to start after this one.
    let min_cut = overlap + 1;

    for boundary in BOUNDARIES {
        let bchars: Vec<char> = boundary.chars().collect();
        if window.len() < bchars.len() {
            continue;
        }
        for pos in (0..=window.len() - bchars.len()).rev() {
            if window[pos..pos + bchars.len()] == bchars[..] {
                let cut = pos + bchars.len();
                if cut > min_cut && cut < hard_end - start {
                    return Some(start + cut);
                }
            }
        }
    }
    None
}

/// Char offsets at which each page begins, derived from `--- Page N ---`
/// markers. Empty when the text carries no markers.
fn page_marker_offsets(chars: &[char]) -> Vec<(usize, i64)> {
    let text: String = chars.iter().collect();
    let mut offsets = Vec::new();
    let mut char_pos = 0usize;
    let mut byte_pos = 0usize;
    let bytes = text.as_bytes();

    for marker_byte in memchr_all(bytes, PAGE_MARKER_PREFIX.as_bytes()) {
        // Advance char_pos to the marker's byte offset.
        while byte_pos < marker_byte {
            let ch = text[byte_pos..].chars().next().unwrap();
            byte_pos += ch.len_utf8();
            char_pos += 1;
        }
        let rest = &text[marker_byte + PAGE_MARKER_PREFIX.len()..];
        let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
        if let Ok(n) = digits.parse::<i64>() {
            offsets.push((char_pos, n));
        }
    }
    offsets
}

/// Naive multi-occurrence substring search over bytes.
fn memchr_all(haystack: &[u8], needle: &[u8]) -> Vec<usize> {
    let mut out = Vec::new();
    if needle.is_empty() || haystack.len() < needle.len() {
        return out;
    }
    let mut i = 0;
    while i + needle.len() <= haystack.len() {
        if &haystack[i..i + needle.len()] == needle {
            out.push(i);
            i += needle.len();
        } else {
            i += 1;
        }
    }
    out
}

/// Page in effect at char offset `pos`: the last marker at or before it.
fn page_for(page_starts: &[(usize, i64)], pos: usize) -> Option<i64> {
    page_starts
        .iter()
        .take_while(|(start, _)| *start <= pos)
        .last()
        .map(|(_, page)| *page)
}

fn make_chunk(source: &str, index: i64, page: Option<i64>, text: &str) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: Uuid::new_v4().to_string(),
        source: source.to_string(),
        page,
        chunk_index: index,
        text: text.to_string(),
        hash,
    }
}
