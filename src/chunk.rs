//! Sentence-aware text chunking with overlap.
//!
//! [`chunk_text`] splits normalized text into bounded, overlapping segments.
//! In sentence-aware mode the splitter prefers to cut at sentence boundaries
//! (end punctuation followed by a capital letter or quote, or a line break)
//! rather than mid-sentence. All sizes are measured in characters, not bytes.

use regex::Regex;
use std::sync::LazyLock;

static HORIZONTAL_WS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t]+").expect("valid regex"));
static EXCESS_NEWLINES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

/// Collapse runs of horizontal whitespace and excess blank lines, keeping
/// paragraph breaks (two newlines) intact.
pub fn normalize_whitespace(text: &str) -> String {
    let text = HORIZONTAL_WS.replace_all(text, " ");
    let text = EXCESS_NEWLINES.replace_all(&text, "\n\n");
    text.trim().to_string()
}

/// Split `text` into chunks of at most `max_size` characters with `overlap`.
///
/// Empty or whitespace-only input yields an empty vec. Text that fits in a
/// single chunk is returned as-is. With `respect_sentences` the cut point
/// prefers the last sentence boundary at or past 40% of `max_size`; without
/// it a fixed-size sliding window is used. The cursor always advances by at
/// least one character, so `overlap >= max_size` cannot loop forever.
pub fn chunk_text(
    text: &str,
    max_size: usize,
    overlap: usize,
    respect_sentences: bool,
) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let normalized = normalize_whitespace(text);
    let chars: Vec<char> = normalized.chars().collect();
    let length = chars.len();

    if length <= max_size {
        return vec![normalized];
    }

    if !respect_sentences {
        return fixed_window_chunks(&chars, max_size, overlap);
    }

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < length {
        let window_end = (start + max_size).min(length);
        let mut end = window_end;

        // Not at the text end — try to cut at a sentence boundary
        if window_end < length {
            let boundaries = sentence_boundaries(&chars[start..window_end]);
            if !boundaries.is_empty() {
                let min_pos = (max_size as f64 * 0.4) as usize;
                end = match boundaries.iter().rev().find(|&&b| b >= min_pos) {
                    Some(&b) => start + b,
                    None => start + boundaries[boundaries.len() - 1],
                };
            }
        }

        let chunk: String = chars[start..end].iter().collect();
        let chunk = chunk.trim();
        if !chunk.is_empty() {
            chunks.push(chunk.to_string());
        }

        // Advance with overlap; floor of 1 guarantees forward progress
        let step = (end - start).saturating_sub(overlap).max(1);
        start += step;
    }

    chunks
}

/// Fixed-size sliding window, step `max(max_size - overlap, 1)`.
fn fixed_window_chunks(chars: &[char], max_size: usize, overlap: usize) -> Vec<String> {
    let step = max_size.saturating_sub(overlap).max(1);
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let end = (start + max_size).min(chars.len());
        let window: String = chars[start..end].iter().collect();
        if !window.trim().is_empty() {
            chunks.push(window);
        }
        start += step;
    }

    chunks
}

/// Find sentence-boundary positions within `window`.
///
/// A boundary is the index of the first character of the next sentence's
/// leading whitespace: either `.`/`!`/`?` followed by whitespace and then an
/// uppercase letter or quote, or any position directly after a newline that
/// still has non-whitespace text ahead.
fn sentence_boundaries(window: &[char]) -> Vec<usize> {
    let mut boundaries = Vec::new();
    let mut i = 1;

    while i < window.len() {
        let prev = window[i - 1];
        let after_punct = matches!(prev, '.' | '!' | '?') && window[i].is_whitespace();
        let after_newline = prev == '\n';

        if after_punct || after_newline {
            // Skip the whitespace run to find the next sentence's first char
            let mut next = i;
            while next < window.len() && window[next].is_whitespace() {
                next += 1;
            }
            if next < window.len() {
                let c = window[next];
                let accepted = if after_punct {
                    c.is_uppercase() || c == '"' || c == '\''
                } else {
                    true
                };
                if accepted {
                    boundaries.push(i);
                    i = next.max(i + 1);
                    continue;
                }
            }
        }

        i += 1;
    }

    boundaries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_yields_no_chunks() {
        assert!(chunk_text("", 100, 20, true).is_empty());
        assert!(chunk_text("   \n\n  \t ", 100, 20, true).is_empty());
    }

    #[test]
    fn short_text_is_single_chunk() {
        let chunks = chunk_text("Just one short sentence.", 100, 20, true);
        assert_eq!(chunks, vec!["Just one short sentence.".to_string()]);
    }

    #[test]
    fn normalization_collapses_whitespace() {
        assert_eq!(
            normalize_whitespace("a  b\t\tc\n\n\n\n\nd"),
            "a b c\n\nd"
        );
        assert_eq!(normalize_whitespace("  padded  "), "padded");
    }

    #[test]
    fn fixed_window_overlap_invariant() {
        let text: String = ('a'..='z').cycle().take(1000).collect();
        let max_size = 100;
        let overlap = 30;
        let step = max_size - overlap;
        let chunks = chunk_text(&text, max_size, overlap, false);

        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            let prev: Vec<char> = pair[0].chars().collect();
            let next: Vec<char> = pair[1].chars().collect();
            // Windows near the text end run short, so the shared region is
            // whatever of the previous chunk extends past the step
            let shared = prev.len() - step;
            assert!(shared > 0, "consecutive chunks must overlap");
            let tail: String = prev[step..].iter().collect();
            let head: String = next[..shared.min(next.len())].iter().collect();
            assert_eq!(tail[..head.len()], head);
        }
        // Full-size windows share exactly `overlap` characters
        assert_eq!(chunks[0].chars().count() - step, overlap);
    }

    #[test]
    fn every_chunk_respects_max_size() {
        let text = "The quick brown fox jumps over the lazy dog. ".repeat(50);
        for &respect in &[true, false] {
            for chunk in chunk_text(&text, 120, 40, respect) {
                assert!(chunk.chars().count() <= 120, "chunk too long: {chunk:?}");
            }
        }
    }

    #[test]
    fn sentence_mode_cuts_at_sentence_ends() {
        let text =
            "First sentence here with some words. Second sentence follows right after. \
             Third sentence keeps the text going for a while longer. Fourth one ends it all."
                .to_string();
        let chunks = chunk_text(&text, 80, 10, true);
        assert!(chunks.len() > 1);
        // Interior chunks should end with sentence punctuation, not mid-word
        for chunk in &chunks[..chunks.len() - 1] {
            assert!(
                chunk.ends_with('.') || chunk.ends_with('!') || chunk.ends_with('?'),
                "chunk does not end at a sentence boundary: {chunk:?}"
            );
        }
    }

    #[test]
    fn boundary_prefers_40_percent_floor() {
        // Boundary at ~17 chars (below 40% of 100) and one at ~59 (above it).
        let text = format!(
            "Alpha beta gamma. Delta epsilon zeta eta theta iota kappa. {}",
            "Lambda mu nu xi omicron pi rho sigma tau upsilon phi chi psi omega".repeat(2)
        );
        let chunks = chunk_text(&text, 100, 0, true);
        // The cut lands on the later boundary, not the early one
        assert!(chunks[0].ends_with("kappa."));
    }

    #[test]
    fn early_boundary_used_when_none_past_floor() {
        // Only boundary is at ~17 chars; the rest of the window has none.
        let text = format!(
            "Alpha beta gamma. {}",
            "Lambda mu nu xi omicron pi rho sigma tau upsilon phi chi psi omega".repeat(3)
        );
        let chunks = chunk_text(&text, 100, 0, true);
        assert_eq!(chunks[0], "Alpha beta gamma.");
    }

    #[test]
    fn falls_back_to_any_boundary_then_hard_cut() {
        // No boundaries at all: hard cut at the window edge
        let text = "x".repeat(250);
        let chunks = chunk_text(&text, 100, 0, true);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].chars().count(), 100);
    }

    #[test]
    fn newline_counts_as_boundary() {
        let line = "word ".repeat(15).trim().to_string();
        let text = format!("{line}\n{line}\n{line}");
        let chunks = chunk_text(&text, 100, 0, true);
        assert!(chunks.len() > 1);
        // Cut should land on the newline, so chunks are whole lines
        assert!(chunks[0].ends_with("word"));
    }

    #[test]
    fn overlap_larger_than_max_size_terminates() {
        let text = "abcdefghij".repeat(30);
        let chunks = chunk_text(&text, 50, 200, false);
        assert!(!chunks.is_empty());
        // Step floor of 1 means at most len(text) chunks
        assert!(chunks.len() <= 300);
    }

    #[test]
    fn sentence_mode_produces_overlap() {
        let text = "One fine day the fox ran. Then the dog slept on the porch. \
                    Later the cat watched them both. Finally the sun went down over the hill."
            .to_string();
        let chunks = chunk_text(&text, 60, 20, true);
        assert!(chunks.len() > 1);
        // Full coverage: nothing between chunk starts is lost
        let joined = chunks.join(" ");
        assert!(joined.contains("fox ran"));
        assert!(joined.contains("sun went down"));
    }

    #[test]
    fn multibyte_text_counts_chars_not_bytes() {
        let text = "héllo wörld. ".repeat(30);
        let chunks = chunk_text(&text, 50, 10, true);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 50);
        }
    }
}
