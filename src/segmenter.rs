//! Speech segmenter
//! Folds a flat stream of word-level timestamps into caption display windows
//! using pause, length, and punctuation heuristics.

use crate::types::{CaptionSegment, WordTimestamp};

/// Default word-count limit per caption segment
pub const DEFAULT_MAX_WORDS: usize = 6;

/// Default duration limit per caption segment, in seconds
pub const DEFAULT_MAX_DURATION: f64 = 3.0;

/// Gap between consecutive words treated as a natural pause
const PAUSE_GAP: f64 = 0.5;

fn ends_sentence(word: &str) -> bool {
    word.ends_with('.') || word.ends_with('!') || word.ends_with('?')
}

/// Greedily accumulate words into caption segments.
///
/// A segment closes when any of these holds: the word-count limit is
/// reached, the accumulated duration reaches `max_duration`, the gap to the
/// next word exceeds 0.5s, the current word ends a sentence, or the stream
/// ends. Word timestamps from the collaborator are repaired on the way in:
/// starts are clamped to be non-decreasing and non-positive durations get a
/// small positive extent. Single pass, deterministic.
pub fn segment_words(
    words: &[WordTimestamp],
    max_words: usize,
    max_duration: f64,
) -> Vec<CaptionSegment> {
    let max_words = max_words.max(1);
    let mut segments = Vec::new();

    let mut current: Vec<&str> = Vec::new();
    let mut segment_start = 0.0_f64;
    let mut last_end = 0.0_f64;
    let mut running_start = 0.0_f64;

    for (i, word) in words.iter().enumerate() {
        // Repair collaborator glitches: out-of-order starts, inverted spans
        let start = word.start.max(running_start);
        let end = if word.end > start { word.end } else { start + 0.05 };
        running_start = start;

        if current.is_empty() {
            segment_start = start;
        }
        current.push(word.word.trim());
        last_end = end;

        let next_gap = words
            .get(i + 1)
            .map(|next| next.start - end)
            .unwrap_or(0.0);

        let close = current.len() >= max_words
            || (last_end - segment_start) >= max_duration
            || next_gap > PAUSE_GAP
            || ends_sentence(word.word.trim())
            || i == words.len() - 1;

        if close {
            let text = current.join(" ").trim().to_string();
            if !text.is_empty() {
                segments.push(CaptionSegment {
                    text,
                    start: segment_start,
                    end: last_end,
                });
            }
            current.clear();
        }
    }

    segments
}
