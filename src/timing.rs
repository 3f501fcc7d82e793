//! Clip timing planner
//! Turns ranked audio peaks (or uniform spacing when no peaks exist) into a
//! sorted list of non-overlapping clip windows bounded by the source duration.

use log::warn;

use crate::types::{AudioPeak, ClipTiming};

/// Seconds of lead-in kept before an anchoring audio peak
const PEAK_LEAD_IN: f64 = 3.0;

/// Plan `count` clip windows over a source of `source_duration` seconds.
///
/// With peaks available the planner anchors windows on the most intense
/// peaks first and fills any remaining slots uniformly; without peaks it
/// spaces windows evenly. The result is always sorted by start time and
/// mutually non-overlapping, and may hold fewer than `count` windows when
/// the geometry makes more impossible.
pub fn plan_clip_windows(
    peaks: &[AudioPeak],
    count: usize,
    clip_duration: f64,
    source_duration: f64,
) -> Vec<ClipTiming> {
    if count == 0 || source_duration <= 0.0 || clip_duration <= 0.0 {
        return Vec::new();
    }

    let clip_duration = clip_duration.min(source_duration);

    let mut windows = if peaks.is_empty() {
        uniform_windows(count, clip_duration, source_duration)
    } else {
        highlight_windows(peaks, count, clip_duration, source_duration)
    };

    windows.sort_by(|a, b| a.start_time.total_cmp(&b.start_time));

    if windows.len() < count {
        warn!(
            "Planned {} clip windows out of {} requested (source too short or windows overlap)",
            windows.len(),
            count
        );
    }

    windows
}

/// Evenly spaced windows: `interval = (source - clip) / max(count-1, 1)`
fn uniform_windows(count: usize, clip_duration: f64, source_duration: f64) -> Vec<ClipTiming> {
    let interval = (source_duration - clip_duration) / (count.saturating_sub(1)).max(1) as f64;
    let mut windows = Vec::with_capacity(count);

    for i in 0..count {
        let start_time = i as f64 * interval;
        let candidate = ClipTiming {
            start_time,
            end_time: start_time + clip_duration,
            peak_intensity: None,
        };
        if candidate.end_time > source_duration + 1e-9 {
            break;
        }
        if windows.iter().any(|w: &ClipTiming| w.overlaps(&candidate)) {
            continue;
        }
        windows.push(candidate);
    }

    windows
}

/// Anchor windows on the top `count` peaks by intensity, then fill any
/// remaining slots from the uniform distribution.
fn highlight_windows(
    peaks: &[AudioPeak],
    count: usize,
    clip_duration: f64,
    source_duration: f64,
) -> Vec<ClipTiming> {
    let mut ranked: Vec<AudioPeak> = peaks.to_vec();
    ranked.sort_by(|a, b| b.intensity.total_cmp(&a.intensity));

    let mut windows: Vec<ClipTiming> = Vec::with_capacity(count);

    for peak in ranked.iter().take(count) {
        let mut start_time = (peak.time - PEAK_LEAD_IN).max(0.0);
        let mut end_time = start_time + clip_duration;

        // Shift the whole window left when it runs past the source end
        if end_time > source_duration {
            start_time = (source_duration - clip_duration).max(0.0);
            end_time = start_time + clip_duration;
        }

        let candidate = ClipTiming {
            start_time,
            end_time,
            peak_intensity: Some(peak.intensity),
        };

        if windows.iter().any(|w| w.overlaps(&candidate)) {
            continue;
        }
        windows.push(candidate);
    }

    // Uniform fill for slots the peaks could not cover
    if windows.len() < count {
        for filler in uniform_windows(count, clip_duration, source_duration) {
            if windows.len() >= count {
                break;
            }
            if windows.iter().any(|w| w.overlaps(&filler)) {
                continue;
            }
            windows.push(filler);
        }
    }

    windows
}
