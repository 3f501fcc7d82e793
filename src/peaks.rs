//! Audio-energy peak detection for highlight-driven clip selection
//! Scans a decoded mono waveform for short bursts of loudness that make
//! good cut points.

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{anyhow, Context, Result};

use crate::types::AudioPeak;

/// Energy window length in seconds (~100ms)
const WINDOW_SECS: f64 = 0.1;

/// Minimum normalized intensity for a window to count as a candidate peak
const PEAK_THRESHOLD: f64 = 0.3;

/// Selection parameters for a detection pass
#[derive(Debug, Clone)]
pub struct PeakConfig {
    /// Minimum pairwise time separation between accepted peaks, in seconds
    pub min_peak_distance: f64,
    /// Maximum number of peaks to return
    pub num_peaks: usize,
}

/// Read mono f32 samples out of an in-memory WAV payload.
/// The engine extracts clip audio as 16-bit PCM, so integer samples are
/// normalized to -1.0..1.0 here.
pub fn read_wav_samples(wav_bytes: &[u8]) -> Result<(Vec<f32>, u32)> {
    let reader = hound::WavReader::new(Cursor::new(wav_bytes))
        .context("Failed to parse extracted WAV audio")?;

    let spec = reader.spec();
    if spec.channels != 1 {
        return Err(anyhow!(
            "Expected mono audio for peak detection, got {} channels",
            spec.channels
        ));
    }

    let sample_rate = spec.sample_rate;
    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Int => reader
            .into_samples::<i16>()
            .filter_map(|s| s.ok())
            .map(|s| s as f32 / 32768.0)
            .collect(),
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .filter_map(|s| s.ok())
            .collect(),
    };

    Ok((samples, sample_rate))
}

/// Detect audio-energy peaks in a decoded mono waveform.
///
/// One pass computes RMS energy per ~100ms window, normalizes by the run
/// maximum, keeps strict local maxima above a 0.3 threshold, then greedily
/// accepts the loudest candidates that respect `min_peak_distance`. Output
/// is re-sorted by time ascending. Pure over the input buffer.
pub fn detect_peaks(
    samples: &[f32],
    sample_rate: u32,
    config: &PeakConfig,
    cancel: &AtomicBool,
) -> Result<Vec<AudioPeak>> {
    if samples.is_empty() || sample_rate == 0 || config.num_peaks == 0 {
        return Ok(Vec::new());
    }

    let window_len = ((sample_rate as f64 * WINDOW_SECS) as usize).max(1);

    // RMS energy per window, timestamped at the window center
    let mut windows: Vec<(f64, f64)> = Vec::with_capacity(samples.len() / window_len + 1);
    for (i, chunk) in samples.chunks(window_len).enumerate() {
        if cancel.load(Ordering::Relaxed) {
            return Err(anyhow!("Peak detection cancelled by user"));
        }

        let sum_sq: f64 = chunk.iter().map(|s| (*s as f64) * (*s as f64)).sum();
        let rms = (sum_sq / chunk.len() as f64).sqrt();
        let center = (i * window_len + chunk.len() / 2) as f64 / sample_rate as f64;
        windows.push((center, rms));
    }

    let max_energy = windows.iter().map(|w| w.1).fold(0.0_f64, f64::max);
    if max_energy <= 0.0 {
        // Silent input: every intensity is 0, nothing clears the threshold
        return Ok(Vec::new());
    }

    // Candidate peaks: strict local maxima above the absolute threshold
    let mut candidates: Vec<AudioPeak> = Vec::new();
    for i in 1..windows.len().saturating_sub(1) {
        let intensity = windows[i].1 / max_energy;
        if windows[i].1 > windows[i - 1].1
            && windows[i].1 > windows[i + 1].1
            && intensity > PEAK_THRESHOLD
        {
            candidates.push(AudioPeak {
                time: windows[i].0,
                intensity,
            });
        }
    }

    // Greedy selection by descending intensity with minimum separation
    candidates.sort_by(|a, b| b.intensity.total_cmp(&a.intensity));

    let mut accepted: Vec<AudioPeak> = Vec::new();
    for candidate in candidates {
        if accepted.len() >= config.num_peaks {
            break;
        }
        let far_enough = accepted
            .iter()
            .all(|p| (p.time - candidate.time).abs() > config.min_peak_distance);
        if far_enough {
            accepted.push(candidate);
        }
    }

    accepted.sort_by(|a, b| a.time.total_cmp(&b.time));
    Ok(accepted)
}
