//! Shared data types for ShortForge

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// An audio-energy peak detected in the source waveform
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AudioPeak {
    /// Time of the peak in seconds from the start of the source
    pub time: f64,
    /// Intensity normalized against the loudest window of the run (0.0-1.0)
    pub intensity: f64,
}

/// Word-level timestamp returned by the transcription service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WordTimestamp {
    pub word: String,
    /// Start time in seconds
    pub start: f64,
    /// End time in seconds
    pub end: f64,
    /// Recognition confidence (0.0-1.0)
    #[serde(default)]
    pub confidence: f64,
}

/// A caption display window, in seconds relative to the clip start
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptionSegment {
    pub text: String,
    pub start: f64,
    pub end: f64,
}

/// A planned `[start, end)` window into the source video
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipTiming {
    pub start_time: f64,
    pub end_time: f64,
    /// Intensity of the audio peak this window was anchored on, if any
    pub peak_intensity: Option<f64>,
}

impl ClipTiming {
    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }

    /// Check whether two windows share any span of time
    pub fn overlaps(&self, other: &ClipTiming) -> bool {
        self.start_time < other.end_time && other.start_time < self.end_time
    }
}

/// A finished clip produced by one successful render
#[derive(Debug, Clone)]
pub struct ProcessedClip {
    pub id: String,
    pub display_name: String,
    /// Final artifact location in the output directory
    pub path: PathBuf,
    /// Seconds into the source video
    pub start_time: f64,
    pub end_time: f64,
    /// Caption text burned into the clip, if any
    pub caption_text: Option<String>,
}

/// Pipeline stage for progress reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingStage {
    Idle,
    ReadingFile,
    Analyzing,
    GeneratingCaptions,
    ApplyingFilters,
    Encoding,
    Finalizing,
    Complete,
    Error,
    Aborted,
}

impl ProcessingStage {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProcessingStage::Complete | ProcessingStage::Error | ProcessingStage::Aborted
        )
    }
}

impl std::fmt::Display for ProcessingStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ProcessingStage::Idle => "idle",
            ProcessingStage::ReadingFile => "reading-file",
            ProcessingStage::Analyzing => "analyzing",
            ProcessingStage::GeneratingCaptions => "generating-captions",
            ProcessingStage::ApplyingFilters => "applying-filters",
            ProcessingStage::Encoding => "encoding",
            ProcessingStage::Finalizing => "finalizing",
            ProcessingStage::Complete => "complete",
            ProcessingStage::Error => "error",
            ProcessingStage::Aborted => "aborted",
        };
        write!(f, "{}", name)
    }
}

/// Snapshot of run progress. Always replaced as a whole record, never
/// partially mutated, so observers see consistent state.
#[derive(Debug, Clone)]
pub struct ProcessingProgress {
    /// 1-based index of the clip currently being worked on (0 before the loop)
    pub current_clip: usize,
    pub total_clips: usize,
    /// Per-clip completion estimate (0-100)
    pub clip_progress: u8,
    pub stage: ProcessingStage,
    pub stage_message: String,
}

impl ProcessingProgress {
    pub fn idle() -> Self {
        Self {
            current_clip: 0,
            total_clips: 0,
            clip_progress: 0,
            stage: ProcessingStage::Idle,
            stage_message: String::new(),
        }
    }
}

/// Observer callback receiving each progress snapshot
pub type ProgressCallback = Box<dyn Fn(ProcessingProgress) + Send + Sync>;
