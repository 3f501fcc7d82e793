//! Pipeline orchestrator
//! Drives one cutting run end to end: probe the source, plan clip windows,
//! generate captions, build filter chains, render through the compositor,
//! and move finished clips into the output directory. Owns cancellation,
//! progress reporting, and the engine-crash retry path.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::Local;
use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::ai::SmartCaptionClient;
use crate::captions::CaptionInput;
use crate::compositor::{render_clip, RenderOutcome, RenderRequest, FONT_FILE};
use crate::config::{AppConfig, CaptionConfig, CaptionStyle, CutConfig};
use crate::engine::{wav_extract_args, EncodeEngine};
use crate::filters::{select_hook_text, FilterPlan};
use crate::peaks::{detect_peaks, read_wav_samples, PeakConfig};
use crate::segmenter::{segment_words, DEFAULT_MAX_DURATION, DEFAULT_MAX_WORDS};
use crate::timing::plan_clip_windows;
use crate::transcribe::TranscriptionClient;
use crate::types::{
    AudioPeak, ClipTiming, ProcessedClip, ProcessingProgress, ProcessingStage, ProgressCallback,
    WordTimestamp,
};

/// Clips shorter than this skip transcription; there is nothing usable to say
const MIN_TRANSCRIBE_SECS: f64 = 0.5;

/// Engine-relative name of the full-source analysis audio
const ANALYSIS_WAV: &str = "analysis.wav";

enum RunEnd {
    Complete,
    Aborted,
}

fn is_cancelled(e: &anyhow::Error) -> bool {
    e.to_string().contains("cancelled")
}

fn is_engine_crash(e: &anyhow::Error) -> bool {
    e.to_string().contains("Engine crashed")
}

/// One video-cutting run over a single source file
pub struct Pipeline<E: EncodeEngine> {
    engine: E,
    app_config: AppConfig,
    progress: ProgressCallback,
    cancel: Arc<AtomicBool>,
    clips: Vec<ProcessedClip>,
}

impl<E: EncodeEngine> Pipeline<E> {
    pub fn new(engine: E, app_config: AppConfig, progress: ProgressCallback) -> Self {
        Self {
            engine,
            app_config,
            progress,
            cancel: Arc::new(AtomicBool::new(false)),
            clips: Vec::new(),
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn clips(&self) -> &[ProcessedClip] {
        &self.clips
    }

    /// Shared flag observers can use to abort from another task
    pub fn cancel_token(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Request a cooperative stop. The run finishes or abandons the current
    /// clip and then stops; completed clips are kept.
    pub fn abort(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Drop run results and return to idle. Removes the finished clip files
    /// and clears a pending abort.
    pub fn reset(&mut self) {
        for clip in &self.clips {
            if clip.path.exists() {
                if let Err(e) = std::fs::remove_file(&clip.path) {
                    warn!("Failed to remove {:?}: {}", clip.path, e);
                }
            }
        }
        self.clips.clear();
        self.cancel.store(false, Ordering::SeqCst);
        (self.progress)(ProcessingProgress::idle());
    }

    fn report(
        &self,
        current_clip: usize,
        total_clips: usize,
        clip_progress: u8,
        stage: ProcessingStage,
        message: impl Into<String>,
    ) {
        (self.progress)(ProcessingProgress {
            current_clip,
            total_clips,
            clip_progress,
            stage,
            stage_message: message.into(),
        });
    }

    /// Run the full pipeline over one source video. Returns the finished
    /// clips; an aborted run returns the clips completed before the abort.
    pub async fn process_video(
        &mut self,
        source: &Path,
        cut: &CutConfig,
        captions: &CaptionConfig,
        use_highlights: bool,
    ) -> Result<Vec<ProcessedClip>> {
        let result = self.run(source, cut, captions, use_highlights).await;
        if !self.app_config.keep_workdir {
            let _ = self.engine.delete(FONT_FILE);
        }

        match result {
            Ok(RunEnd::Complete) => {
                let total = self.clips.len();
                self.report(
                    total,
                    total,
                    100,
                    ProcessingStage::Complete,
                    format!("Rendered {} clip(s)", total),
                );
                Ok(self.clips.clone())
            }
            Ok(RunEnd::Aborted) => {
                let total = self.clips.len();
                self.report(
                    total,
                    total,
                    0,
                    ProcessingStage::Aborted,
                    format!("Aborted with {} clip(s) completed", total),
                );
                Ok(self.clips.clone())
            }
            Err(e) => {
                error!("Run failed: {:#}", e);
                self.report(0, 0, 0, ProcessingStage::Error, e.to_string());
                Err(e)
            }
        }
    }

    async fn run(
        &mut self,
        source: &Path,
        cut: &CutConfig,
        captions: &CaptionConfig,
        use_highlights: bool,
    ) -> Result<RunEnd> {
        cut.validate()?;
        self.clips.clear();
        self.app_config.ensure_output_dir()?;

        self.report(0, 0, 0, ProcessingStage::ReadingFile, "Probing source video");
        self.engine.load().await?;
        let media = self.engine.probe(source).await?;
        info!(
            "Source {:?}: {}x{}, {:.1}s",
            source, media.width, media.height, media.duration
        );

        self.report(
            0,
            0,
            0,
            ProcessingStage::Analyzing,
            if use_highlights {
                "Scanning audio for highlights"
            } else {
                "Planning clip windows"
            },
        );
        let peaks = if use_highlights {
            match self.scan_highlights(source, media.duration, cut).await {
                Ok(peaks) => peaks,
                Err(e) if is_cancelled(&e) => return Ok(RunEnd::Aborted),
                Err(e) => {
                    warn!(
                        "Highlight scan failed ({}), falling back to uniform spacing",
                        e
                    );
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        let windows = plan_clip_windows(&peaks, cut.clip_count, cut.clip_duration, media.duration);
        if windows.is_empty() {
            return Err(anyhow!(
                "No viable clip windows in a {:.1}s source",
                media.duration
            ));
        }
        let total = windows.len();

        let run_id = Local::now().format("%Y%m%d_%H%M%S").to_string();
        let mut rng = StdRng::from_entropy();
        let transcriber = TranscriptionClient::new(
            self.app_config.transcription_endpoint.clone(),
            self.app_config.transcription_api_key.clone(),
        );
        let smart = SmartCaptionClient::new(self.app_config.caption_ai_endpoint.clone());

        for (index, timing) in windows.iter().enumerate() {
            if self.cancel.load(Ordering::Relaxed) {
                info!("Run aborted before clip {}", index + 1);
                return Ok(RunEnd::Aborted);
            }
            let current = index + 1;

            let caption_input = if cut.captions_enabled {
                self.report(
                    current,
                    total,
                    20,
                    ProcessingStage::GeneratingCaptions,
                    format!("Generating captions for clip {}/{}", current, total),
                );
                match self
                    .build_captions(source, *timing, index, cut, captions, &transcriber, &smart)
                    .await
                {
                    Ok(input) => input,
                    Err(e) if is_cancelled(&e) => return Ok(RunEnd::Aborted),
                    Err(e) => {
                        warn!(
                            "Caption generation failed for clip {} ({}), continuing without",
                            current, e
                        );
                        None
                    }
                }
            } else {
                None
            };

            self.report(
                current,
                total,
                40,
                ProcessingStage::ApplyingFilters,
                "Building filter chain",
            );
            let plan = FilterPlan::build(cut, media.width, media.height, timing.duration(), &mut rng);

            self.report(
                current,
                total,
                50,
                ProcessingStage::Encoding,
                format!("Encoding clip {}/{}", current, total),
            );
            let request = RenderRequest {
                source,
                timing: *timing,
                plan: &plan,
                captions: caption_input.clone(),
                captions_required: cut.captions_enabled && captions.required,
                clip_index: index,
            };

            let outcome =
                match render_clip(&self.engine, &request, &self.app_config, &self.cancel).await {
                    Ok(outcome) => outcome,
                    Err(e) if is_cancelled(&e) => return Ok(RunEnd::Aborted),
                    Err(e) if is_engine_crash(&e) => {
                        warn!(
                            "Engine crash on clip {} ({}), reloading and retrying once",
                            current, e
                        );
                        self.engine.reload().await?;
                        match render_clip(&self.engine, &request, &self.app_config, &self.cancel)
                            .await
                        {
                            Ok(outcome) => outcome,
                            Err(e) if is_cancelled(&e) => return Ok(RunEnd::Aborted),
                            Err(e) => {
                                return Err(e.context(format!(
                                    "Clip {} failed after engine reload",
                                    current
                                )))
                            }
                        }
                    }
                    Err(e) => return Err(e),
                };

            self.report(
                current,
                total,
                90,
                ProcessingStage::Finalizing,
                format!("Writing clip {}/{}", current, total),
            );
            let clip =
                self.finalize_clip(&run_id, index, *timing, &outcome, caption_input.as_ref())?;
            info!(
                "Clip {}/{} rendered via {}: {:?}",
                current, total, outcome.strategy, clip.path
            );
            self.clips.push(clip);
        }

        Ok(RunEnd::Complete)
    }

    /// Extract the full source audio and detect energy peaks for the planner
    async fn scan_highlights(
        &self,
        source: &Path,
        source_duration: f64,
        cut: &CutConfig,
    ) -> Result<Vec<AudioPeak>> {
        let args = wav_extract_args(source, 0.0, source_duration, ANALYSIS_WAV);
        let exit = self.engine.run(&args, &self.cancel).await?;
        if !exit.success() {
            return Err(anyhow!("Audio extraction for highlight analysis failed"));
        }

        let bytes = self.engine.read(ANALYSIS_WAV)?;
        let _ = self.engine.delete(ANALYSIS_WAV);

        let (samples, sample_rate) = read_wav_samples(&bytes)?;
        let config = PeakConfig {
            // Windows anchored on two peaks closer than one clip length
            // would overlap, so the detector enforces that spacing
            min_peak_distance: cut.clip_duration,
            num_peaks: cut.clip_count,
        };
        let peaks = detect_peaks(&samples, sample_rate, &config, &self.cancel)?;
        info!("Detected {} audio peak(s)", peaks.len());
        Ok(peaks)
    }

    /// Assemble the caption content for one clip: speech-derived segments
    /// when the style asks for them, plus the hook line for the style
    #[allow(clippy::too_many_arguments)]
    async fn build_captions(
        &self,
        source: &Path,
        timing: ClipTiming,
        index: usize,
        cut: &CutConfig,
        captions: &CaptionConfig,
        transcriber: &TranscriptionClient,
        smart: &SmartCaptionClient,
    ) -> Result<Option<CaptionInput>> {
        let wants_speech = matches!(
            cut.caption_style,
            CaptionStyle::Transcript | CaptionStyle::Smart
        );

        let mut words: Vec<WordTimestamp> = Vec::new();
        let mut transcript = String::new();

        if wants_speech {
            if timing.duration() < MIN_TRANSCRIBE_SECS {
                debug!("Clip {} too short to transcribe, skipping", index + 1);
            } else if !transcriber.is_configured() {
                warn!("Speech captions requested but no transcription endpoint is configured");
            } else {
                let wav_name = format!("audio_{:03}.wav", index);
                let args =
                    wav_extract_args(source, timing.start_time, timing.duration(), &wav_name);
                let exit = self.engine.run(&args, &self.cancel).await?;
                if exit.success() {
                    let bytes = self.engine.read(&wav_name)?;
                    let _ = self.engine.delete(&wav_name);
                    match transcriber
                        .transcribe_window(&bytes, &captions.language)
                        .await
                    {
                        Ok(response) => {
                            words = response.words;
                            transcript = response.transcription;
                        }
                        Err(e) => warn!("Transcription failed for clip {}: {}", index + 1, e),
                    }
                } else {
                    warn!("Audio extraction failed for clip {}", index + 1);
                }
            }
        }

        let segments = segment_words(&words, DEFAULT_MAX_WORDS, DEFAULT_MAX_DURATION);

        let hook_text = match cut.caption_style {
            CaptionStyle::Smart => {
                smart
                    .rehook_or_fallback(
                        &transcript,
                        &words,
                        timing.start_time,
                        timing.end_time,
                        &captions.language,
                    )
                    .await
            }
            style => select_hook_text(style, index, &cut.custom_text),
        };

        if segments.is_empty() && hook_text.is_none() {
            return Ok(None);
        }

        Ok(Some(CaptionInput {
            duration: timing.duration(),
            position: captions.position,
            primary_color: captions.primary_color.clone(),
            highlight_color: captions.highlight_color.clone(),
            hook_text,
            segments,
        }))
    }

    /// Move a rendered clip out of the engine working directory into the
    /// output directory and record it
    fn finalize_clip(
        &self,
        run_id: &str,
        index: usize,
        timing: ClipTiming,
        outcome: &RenderOutcome,
        captions: Option<&CaptionInput>,
    ) -> Result<ProcessedClip> {
        let bytes = self.engine.read(&outcome.output_name)?;
        let display_name = format!("short_{}_{:02}.mp4", run_id, index + 1);
        let path = Path::new(&self.app_config.default_output_dir).join(&display_name);
        std::fs::write(&path, &bytes)
            .with_context(|| format!("Failed to write clip to {:?}", path))?;
        let _ = self.engine.delete(&outcome.output_name);

        let caption_text = if outcome.had_any_captions {
            captions.and_then(|c| {
                c.hook_text
                    .clone()
                    .or_else(|| c.segments.first().map(|s| s.text.clone()))
            })
        } else {
            None
        };

        Ok(ProcessedClip {
            id: format!("{}-{:02}", run_id, index + 1),
            display_name,
            path,
            start_time: timing.start_time,
            end_time: timing.end_time,
            caption_text,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::mock::MockEngine;
    use std::sync::Mutex;

    fn temp_output_dir(tag: &str) -> String {
        let dir = std::env::temp_dir().join(format!("shortforge-pipeline-{}", tag));
        let _ = std::fs::remove_dir_all(&dir);
        dir.to_string_lossy().to_string()
    }

    fn app(tag: &str) -> AppConfig {
        AppConfig {
            default_output_dir: temp_output_dir(tag),
            ..AppConfig::default()
        }
    }

    fn app_with_font(tag: &str) -> AppConfig {
        let font = std::env::temp_dir().join("shortforge-pipeline-font.ttf");
        std::fs::write(&font, b"stub-font-bytes").unwrap();
        AppConfig {
            font_path: Some(font.to_string_lossy().to_string()),
            ..app(tag)
        }
    }

    fn silent_progress() -> ProgressCallback {
        Box::new(|_| {})
    }

    fn stage_recorder() -> (ProgressCallback, Arc<Mutex<Vec<ProcessingStage>>>) {
        let stages = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&stages);
        let callback: ProgressCallback =
            Box::new(move |p: ProcessingProgress| sink.lock().unwrap().push(p.stage));
        (callback, stages)
    }

    #[tokio::test]
    async fn test_uniform_run_produces_all_clips() {
        let (progress, stages) = stage_recorder();
        let mut pipeline = Pipeline::new(MockEngine::new(), app("uniform"), progress);
        let cut = CutConfig::default();

        let clips = pipeline
            .process_video(
                Path::new("/tmp/source.mp4"),
                &cut,
                &CaptionConfig::default(),
                false,
            )
            .await
            .unwrap();

        assert_eq!(clips.len(), 3);
        // One encode per clip, no analysis or caption extraction
        assert_eq!(pipeline.engine().call_count(), 3);
        for clip in &clips {
            assert!(clip.path.exists());
            assert!(clip.caption_text.is_none());
        }
        // Uniform spacing over a 120s source
        assert_eq!(clips[0].start_time, 0.0);
        assert_eq!(clips[1].start_time, 45.0);
        assert_eq!(clips[2].start_time, 90.0);

        let recorded = stages.lock().unwrap();
        assert_eq!(recorded.last(), Some(&ProcessingStage::Complete));
        assert!(recorded.contains(&ProcessingStage::Encoding));
        assert!(recorded.contains(&ProcessingStage::Finalizing));
    }

    #[tokio::test]
    async fn test_unreadable_analysis_audio_degrades_to_uniform() {
        // The mock materializes stub bytes that are not a WAV payload, so
        // the highlight scan fails and the planner falls back
        let mut pipeline = Pipeline::new(MockEngine::new(), app("degrade"), silent_progress());
        let cut = CutConfig::default();

        let clips = pipeline
            .process_video(
                Path::new("/tmp/source.mp4"),
                &cut,
                &CaptionConfig::default(),
                true,
            )
            .await
            .unwrap();

        assert_eq!(clips.len(), 3);
        assert_eq!(clips[0].start_time, 0.0);
        // First engine call was the analysis extraction
        let first = pipeline.engine().nth_call(0);
        assert!(first.contains(&"pcm_s16le".to_string()));
        assert_eq!(first.last().unwrap(), ANALYSIS_WAV);
    }

    #[tokio::test]
    async fn test_engine_crash_reloads_and_retries_once() {
        let engine = MockEngine::new();
        engine.script_crash();
        let mut pipeline = Pipeline::new(engine, app("crash-retry"), silent_progress());
        let cut = CutConfig {
            clip_count: 1,
            ..CutConfig::default()
        };

        let clips = pipeline
            .process_video(
                Path::new("/tmp/source.mp4"),
                &cut,
                &CaptionConfig::default(),
                false,
            )
            .await
            .unwrap();

        assert_eq!(clips.len(), 1);
        assert_eq!(*pipeline.engine().reload_count.lock().unwrap(), 1);
        assert_eq!(pipeline.engine().call_count(), 2);
    }

    #[tokio::test]
    async fn test_second_crash_is_fatal() {
        let engine = MockEngine::new();
        engine.script_crash();
        engine.script_crash();
        let (progress, stages) = stage_recorder();
        let mut pipeline = Pipeline::new(engine, app("crash-fatal"), progress);
        let cut = CutConfig {
            clip_count: 1,
            ..CutConfig::default()
        };

        let result = pipeline
            .process_video(
                Path::new("/tmp/source.mp4"),
                &cut,
                &CaptionConfig::default(),
                false,
            )
            .await;

        assert!(result.is_err());
        assert_eq!(*pipeline.engine().reload_count.lock().unwrap(), 1);
        assert_eq!(stages.lock().unwrap().last(), Some(&ProcessingStage::Error));
    }

    #[tokio::test]
    async fn test_abort_before_start_produces_no_clips() {
        let (progress, stages) = stage_recorder();
        let mut pipeline = Pipeline::new(MockEngine::new(), app("abort-early"), progress);
        pipeline.abort();

        let clips = pipeline
            .process_video(
                Path::new("/tmp/source.mp4"),
                &CutConfig::default(),
                &CaptionConfig::default(),
                false,
            )
            .await
            .unwrap();

        assert!(clips.is_empty());
        assert_eq!(
            stages.lock().unwrap().last(),
            Some(&ProcessingStage::Aborted)
        );
    }

    #[tokio::test]
    async fn test_mid_run_abort_keeps_completed_clips() {
        let stages = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&stages);
        let cancel_slot: Arc<Mutex<Option<Arc<AtomicBool>>>> = Arc::new(Mutex::new(None));
        let trigger = Arc::clone(&cancel_slot);
        let progress: ProgressCallback = Box::new(move |p: ProcessingProgress| {
            sink.lock().unwrap().push(p.stage);
            // Abort while the second clip is encoding
            if p.current_clip == 2 && p.stage == ProcessingStage::Encoding {
                if let Some(cancel) = trigger.lock().unwrap().as_ref() {
                    cancel.store(true, Ordering::SeqCst);
                }
            }
        });

        let mut pipeline = Pipeline::new(MockEngine::new(), app("abort-mid"), progress);
        *cancel_slot.lock().unwrap() = Some(pipeline.cancel_token());

        let clips = pipeline
            .process_video(
                Path::new("/tmp/source.mp4"),
                &CutConfig::default(),
                &CaptionConfig::default(),
                false,
            )
            .await
            .unwrap();

        assert_eq!(clips.len(), 1);
        assert!(clips[0].path.exists());
        assert_eq!(
            stages.lock().unwrap().last(),
            Some(&ProcessingStage::Aborted)
        );
    }

    #[tokio::test]
    async fn test_hook_captions_reach_the_filter_chain() {
        let mut pipeline = Pipeline::new(MockEngine::new(), app_with_font("hooks"), silent_progress());
        let cut = CutConfig {
            clip_count: 1,
            captions_enabled: true,
            ..CutConfig::default()
        };

        let clips = pipeline
            .process_video(
                Path::new("/tmp/source.mp4"),
                &cut,
                &CaptionConfig::default(),
                false,
            )
            .await
            .unwrap();

        assert_eq!(clips.len(), 1);
        assert_eq!(clips[0].caption_text.as_deref(), Some("WAIT FOR IT..."));

        let args = pipeline.engine().nth_call(0);
        let vf = args
            .iter()
            .position(|a| a == "-vf")
            .map(|i| args[i + 1].clone())
            .unwrap();
        assert!(vf.contains("drawtext"));
        assert!(vf.contains("WAIT FOR IT"));
    }

    #[tokio::test]
    async fn test_reset_removes_outputs_and_clears_state() {
        let mut pipeline = Pipeline::new(MockEngine::new(), app("reset"), silent_progress());
        let cut = CutConfig {
            clip_count: 1,
            ..CutConfig::default()
        };

        let clips = pipeline
            .process_video(
                Path::new("/tmp/source.mp4"),
                &cut,
                &CaptionConfig::default(),
                false,
            )
            .await
            .unwrap();
        let path = clips[0].path.clone();
        assert!(path.exists());

        pipeline.reset();
        assert!(pipeline.clips().is_empty());
        assert!(!path.exists());
    }
}
