//! Caption compositor with a descending-reliability strategy ladder
//! Renders a clip with captions through native drawtext, a restricted
//! drawtext variant, or a libass-rasterized subtitle overlay, and guarantees
//! the render completes with a usable file whenever video-only rendering is
//! itself viable.

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use log::{debug, info, warn};

use crate::captions::{build_ass_document, build_drawtext_directives, CaptionInput};
use crate::config::AppConfig;
use crate::engine::EncodeEngine;
use crate::filters::FilterPlan;
use crate::types::ClipTiming;

/// Engine-relative name of the staged drawtext font
pub const FONT_FILE: &str = "caption-font.ttf";

/// Font locations probed when settings.json does not pin one
const FONT_CANDIDATES: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans-Bold.ttf",
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Bold.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/System/Library/Fonts/Supplemental/Arial Bold.ttf",
    "C:\\Windows\\Fonts\\arialbd.ttf",
];

/// Which rung of the ladder produced the final render
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderStrategy {
    /// Native drawtext with standard escaping
    DrawText,
    /// Drawtext with the restricted charset and conservative escaping
    DrawTextSafe,
    /// ASS document rasterized by libass and burned as an overlay
    SubtitleOverlay,
    /// Base filter chain only, no captions
    Plain,
}

impl std::fmt::Display for RenderStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RenderStrategy::DrawText => "A_drawtext",
            RenderStrategy::DrawTextSafe => "B_drawtext_safe",
            RenderStrategy::SubtitleOverlay => "C_subtitle_overlay",
            RenderStrategy::Plain => "plain",
        };
        write!(f, "{}", name)
    }
}

/// Result of a completed clip render
#[derive(Debug, Clone)]
pub struct RenderOutcome {
    pub strategy: RenderStrategy,
    /// Whether any caption content made it into the output
    pub had_any_captions: bool,
    /// Engine-relative name of the encoded artifact
    pub output_name: String,
}

/// Everything the compositor needs to render one clip
pub struct RenderRequest<'a> {
    pub source: &'a Path,
    pub timing: ClipTiming,
    pub plan: &'a FilterPlan,
    pub captions: Option<CaptionInput>,
    /// When true, a plain encode is not an acceptable substitute once
    /// caption content exists; every strategy must fail before giving up
    pub captions_required: bool,
    pub clip_index: usize,
}

/// Stage a usable TTF font into the engine working directory for drawtext.
/// Returns the engine-relative font name, or an error when no font can be
/// found, in which case the ladder skips both drawtext strategies.
pub fn stage_font<E: EncodeEngine>(engine: &E, app_config: &AppConfig) -> Result<String> {
    // An explicitly configured font is authoritative: if it cannot be read
    // there is no silent fallback to autodetection
    if let Some(path) = &app_config.font_path {
        let bytes = std::fs::read(PathBuf::from(path))
            .with_context(|| format!("Configured caption font not readable: {}", path))?;
        engine.write(FONT_FILE, &bytes)?;
        debug!("Staged caption font from {}", path);
        return Ok(FONT_FILE.to_string());
    }

    for candidate in FONT_CANDIDATES {
        if let Ok(bytes) = std::fs::read(candidate) {
            engine.write(FONT_FILE, &bytes)?;
            debug!("Staged caption font from {}", candidate);
            return Ok(FONT_FILE.to_string());
        }
    }

    Err(anyhow!("No usable caption font found on this system"))
}

/// Shared encode invocation: trim to the clip window, strip metadata, apply
/// the filter chain, map video plus optional audio, and encode with fixed
/// compatibility-first settings.
///
/// `-t` sits before `-i` so it trims the source window; after `-i` it would
/// cap the output instead, cutting slowed clips short of their window.
fn encode_args(
    source: &Path,
    timing: ClipTiming,
    video_chain: &str,
    audio_filter: Option<&str>,
    output_name: &str,
) -> Vec<String> {
    let mut args = vec![
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-ss".to_string(),
        format!("{:.3}", timing.start_time),
        "-t".to_string(),
        format!("{:.3}", timing.duration()),
        "-i".to_string(),
        source.to_string_lossy().to_string(),
        "-map_metadata".to_string(),
        "-1".to_string(),
        "-vf".to_string(),
        video_chain.to_string(),
    ];

    if let Some(af) = audio_filter {
        args.push("-af".to_string());
        args.push(af.to_string());
    }

    args.extend(
        [
            "-map",
            "0:v",
            "-map",
            "0:a?",
            "-c:v",
            "libx264",
            "-preset",
            "veryfast",
            "-profile:v",
            "high",
            "-pix_fmt",
            "yuv420p",
            "-crf",
            "23",
            "-c:a",
            "aac",
            "-b:a",
            "192k",
            "-movflags",
            "+faststart",
            "-y",
        ]
        .iter()
        .map(|s| s.to_string()),
    );
    args.push(output_name.to_string());
    args
}

/// Run one encode attempt and fold engine-fatal exits into errors the
/// orchestrator can recognize for its reload-and-retry path.
async fn attempt_encode<E: EncodeEngine>(
    engine: &E,
    args: &[String],
    cancel: &Arc<AtomicBool>,
) -> Result<bool> {
    let exit = engine.run(args, cancel).await?;
    if exit.success() {
        return Ok(true);
    }
    if exit.is_engine_crash() {
        return Err(anyhow!(
            "Engine crashed during encode: {}",
            exit.stderr.lines().last().unwrap_or("(no stderr)")
        ));
    }
    debug!(
        "Encode attempt failed (exit {:?}): {}",
        exit.code,
        exit.stderr.lines().last().unwrap_or("(no stderr)")
    );
    Ok(false)
}

/// Render one clip through the strategy ladder.
///
/// Ladder: A native drawtext, B restricted drawtext, C rasterized subtitle
/// overlay, then a terminal plain encode when captions were not required.
/// Cancellation and engine-crash errors propagate immediately; ordinary
/// encode failures fall through to the next rung.
pub async fn render_clip<E: EncodeEngine>(
    engine: &E,
    request: &RenderRequest<'_>,
    app_config: &AppConfig,
    cancel: &Arc<AtomicBool>,
) -> Result<RenderOutcome> {
    let output_name = format!("clip_{:03}.mp4", request.clip_index);
    let plain_chain = request.plan.video_chain(&[]);
    let audio_filter = request.plan.audio_filter.as_deref();

    // No caption content at all: the plain encode is the normal path, not a
    // fallback. Holds for caption-less runs and, by explicit policy, for
    // required-captions runs where the speech source produced nothing.
    let captions = match &request.captions {
        Some(input) if !input.is_empty() => input,
        _ => {
            let args = encode_args(
                request.source,
                request.timing,
                &plain_chain,
                audio_filter,
                &output_name,
            );
            if attempt_encode(engine, &args, cancel).await? {
                return Ok(RenderOutcome {
                    strategy: RenderStrategy::Plain,
                    had_any_captions: false,
                    output_name,
                });
            }
            return Err(anyhow!("Plain encode failed for clip {}", request.clip_index));
        }
    };

    // Strategies A and B both need a staged font
    match stage_font(engine, app_config) {
        Ok(font) => {
            for (strategy, restricted) in [
                (RenderStrategy::DrawText, false),
                (RenderStrategy::DrawTextSafe, true),
            ] {
                let directives = build_drawtext_directives(captions, &font, restricted);
                if directives.is_empty() {
                    break;
                }
                let chain = request.plan.video_chain(&directives);
                let args = encode_args(
                    request.source,
                    request.timing,
                    &chain,
                    audio_filter,
                    &output_name,
                );
                if attempt_encode(engine, &args, cancel).await? {
                    info!("Clip {} rendered via {}", request.clip_index, strategy);
                    return Ok(RenderOutcome {
                        strategy,
                        had_any_captions: true,
                        output_name,
                    });
                }
                warn!(
                    "Caption strategy {} failed for clip {}, trying next",
                    strategy, request.clip_index
                );
            }
        }
        Err(e) => {
            warn!("Font staging failed ({}), skipping drawtext strategies", e);
        }
    }

    // Strategy C: libass rasterizes the text, sidestepping drawtext parsing
    match build_ass_document(captions) {
        Some(document) => {
            let ass_name = format!("captions_{:03}.ass", request.clip_index);
            engine.write(&ass_name, document.as_bytes())?;

            let subtitle_filter = format!("subtitles=filename={}:fontsdir=.", ass_name);
            let chain = request.plan.video_chain(&[subtitle_filter]);
            let args = encode_args(
                request.source,
                request.timing,
                &chain,
                audio_filter,
                &output_name,
            );
            let rendered = attempt_encode(engine, &args, cancel).await;
            let _ = engine.delete(&ass_name);

            if rendered? {
                info!(
                    "Clip {} rendered via {}",
                    request.clip_index,
                    RenderStrategy::SubtitleOverlay
                );
                return Ok(RenderOutcome {
                    strategy: RenderStrategy::SubtitleOverlay,
                    had_any_captions: true,
                    output_name,
                });
            }
            warn!(
                "Caption strategy {} failed for clip {}",
                RenderStrategy::SubtitleOverlay,
                request.clip_index
            );
        }
        None => {
            // Zero overlays left after normalization and budgeting: C
            // degrades to a plain encode and reports success without
            // caption content.
            let args = encode_args(
                request.source,
                request.timing,
                &plain_chain,
                audio_filter,
                &output_name,
            );
            if attempt_encode(engine, &args, cancel).await? {
                return Ok(RenderOutcome {
                    strategy: RenderStrategy::SubtitleOverlay,
                    had_any_captions: false,
                    output_name,
                });
            }
            return Err(anyhow!("Plain encode failed for clip {}", request.clip_index));
        }
    }

    // Terminal fallback: one caption-less encode, only when captions were
    // not a hard requirement
    if !request.captions_required {
        let args = encode_args(
            request.source,
            request.timing,
            &plain_chain,
            audio_filter,
            &output_name,
        );
        if attempt_encode(engine, &args, cancel).await? {
            warn!(
                "All caption strategies failed for clip {}; completed without captions",
                request.clip_index
            );
            return Ok(RenderOutcome {
                strategy: RenderStrategy::Plain,
                had_any_captions: false,
                output_name,
            });
        }
    }

    Err(anyhow!(
        "Every render strategy failed for clip {}",
        request.clip_index
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CaptionPosition, CutConfig};
    use crate::engine::mock::MockEngine;
    use crate::types::CaptionSegment;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn plan() -> FilterPlan {
        let mut rng = StdRng::seed_from_u64(7);
        FilterPlan::build(&CutConfig::default(), 1920, 1080, 5.0, &mut rng)
    }

    fn captions(segments: Vec<CaptionSegment>, hook: Option<&str>) -> CaptionInput {
        CaptionInput {
            duration: 5.0,
            position: CaptionPosition::Bottom,
            primary_color: "white".to_string(),
            highlight_color: Some("yellow".to_string()),
            hook_text: hook.map(|s| s.to_string()),
            segments,
        }
    }

    fn seg(text: &str, start: f64, end: f64) -> CaptionSegment {
        CaptionSegment {
            text: text.to_string(),
            start,
            end,
        }
    }

    /// App config with a font the mock can always stage
    fn app_with_font() -> AppConfig {
        let font = std::env::temp_dir().join("shortforge-test-font.ttf");
        std::fs::write(&font, b"stub-font-bytes").unwrap();
        AppConfig {
            font_path: Some(font.to_string_lossy().to_string()),
            ..AppConfig::default()
        }
    }

    /// App config whose font lookup fails (and no system fonts assumed)
    fn app_without_font() -> AppConfig {
        AppConfig {
            font_path: Some("/nonexistent/font.ttf".to_string()),
            ..AppConfig::default()
        }
    }

    fn request<'a>(
        plan: &'a FilterPlan,
        captions_input: Option<CaptionInput>,
        required: bool,
    ) -> RenderRequest<'a> {
        RenderRequest {
            source: Path::new("/tmp/source.mp4"),
            timing: ClipTiming {
                start_time: 10.0,
                end_time: 15.0,
                peak_intensity: None,
            },
            plan,
            captions: captions_input,
            captions_required: required,
            clip_index: 0,
        }
    }

    fn no_cancel() -> Arc<AtomicBool> {
        Arc::new(AtomicBool::new(false))
    }

    #[tokio::test]
    async fn test_strategy_a_succeeds_first() {
        let engine = MockEngine::new();
        let p = plan();
        let req = request(
            &p,
            Some(captions(
                vec![seg("hi there", 1.0, 3.0)],
                Some("WAIT FOR IT"),
            )),
            false,
        );

        let outcome = render_clip(&engine, &req, &app_with_font(), &no_cancel())
            .await
            .unwrap();
        assert_eq!(outcome.strategy, RenderStrategy::DrawText);
        assert_eq!(outcome.strategy.to_string(), "A_drawtext");
        assert!(outcome.had_any_captions);
        assert_eq!(engine.call_count(), 1);

        let chain_arg = engine.nth_call(0);
        let vf = chain_arg
            .iter()
            .position(|a| a == "-vf")
            .map(|i| chain_arg[i + 1].clone())
            .unwrap();
        assert!(vf.contains("drawtext"));
        assert!(vf.contains("WAIT FOR IT"));
    }

    #[tokio::test]
    async fn test_a_failure_falls_back_to_b() {
        let engine = MockEngine::new();
        engine.script_failure(); // A fails
        let p = plan();
        let req = request(&p, Some(captions(vec![seg("text", 1.0, 3.0)], None)), false);

        let outcome = render_clip(&engine, &req, &app_with_font(), &no_cancel())
            .await
            .unwrap();
        assert_eq!(outcome.strategy, RenderStrategy::DrawTextSafe);
        assert_eq!(engine.call_count(), 2);
    }

    #[tokio::test]
    async fn test_font_staging_failure_skips_to_c() {
        let engine = MockEngine::new();
        let p = plan();
        let req = request(&p, Some(captions(vec![seg("text", 1.0, 3.0)], None)), false);

        let outcome = render_clip(&engine, &req, &app_without_font(), &no_cancel())
            .await
            .unwrap();
        assert_eq!(outcome.strategy, RenderStrategy::SubtitleOverlay);
        assert!(outcome.had_any_captions);
        // Straight to C: a single encode invocation with a subtitles filter
        assert_eq!(engine.call_count(), 1);
        let args = engine.nth_call(0);
        assert!(args.iter().any(|a| a.contains("subtitles=filename=")));
    }

    #[tokio::test]
    async fn test_budget_merging_in_strategy_c() {
        let engine = MockEngine::new();
        let p = plan();
        let segments: Vec<CaptionSegment> = (0..20)
            .map(|i| seg(&format!("s{}", i), i as f64 * 0.2, i as f64 * 0.2 + 0.15))
            .collect();
        let req = request(&p, Some(captions(segments, None)), false);

        let outcome = render_clip(&engine, &req, &app_without_font(), &no_cancel())
            .await
            .unwrap();
        assert_eq!(outcome.strategy, RenderStrategy::SubtitleOverlay);

        // The ASS document written before the encode held at most 15 events
        // (it is deleted afterwards, so count from the document builder)
        let input = captions(
            (0..20)
                .map(|i| seg(&format!("s{}", i), i as f64 * 0.2, i as f64 * 0.2 + 0.15))
                .collect(),
            None,
        );
        let doc = build_ass_document(&input).unwrap();
        let events = doc.lines().filter(|l| l.starts_with("Dialogue:")).count();
        assert!(events <= 15, "{} events", events);
    }

    #[tokio::test]
    async fn test_all_strategies_fail_then_plain_when_not_required() {
        let engine = MockEngine::new();
        engine.script_failure(); // A
        engine.script_failure(); // B
        engine.script_failure(); // C
        let p = plan();
        let req = request(&p, Some(captions(vec![seg("text", 1.0, 3.0)], None)), false);

        let outcome = render_clip(&engine, &req, &app_with_font(), &no_cancel())
            .await
            .unwrap();
        assert_eq!(outcome.strategy, RenderStrategy::Plain);
        assert!(!outcome.had_any_captions);
        assert_eq!(engine.call_count(), 4);
    }

    #[tokio::test]
    async fn test_total_exhaustion_is_fatal_when_required() {
        let engine = MockEngine::new();
        engine.script_failure(); // A
        engine.script_failure(); // B
        engine.script_failure(); // C
        let p = plan();
        let req = request(&p, Some(captions(vec![seg("text", 1.0, 3.0)], None)), true);

        let result = render_clip(&engine, &req, &app_with_font(), &no_cancel()).await;
        assert!(result.is_err());
        assert_eq!(engine.call_count(), 3);
    }

    #[tokio::test]
    async fn test_empty_captions_render_plain_even_when_required() {
        // Explicit policy: never fabricate caption text when the speech
        // source produced nothing
        let engine = MockEngine::new();
        let p = plan();
        let req = request(&p, Some(captions(vec![], None)), true);

        let outcome = render_clip(&engine, &req, &app_with_font(), &no_cancel())
            .await
            .unwrap();
        assert_eq!(outcome.strategy, RenderStrategy::Plain);
        assert!(!outcome.had_any_captions);
    }

    #[tokio::test]
    async fn test_no_caption_request_is_single_plain_encode() {
        let engine = MockEngine::new();
        let p = plan();
        let req = request(&p, None, false);

        let outcome = render_clip(&engine, &req, &app_with_font(), &no_cancel())
            .await
            .unwrap();
        assert_eq!(outcome.strategy, RenderStrategy::Plain);
        assert_eq!(engine.call_count(), 1);

        let args = engine.nth_call(0);
        // Metadata stripped, optional audio mapping, trim window honored
        assert!(args.contains(&"-map_metadata".to_string()));
        assert!(args.contains(&"0:a?".to_string()));
        let ss = args.iter().position(|a| a == "-ss").unwrap();
        assert_eq!(args[ss + 1], "10.000");
        let t = args.iter().position(|a| a == "-t").unwrap();
        assert_eq!(args[t + 1], "5.000");
    }

    #[tokio::test]
    async fn test_slowed_clip_trims_input_not_output() {
        // At speed 0.5 the slowed output runs twice the window length, so
        // the trim must apply to the source side or half the window is lost
        let engine = MockEngine::new();
        let mut rng = StdRng::seed_from_u64(7);
        let config = CutConfig {
            speed: 0.5,
            ..CutConfig::default()
        };
        let p = FilterPlan::build(&config, 1920, 1080, 5.0, &mut rng);
        let req = request(&p, None, false);

        render_clip(&engine, &req, &app_with_font(), &no_cancel())
            .await
            .unwrap();

        let args = engine.nth_call(0);
        let t = args.iter().position(|a| a == "-t").unwrap();
        let i = args.iter().position(|a| a == "-i").unwrap();
        assert!(t < i, "-t must precede -i to trim the input");
        assert_eq!(args[t + 1], "5.000");
        let vf = args
            .iter()
            .position(|a| a == "-vf")
            .map(|n| args[n + 1].clone())
            .unwrap();
        assert!(vf.contains("setpts=2.000000*PTS"));
    }

    #[tokio::test]
    async fn test_engine_crash_propagates_for_retry() {
        let engine = MockEngine::new();
        engine.script_crash();
        let p = plan();
        let req = request(&p, None, false);

        let err = render_clip(&engine, &req, &app_with_font(), &no_cancel())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Engine crashed"));
    }
}
