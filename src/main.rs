//! ShortForge
//! Cuts long horizontal videos into short vertical 9:16 clips, with
//! audio-highlight clip selection, per-clip filter fingerprints and
//! burned-in captions.

mod ai;
mod captions;
mod compositor;
mod config;
mod engine;
mod filters;
mod peaks;
mod pipeline;
mod segmenter;
mod timing;
mod transcribe;
mod types;

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::atomic::Ordering;

use anyhow::{anyhow, Context, Result};
use simplelog::{Config as LogConfig, LevelFilter, WriteLogger};

use config::{AppConfig, CaptionConfig, CaptionPosition, CaptionStyle, CutConfig};
use engine::{EncodeEngine, FfmpegEngine};
use pipeline::Pipeline;
use types::ProgressCallback;

const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

fn engine_workdir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("shortforge")
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    // Check and strip --debug flag
    let debug_mode = args.contains(&"--debug".to_string());
    if debug_mode {
        let _ = WriteLogger::init(
            LevelFilter::Debug,
            LogConfig::default(),
            OpenOptions::new()
                .create(true)
                .append(true)
                .open("debug.log")?,
        );
        log::info!("Starting ShortForge {} with debug logging", APP_VERSION);
        log::debug!("Raw args: {:?}", args);
    }

    let actual_args: Vec<String> = args.iter().filter(|a| *a != "--debug").cloned().collect();
    let exe = actual_args
        .first()
        .map(String::as_str)
        .unwrap_or("shortforge");

    if actual_args.len() < 2 {
        print_usage(exe);
        return Ok(());
    }

    match actual_args[1].as_str() {
        "cut" => run_cut(&actual_args).await,
        "probe" => run_probe(&actual_args).await,
        "init" => {
            AppConfig::create_default()?;
            println!("✅ Wrote default settings.json");
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage(exe);
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other);
            print_usage(exe);
            std::process::exit(1);
        }
    }
}

fn print_usage(exe: &str) {
    println!("ShortForge {} - vertical clip cutter", APP_VERSION);
    println!();
    println!("Usage:");
    println!("  {} cut <video> [options]    Cut a video into vertical clips", exe);
    println!("  {} probe <video>            Show source properties and crop", exe);
    println!("  {} init                     Write a default settings.json", exe);
    println!();
    println!("Cut options:");
    println!("  --count <n>         Number of clips (default 3)");
    println!("  --duration <secs>   Clip length in seconds (default 30)");
    println!("  --speed <x>         Playback speed 0.5-2.0 (default 1.0)");
    println!("  --zoom <0-100>      Ken-Burns zoom intensity (default 0)");
    println!("  --highlights        Anchor clips on audio-energy peaks");
    println!("  --captions          Enable caption overlays");
    println!("  --style <name>      hooks | part | custom | transcript | smart");
    println!("  --text <text>       Caption text for the custom style");
    println!("  --position <pos>    top | center | bottom (default bottom)");
    println!("  --language <code>   Transcription language hint (default auto)");
    println!("  --required          Fail a clip when every caption strategy fails");
    println!("  --output <dir>      Output directory override");
    println!("  --debug             Write debug.log");
}

fn next_value(args: &[String], i: &mut usize, flag: &str) -> Result<String> {
    *i += 1;
    args.get(*i)
        .cloned()
        .ok_or_else(|| anyhow!("{} expects a value", flag))
}

fn parse_style(name: &str) -> Result<CaptionStyle> {
    match name {
        "hooks" => Ok(CaptionStyle::Hooks),
        "part" => Ok(CaptionStyle::Part),
        "custom" => Ok(CaptionStyle::Custom),
        "transcript" => Ok(CaptionStyle::Transcript),
        "smart" => Ok(CaptionStyle::Smart),
        other => Err(anyhow!("Unknown caption style: {}", other)),
    }
}

fn parse_position(name: &str) -> Result<CaptionPosition> {
    match name {
        "top" => Ok(CaptionPosition::Top),
        "center" => Ok(CaptionPosition::Center),
        "bottom" => Ok(CaptionPosition::Bottom),
        other => Err(anyhow!("Unknown caption position: {}", other)),
    }
}

async fn run_cut(args: &[String]) -> Result<()> {
    if args.len() < 3 {
        eprintln!("Usage: {} cut <video> [options]", args[0]);
        eprintln!("\nExample:");
        eprintln!("  {} cut talk.mp4 --count 5 --highlights --captions", args[0]);
        std::process::exit(1);
    }

    let video = PathBuf::from(&args[2]);
    if !video.exists() {
        return Err(anyhow!("Input video not found: {:?}", video));
    }

    let mut cut = CutConfig::default();
    let mut caption_config = CaptionConfig::default();
    let mut use_highlights = false;
    let mut output_override: Option<String> = None;

    let mut i = 3;
    while i < args.len() {
        match args[i].as_str() {
            "--count" => {
                cut.clip_count = next_value(args, &mut i, "--count")?
                    .parse()
                    .context("--count expects a whole number")?;
            }
            "--duration" => {
                cut.clip_duration = next_value(args, &mut i, "--duration")?
                    .parse()
                    .context("--duration expects seconds")?;
            }
            "--speed" => {
                cut.speed = next_value(args, &mut i, "--speed")?
                    .parse()
                    .context("--speed expects a number")?;
            }
            "--zoom" => {
                cut.zoom_intensity = next_value(args, &mut i, "--zoom")?
                    .parse()
                    .context("--zoom expects 0-100")?;
            }
            "--highlights" => use_highlights = true,
            "--captions" => cut.captions_enabled = true,
            "--style" => {
                cut.captions_enabled = true;
                cut.caption_style = parse_style(&next_value(args, &mut i, "--style")?)?;
            }
            "--text" => cut.custom_text = next_value(args, &mut i, "--text")?,
            "--position" => {
                caption_config.position = parse_position(&next_value(args, &mut i, "--position")?)?;
            }
            "--language" => caption_config.language = next_value(args, &mut i, "--language")?,
            "--required" => caption_config.required = true,
            "--output" => output_override = Some(next_value(args, &mut i, "--output")?),
            other => return Err(anyhow!("Unknown option: {}", other)),
        }
        i += 1;
    }

    let mut app_config = AppConfig::load()?;
    if let Some(dir) = output_override {
        app_config.default_output_dir = dir;
    }
    cut.validate()?;
    let keep_workdir = app_config.keep_workdir;

    let workdir = engine_workdir();
    let engine = FfmpegEngine::new(workdir.clone());

    let progress: ProgressCallback = Box::new(|p| {
        if p.total_clips > 0 {
            println!(
                "  [{}] clip {}/{}: {}",
                p.stage, p.current_clip, p.total_clips, p.stage_message
            );
        } else if !p.stage_message.is_empty() {
            println!("  [{}] {}", p.stage, p.stage_message);
        }
    });

    let mut pipeline = Pipeline::new(engine, app_config, progress);

    // Ctrl-C finishes or abandons the current clip, then stops
    let cancel = pipeline.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("\n🛑 Cancelling...");
            cancel.store(true, Ordering::SeqCst);
        }
    });

    println!(
        "🎬 Cutting {:?} into {} clip(s) of {:.0}s",
        video, cut.clip_count, cut.clip_duration
    );
    // The workdir goes away on every terminal state, error included
    let result = pipeline
        .process_video(&video, &cut, &caption_config, use_highlights)
        .await;
    remove_workdir_unless_kept(keep_workdir, &workdir);
    let clips = result?;

    if clips.is_empty() {
        println!("⚠️  No clips were produced");
    } else {
        println!("✅ {} clip(s) ready:", clips.len());
        for clip in &clips {
            match &clip.caption_text {
                Some(text) => println!(
                    "   {} ({:.1}s - {:.1}s) \"{}\"",
                    clip.path.display(),
                    clip.start_time,
                    clip.end_time,
                    text
                ),
                None => println!(
                    "   {} ({:.1}s - {:.1}s)",
                    clip.path.display(),
                    clip.start_time,
                    clip.end_time
                ),
            }
        }
    }

    Ok(())
}

fn remove_workdir_unless_kept(keep_workdir: bool, workdir: &std::path::Path) {
    if !keep_workdir {
        let _ = std::fs::remove_dir_all(workdir);
    }
}

async fn run_probe(args: &[String]) -> Result<()> {
    if args.len() < 3 {
        eprintln!("Usage: {} probe <video>", args[0]);
        std::process::exit(1);
    }

    let video = PathBuf::from(&args[2]);
    let engine = FfmpegEngine::new(engine_workdir());
    engine.load().await?;
    let media = engine.probe(&video).await?;
    let (crop_w, crop_h) = filters::smart_crop(media.width, media.height);

    println!("📹 {:?}", video);
    println!("   Resolution: {}x{}", media.width, media.height);
    println!("   Duration:   {:.1}s", media.duration);
    println!("   9:16 crop:  {}x{}", crop_w, crop_h);
    Ok(())
}
