//! Encode engine seam
//! Wraps the external ffmpeg binary behind a narrow contract: an ordered
//! argument list, a managed working directory acting as the engine's file
//! interface, and an exit code. The trait keeps the compositor and the
//! orchestrator testable against a scripted mock.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use log::{debug, info};
use regex::Regex;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

/// Stderr markers that indicate the engine process itself died rather than
/// a filter or caption problem
const CRASH_MARKERS: &[&str] = &["Segmentation fault", "Assertion", "double free", "core dumped"];

/// Outcome of one engine invocation
#[derive(Debug, Clone)]
pub struct EngineExit {
    /// Process exit code; None when the process was killed by a signal
    pub code: Option<i32>,
    pub stderr: String,
}

impl EngineExit {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Heuristic for engine-fatal failures that warrant a reload-and-retry
    /// instead of the caption fallback ladder
    pub fn is_engine_crash(&self) -> bool {
        if self.success() {
            return false;
        }
        self.code.is_none() || CRASH_MARKERS.iter().any(|m| self.stderr.contains(m))
    }
}

/// Basic stream properties of a source video
#[derive(Debug, Clone, Copy)]
pub struct MediaInfo {
    pub duration: f64,
    pub width: u32,
    pub height: u32,
}

/// Contract between the pipeline and the external encode engine
#[allow(async_fn_in_trait)]
pub trait EncodeEngine {
    /// Idempotent initialization; duplicate calls are no-ops
    async fn load(&self) -> Result<()>;

    /// Tear down and re-initialize after a detected engine crash
    async fn reload(&self) -> Result<()>;

    /// Run one invocation with the given ordered argument list
    async fn run(&self, args: &[String], cancel: &Arc<AtomicBool>) -> Result<EngineExit>;

    /// Probe duration and resolution of a media file
    async fn probe(&self, path: &Path) -> Result<MediaInfo>;

    fn write(&self, name: &str, bytes: &[u8]) -> Result<()>;
    fn read(&self, name: &str) -> Result<Vec<u8>>;
    fn delete(&self, name: &str) -> Result<()>;
}

/// The real engine: system ffmpeg/ffprobe with a dedicated working directory
pub struct FfmpegEngine {
    workdir: PathBuf,
    loaded: AtomicBool,
}

impl FfmpegEngine {
    pub fn new(workdir: PathBuf) -> Self {
        Self {
            workdir,
            loaded: AtomicBool::new(false),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Verify that a binary responds to -version
    async fn check_binary(name: &str) -> Result<()> {
        let status = Command::new(name)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .with_context(|| format!("{} not found on PATH", name))?;
        if !status.success() {
            return Err(anyhow!("{} -version exited with failure", name));
        }
        Ok(())
    }

    fn resolve(&self, name: &str) -> Result<PathBuf> {
        if name.contains("..") || name.contains('/') || name.contains('\\') {
            return Err(anyhow!("Invalid engine file name: {}", name));
        }
        Ok(self.workdir.join(name))
    }
}

impl EncodeEngine for FfmpegEngine {
    async fn load(&self) -> Result<()> {
        if self.loaded.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        Self::check_binary("ffmpeg").await?;
        Self::check_binary("ffprobe").await?;
        std::fs::create_dir_all(&self.workdir)
            .with_context(|| format!("Failed to create workdir: {:?}", self.workdir))?;

        info!("Encode engine ready, workdir: {:?}", self.workdir);
        Ok(())
    }

    async fn reload(&self) -> Result<()> {
        info!("Reloading encode engine after fatal failure");
        self.loaded.store(false, Ordering::SeqCst);
        self.load().await
    }

    async fn run(&self, args: &[String], cancel: &Arc<AtomicBool>) -> Result<EngineExit> {
        debug!("ffmpeg args: {:?}", args);

        let mut child = Command::new("ffmpeg")
            .args(args)
            .current_dir(&self.workdir)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .context("Failed to spawn ffmpeg")?;

        let mut stderr_pipe = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(ref mut pipe) = stderr_pipe {
                let _ = pipe.read_to_end(&mut buf).await;
            }
            buf
        });

        loop {
            if cancel.load(Ordering::Relaxed) {
                let _ = child.start_kill();
                let _ = child.wait().await;
                stderr_task.abort();
                return Err(anyhow!("Encode cancelled by user"));
            }

            match child.try_wait().context("Failed to poll ffmpeg")? {
                Some(status) => {
                    let stderr_bytes = stderr_task.await.unwrap_or_default();
                    return Ok(EngineExit {
                        code: status.code(),
                        stderr: String::from_utf8_lossy(&stderr_bytes).to_string(),
                    });
                }
                None => tokio::time::sleep(Duration::from_millis(120)).await,
            }
        }
    }

    async fn probe(&self, path: &Path) -> Result<MediaInfo> {
        let output = Command::new("ffprobe")
            .args([
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=width,height:format=duration",
                "-of",
                "default=noprint_wrappers=1",
            ])
            .arg(path)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output()
            .await
            .context("Failed to run ffprobe")?;

        if !output.status.success() {
            return Err(anyhow!("ffprobe failed for {:?}", path));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let (width, height, duration) = parse_probe_output(&stdout);

        if width == 0 || height == 0 || duration <= 0.0 {
            return Err(anyhow!(
                "ffprobe returned incomplete stream info for {:?}: '{}'",
                path,
                stdout.trim()
            ));
        }

        Ok(MediaInfo {
            duration,
            width,
            height,
        })
    }

    fn write(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let path = self.resolve(name)?;
        std::fs::write(&path, bytes).with_context(|| format!("Failed to write {:?}", path))
    }

    fn read(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.resolve(name)?;
        std::fs::read(&path).with_context(|| format!("Failed to read {:?}", path))
    }

    fn delete(&self, name: &str) -> Result<()> {
        let path = self.resolve(name)?;
        if path.exists() {
            std::fs::remove_file(&path).with_context(|| format!("Failed to delete {:?}", path))?;
        }
        Ok(())
    }
}

/// Pull width, height and duration out of ffprobe's flat key=value output
fn parse_probe_output(stdout: &str) -> (u32, u32, f64) {
    fn capture(stdout: &str, pattern: &str) -> Option<String> {
        Regex::new(pattern)
            .ok()?
            .captures(stdout)
            .map(|c| c[1].to_string())
    }

    let width = capture(stdout, r"(?m)^width=(\d+)")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let height = capture(stdout, r"(?m)^height=(\d+)")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let duration = capture(stdout, r"(?m)^duration=([0-9.]+)")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0.0);
    (width, height, duration)
}

/// Build the argument list that extracts a clip window as 16kHz mono WAV,
/// the format both the peak detector and the transcription service expect
pub fn wav_extract_args(source: &Path, start: f64, duration: f64, output_name: &str) -> Vec<String> {
    vec![
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-ss".to_string(),
        format!("{:.3}", start),
        "-i".to_string(),
        source.to_string_lossy().to_string(),
        "-t".to_string(),
        format!("{:.3}", duration),
        "-vn".to_string(),
        "-ar".to_string(),
        "16000".to_string(),
        "-ac".to_string(),
        "1".to_string(),
        "-c:a".to_string(),
        "pcm_s16le".to_string(),
        "-y".to_string(),
        output_name.to_string(),
    ]
}
