//! Filter-graph builder
//! Derives the ordered video-filter chain for one clip: speed, smart crop,
//! scale, eased zoom, per-clip color fingerprint, and grain. The matching
//! audio tempo argument is produced alongside.

use rand::rngs::StdRng;
use rand::Rng;

use crate::config::{CaptionStyle, CutConfig};

/// Canonical vertical output resolution (9:16)
pub const OUTPUT_WIDTH: u32 = 1080;
pub const OUTPUT_HEIGHT: u32 = 1920;

/// Frame rate assumed for the zoompan frame-count expression
const ZOOM_FPS: u32 = 30;

/// Maximum Ken-Burns zoom amplitude at zoom_intensity = 100
const MAX_ZOOM_AMPLITUDE: f64 = 0.12;

/// Fixed pool of attention-hook phrases, cycled by clip index
pub const HOOK_POOL: &[&str] = &[
    "WAIT FOR IT...",
    "YOU WON'T BELIEVE THIS",
    "WATCH TILL THE END",
    "THIS CHANGED EVERYTHING",
    "NOBODY TALKS ABOUT THIS",
    "HOW IS THIS REAL?",
    "DON'T SKIP THIS",
    "THE BEST PART IS COMING",
];

/// Small per-clip color perturbation used as an anti-duplication fingerprint.
/// Drawn fresh for every clip from a run-seeded generator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorFingerprint {
    pub brightness: f64,
    pub contrast: f64,
    pub saturation: f64,
    pub gamma: f64,
}

impl ColorFingerprint {
    pub fn draw(rng: &mut StdRng) -> Self {
        Self {
            brightness: rng.gen_range(-0.02..=0.02),
            contrast: 1.0 + rng.gen_range(-0.03..=0.03),
            saturation: 1.0 + rng.gen_range(-0.05..=0.05),
            gamma: 1.0 + rng.gen_range(-0.02..=0.02),
        }
    }

    fn to_eq_filter(self) -> String {
        format!(
            "eq=brightness={:.4}:contrast={:.4}:saturation={:.4}:gamma={:.4}",
            self.brightness, self.contrast, self.saturation, self.gamma
        )
    }
}

/// Compute the largest centered 9:16 crop that fits the source frame.
/// Dimensions are floored to even values for macroblock alignment.
pub fn smart_crop(src_width: u32, src_height: u32) -> (u32, u32) {
    let target_ratio = OUTPUT_WIDTH as f64 / OUTPUT_HEIGHT as f64;
    let source_ratio = src_width as f64 / src_height as f64;

    let (crop_w, crop_h) = if source_ratio > target_ratio {
        // Wider than 9:16: keep full height, crop width
        ((src_height as f64 * target_ratio) as u32, src_height)
    } else {
        // Taller or equal: keep full width, crop height
        (src_width, (src_width as f64 / target_ratio) as u32)
    };

    (crop_w & !1, crop_h & !1)
}

/// The assembled per-clip transform plan handed to the encode engine
#[derive(Debug, Clone)]
pub struct FilterPlan {
    video_filters: Vec<String>,
    /// atempo argument matching the setpts speed rescale, if any
    pub audio_filter: Option<String>,
    pub fingerprint: ColorFingerprint,
}

impl FilterPlan {
    /// Build the ordered transform chain for one clip.
    ///
    /// Order is fixed: speed rescale, smart crop, scale to 1080x1920, eased
    /// zoom, color fingerprint, grain. Caption overlays are appended later
    /// by the compositor.
    pub fn build(
        config: &CutConfig,
        src_width: u32,
        src_height: u32,
        clip_duration: f64,
        rng: &mut StdRng,
    ) -> Self {
        let mut filters = Vec::new();

        if (config.speed - 1.0).abs() > f64::EPSILON {
            filters.push(format!("setpts={:.6}*PTS", 1.0 / config.speed));
        }

        let (crop_w, crop_h) = smart_crop(src_width, src_height);
        filters.push(format!(
            "crop={}:{}:(iw-{})/2:(ih-{})/2",
            crop_w, crop_h, crop_w, crop_h
        ));

        filters.push(format!(
            "scale={}:{}:flags=lanczos,setsar=1",
            OUTPUT_WIDTH, OUTPUT_HEIGHT
        ));

        if config.zoom_intensity > 0 {
            let amplitude = config.zoom_intensity.min(100) as f64 / 100.0 * MAX_ZOOM_AMPLITUDE;
            // Playback duration shrinks by the speed factor
            let played = (clip_duration / config.speed).max(0.1);
            let frames = ((played * ZOOM_FPS as f64) as u64).max(1);
            // Sine ease from 0 to the full amplitude avoids a visible jump
            // at either end of the clip
            filters.push(format!(
                "zoompan=z='1+{:.4}*sin(on/{}*PI/2)':d=1:\
                 x='iw/2-(iw/zoom/2)':y='ih/2-(ih/zoom/2)':s={}x{}:fps={}",
                amplitude, frames, OUTPUT_WIDTH, OUTPUT_HEIGHT, ZOOM_FPS
            ));
        }

        let fingerprint = ColorFingerprint::draw(rng);
        filters.push(fingerprint.to_eq_filter());

        // Temporally-varying grain, low enough to stay invisible
        filters.push("noise=alls=6:allf=t".to_string());

        let audio_filter = if (config.speed - 1.0).abs() > f64::EPSILON {
            Some(format!("atempo={:.3}", config.speed))
        } else {
            None
        };

        Self {
            video_filters: filters,
            audio_filter,
            fingerprint,
        }
    }

    /// Comma-joined base chain, optionally extended with caption filters
    pub fn video_chain(&self, extra_filters: &[String]) -> String {
        let mut parts = self.video_filters.clone();
        parts.extend(extra_filters.iter().cloned());
        parts.join(",")
    }
}

/// Pick the fixed caption text for a clip, when not speech-derived
pub fn select_hook_text(style: CaptionStyle, clip_index: usize, custom_text: &str) -> Option<String> {
    match style {
        CaptionStyle::Hooks => Some(HOOK_POOL[clip_index % HOOK_POOL.len()].to_string()),
        CaptionStyle::Part => Some(format!("Part {}", clip_index + 1)),
        CaptionStyle::Custom => {
            let text = custom_text.trim();
            if text.is_empty() {
                None
            } else {
                Some(text.to_string())
            }
        }
        CaptionStyle::Transcript | CaptionStyle::Smart => None,
    }
}
