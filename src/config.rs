//! Configuration management for ShortForge
//! Handles run parameters (CutConfig/CaptionConfig) and settings.json

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Playback-speed bounds the audio tempo filter can apply in a single pass.
/// Values outside this range are rejected at validation time instead of being
/// silently ignored.
pub const SPEED_MIN: f64 = 0.5;
pub const SPEED_MAX: f64 = 2.0;

/// Where caption text is rendered in a clip
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CaptionPosition {
    Top,
    Center,
    Bottom,
}

impl Default for CaptionPosition {
    fn default() -> Self {
        CaptionPosition::Bottom
    }
}

/// Source of the caption text for each clip
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CaptionStyle {
    /// Cycle a fixed pool of hook phrases by clip index
    Hooks,
    /// Format "Part {n}" per clip
    Part,
    /// User-supplied custom text
    Custom,
    /// Speech-derived captions from the transcription service
    Transcript,
    /// Transcript captions plus an AI-generated rehook line
    Smart,
}

impl Default for CaptionStyle {
    fn default() -> Self {
        CaptionStyle::Hooks
    }
}

/// User-chosen parameters for one cutting run
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CutConfig {
    /// Target clip duration in seconds
    #[serde(default = "default_clip_duration")]
    pub clip_duration: f64,
    /// Desired number of clips
    #[serde(default = "default_clip_count")]
    pub clip_count: usize,
    /// Playback-speed multiplier (0.5 - 2.0)
    #[serde(default = "default_speed")]
    pub speed: f64,
    /// Ken-Burns zoom intensity (0-100)
    #[serde(default)]
    pub zoom_intensity: u32,
    /// Whether caption overlays are rendered at all
    #[serde(default)]
    pub captions_enabled: bool,
    #[serde(default)]
    pub caption_style: CaptionStyle,
    /// Text used when caption_style is "custom"
    #[serde(default)]
    pub custom_text: String,
}

fn default_clip_duration() -> f64 {
    30.0
}

fn default_clip_count() -> usize {
    3
}

fn default_speed() -> f64 {
    1.0
}

impl Default for CutConfig {
    fn default() -> Self {
        Self {
            clip_duration: 30.0,
            clip_count: 3,
            speed: 1.0,
            zoom_intensity: 0,
            captions_enabled: false,
            caption_style: CaptionStyle::Hooks,
            custom_text: String::new(),
        }
    }
}

impl CutConfig {
    /// Validate run parameters before the pipeline starts
    pub fn validate(&self) -> Result<()> {
        if self.clip_duration <= 0.0 {
            return Err(anyhow!("Clip duration must be greater than zero"));
        }
        if self.clip_count < 1 {
            return Err(anyhow!("Clip count must be at least 1"));
        }
        if !(SPEED_MIN..=SPEED_MAX).contains(&self.speed) {
            return Err(anyhow!(
                "Speed multiplier {} is outside the supported range {}-{}",
                self.speed,
                SPEED_MIN,
                SPEED_MAX
            ));
        }
        if self.zoom_intensity > 100 {
            return Err(anyhow!("Zoom intensity must be between 0 and 100"));
        }
        if self.caption_style == CaptionStyle::Custom && self.custom_text.trim().is_empty() {
            return Err(anyhow!("Custom caption style requires custom_text"));
        }
        Ok(())
    }
}

/// Visual configuration for caption rendering
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CaptionConfig {
    #[serde(default)]
    pub position: CaptionPosition,
    /// Primary caption color (named or #RRGGBB)
    #[serde(default = "default_primary_color")]
    pub primary_color: String,
    /// Hook text color, falls back to primary when absent
    #[serde(default)]
    pub highlight_color: Option<String>,
    /// Transcription language hint: "pt", "en" or "auto"
    #[serde(default = "default_language")]
    pub language: String,
    /// When true a clip render only counts as failed after every caption
    /// strategy has been exhausted
    #[serde(default)]
    pub required: bool,
}

fn default_primary_color() -> String {
    "white".to_string()
}

fn default_language() -> String {
    "auto".to_string()
}

impl Default for CaptionConfig {
    fn default() -> Self {
        Self {
            position: CaptionPosition::Bottom,
            primary_color: default_primary_color(),
            highlight_color: Some("yellow".to_string()),
            language: default_language(),
            required: false,
        }
    }
}

/// Application configuration stored in settings.json
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AppConfig {
    /// Default output directory for generated clips
    pub default_output_dir: String,
    /// Transcription service endpoint (word-level timestamps)
    #[serde(default)]
    pub transcription_endpoint: String,
    /// Optional API key sent as a bearer token to the transcription service
    #[serde(default)]
    pub transcription_api_key: Option<String>,
    /// Optional smart-caption generation endpoint
    #[serde(default)]
    pub caption_ai_endpoint: Option<String>,
    /// Explicit font file for drawtext overlays; autodetected when empty
    #[serde(default)]
    pub font_path: Option<String>,
    /// Keep the engine working directory after a run (debugging)
    #[serde(default)]
    pub keep_workdir: bool,
}

impl AppConfig {
    /// Configuration file name
    const CONFIG_PATH: &'static str = "settings.json";

    /// Load configuration from file, or defaults when the file is missing
    pub fn load() -> Result<Self> {
        if !Path::new(Self::CONFIG_PATH).exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(Self::CONFIG_PATH)?;
        let config: AppConfig = serde_json::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse settings.json: {}", e))?;
        Ok(config)
    }

    /// Create a default configuration file
    pub fn create_default() -> Result<()> {
        let json = serde_json::to_string_pretty(&Self::default())?;
        fs::write(Self::CONFIG_PATH, json)?;
        Ok(())
    }

    /// Ensure output directory exists
    pub fn ensure_output_dir(&self) -> Result<()> {
        if !Path::new(&self.default_output_dir).exists() {
            fs::create_dir_all(&self.default_output_dir)?;
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            default_output_dir: "./output".to_string(),
            transcription_endpoint: String::new(),
            transcription_api_key: None,
            caption_ai_endpoint: None,
            font_path: None,
            keep_workdir: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cut_config_defaults_valid() {
        assert!(CutConfig::default().validate().is_ok());
    }

    #[test]
    fn test_speed_out_of_range_rejected() {
        let mut config = CutConfig::default();
        config.speed = 2.5;
        assert!(config.validate().is_err());
        config.speed = 0.4;
        assert!(config.validate().is_err());
        config.speed = 2.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_duration_rejected() {
        let mut config = CutConfig::default();
        config.clip_duration = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_custom_style_requires_text() {
        let mut config = CutConfig::default();
        config.caption_style = CaptionStyle::Custom;
        assert!(config.validate().is_err());
        config.custom_text = "MY CHANNEL".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let config = CutConfig {
            clip_duration: 45.0,
            clip_count: 5,
            speed: 1.25,
            zoom_intensity: 40,
            captions_enabled: true,
            caption_style: CaptionStyle::Part,
            custom_text: String::new(),
        };
        let json = serde_json::to_string(&config).unwrap();
        let parsed: CutConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.clip_count, 5);
        assert_eq!(parsed.caption_style, CaptionStyle::Part);
    }

    #[test]
    fn test_caption_config_defaults() {
        let config = CaptionConfig::default();
        assert_eq!(config.position, CaptionPosition::Bottom);
        assert_eq!(config.primary_color, "white");
        assert!(!config.required);
    }
}
