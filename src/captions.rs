//! Caption model, normalization, and overlay text generation
//! Builds the drawtext directives for the native strategies and the ASS
//! subtitle document for the rasterized fallback strategy.

use crate::config::CaptionPosition;
use crate::types::CaptionSegment;

/// Minimum visible duration for a caption segment, in seconds
pub const MIN_SEGMENT_SECS: f64 = 0.08;

/// Maximum number of caption overlay events per clip; larger inputs are
/// merged down to fit
pub const MAX_OVERLAY_EVENTS: usize = 15;

/// Seconds the hook text stays on screen at the start of a clip
pub const HOOK_DISPLAY_SECS: f64 = 1.2;

/// Characters known to break the drawtext expression parser; stripped by
/// the restricted-charset strategy
const DRAWTEXT_UNSAFE: &[char] = &['[', ']', '"', '<', '>'];

/// Caption input for one clip render
#[derive(Debug, Clone)]
pub struct CaptionInput {
    /// Clip duration in seconds; segments are clamped into [0, duration]
    pub duration: f64,
    pub position: CaptionPosition,
    pub primary_color: String,
    pub highlight_color: Option<String>,
    /// Attention hook shown during the clip's first ~1.2 seconds
    pub hook_text: Option<String>,
    pub segments: Vec<CaptionSegment>,
}

impl CaptionInput {
    /// Normalized segments ready for rendering
    pub fn normalized(&self) -> Vec<CaptionSegment> {
        normalize_segments(&self.segments, self.duration)
    }

    /// True when normalization leaves no renderable caption content at all
    pub fn is_empty(&self) -> bool {
        self.normalized().is_empty()
            && self
                .hook_text
                .as_deref()
                .map(|t| t.trim().is_empty())
                .unwrap_or(true)
    }
}

/// Strip BOM and control characters from caption text
fn clean_text(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_control() && *c != '\u{feff}')
        .collect::<String>()
        .trim()
        .to_string()
}

/// Clamp, clean, sort, and de-overlap caption segments.
///
/// Segments are clamped into `[0, duration]`, text is stripped of BOM and
/// control characters, entries shorter than the minimum visible duration
/// are dropped, and overlap is resolved by advancing the later segment's
/// start to the earlier one's end (dropping it when that collapses it).
/// Idempotent: normalizing an already-normalized list is a no-op.
pub fn normalize_segments(segments: &[CaptionSegment], duration: f64) -> Vec<CaptionSegment> {
    let mut cleaned: Vec<CaptionSegment> = segments
        .iter()
        .filter_map(|seg| {
            let text = clean_text(&seg.text);
            if text.is_empty() {
                return None;
            }
            let start = seg.start.max(0.0).min(duration);
            let end = seg.end.max(0.0).min(duration);
            if end - start < MIN_SEGMENT_SECS {
                return None;
            }
            Some(CaptionSegment { text, start, end })
        })
        .collect();

    cleaned.sort_by(|a, b| a.start.total_cmp(&b.start));

    let mut result: Vec<CaptionSegment> = Vec::with_capacity(cleaned.len());
    for mut seg in cleaned {
        if let Some(prev) = result.last() {
            if seg.start < prev.end {
                seg.start = prev.end;
                if seg.end - seg.start < MIN_SEGMENT_SECS {
                    continue;
                }
            }
        }
        result.push(seg);
    }

    result
}

/// Merge adjacent segments until the list fits the overlay budget
pub fn merge_to_budget(segments: &[CaptionSegment], budget: usize) -> Vec<CaptionSegment> {
    if budget == 0 || segments.len() <= budget {
        return segments.to_vec();
    }

    let group_size = segments.len().div_ceil(budget);
    segments
        .chunks(group_size)
        .map(|group| CaptionSegment {
            text: group
                .iter()
                .map(|s| s.text.as_str())
                .collect::<Vec<_>>()
                .join(" "),
            start: group[0].start,
            end: group[group.len() - 1].end,
        })
        .collect()
}

/// Escape text for use inside a quoted drawtext `text='...'` argument
fn escape_drawtext(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('\'', "'\\''")
        .replace(':', "\\:")
        .replace('%', "\\%")
        .replace(',', "\\,")
        .replace(';', "\\;")
}

/// Drop the characters the drawtext parser chokes on, then escape
fn escape_drawtext_restricted(text: &str) -> String {
    let stripped: String = text.chars().filter(|c| !DRAWTEXT_UNSAFE.contains(c)).collect();
    escape_drawtext(&stripped)
}

/// Vertical anchor expression for a caption position
fn position_y(position: CaptionPosition) -> &'static str {
    match position {
        CaptionPosition::Top => "h*0.12",
        CaptionPosition::Center => "h*0.52",
        CaptionPosition::Bottom => "h*0.82",
    }
}

/// Build one drawtext directive per caption segment plus one for the hook.
///
/// `restricted` selects the conservative variant: unsafe characters
/// stripped, slightly smaller font and border.
pub fn build_drawtext_directives(
    input: &CaptionInput,
    font_file: &str,
    restricted: bool,
) -> Vec<String> {
    let (font_size, hook_size, border) = if restricted { (48, 56, 2) } else { (52, 60, 3) };
    let escape: fn(&str) -> String = if restricted {
        escape_drawtext_restricted
    } else {
        escape_drawtext
    };

    let mut directives = Vec::new();

    for seg in input.normalized() {
        directives.push(format!(
            "drawtext=fontfile={}:text='{}':fontsize={}:fontcolor={}:\
             borderw={}:bordercolor=black:x=(w-text_w)/2:y={}:\
             enable='between(t\\,{:.3}\\,{:.3})'",
            font_file,
            escape(&seg.text),
            font_size,
            input.primary_color,
            border,
            position_y(input.position),
            seg.start,
            seg.end
        ));
    }

    if let Some(hook) = input.hook_text.as_deref() {
        let hook = hook.trim();
        if !hook.is_empty() {
            let color = input
                .highlight_color
                .as_deref()
                .unwrap_or(&input.primary_color);
            directives.push(format!(
                "drawtext=fontfile={}:text='{}':fontsize={}:fontcolor={}:\
                 borderw={}:bordercolor=black:x=(w-text_w)/2:y=h*0.15:\
                 enable='between(t\\,0\\,{:.3})'",
                font_file,
                escape(&hook.to_uppercase()),
                hook_size,
                color,
                border,
                HOOK_DISPLAY_SECS
            ));
        }
    }

    directives
}

/// Convert "#RRGGBB" (or a handful of named colors) to the ASS &HAABBGGRR form
fn ass_color(color: &str) -> String {
    let hex = match color.to_lowercase().as_str() {
        "white" => "ffffff".to_string(),
        "black" => "000000".to_string(),
        "yellow" => "ffff00".to_string(),
        "red" => "ff0000".to_string(),
        other => other.trim_start_matches('#').to_string(),
    };

    if hex.len() == 6 {
        if let (Ok(r), Ok(g), Ok(b)) = (
            u8::from_str_radix(&hex[0..2], 16),
            u8::from_str_radix(&hex[2..4], 16),
            u8::from_str_radix(&hex[4..6], 16),
        ) {
            return format!("&H00{:02X}{:02X}{:02X}", b, g, r);
        }
    }
    "&H00FFFFFF".to_string()
}

/// ASS numpad alignment for a caption position (center column)
fn ass_alignment(position: CaptionPosition) -> u8 {
    match position {
        CaptionPosition::Top => 8,
        CaptionPosition::Center => 5,
        CaptionPosition::Bottom => 2,
    }
}

/// Format seconds as an ASS timestamp (H:MM:SS.CC)
fn format_ass_timestamp(seconds: f64) -> String {
    let total_cs = (seconds.max(0.0) * 100.0).round() as i64;
    let cs = total_cs % 100;
    let total_seconds = total_cs / 100;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let secs = total_seconds % 60;
    format!("{}:{:02}:{:02}.{:02}", hours, minutes, secs, cs)
}

/// Escape caption text for an ASS dialogue line
fn escape_ass(text: &str) -> String {
    text.replace('{', "(").replace('}', ")").replace('\n', "\\N")
}

/// Render the caption input as a complete ASS subtitle document sized to
/// the canonical 1080x1920 frame. Used by the rasterized overlay strategy:
/// libass draws the bitmaps, so none of the drawtext parsing rules apply.
/// Returns None when there are no events to render.
pub fn build_ass_document(input: &CaptionInput) -> Option<String> {
    let segments = merge_to_budget(&input.normalized(), MAX_OVERLAY_EVENTS);
    let hook = input
        .hook_text
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty());

    if segments.is_empty() && hook.is_none() {
        return None;
    }

    let primary = ass_color(&input.primary_color);
    let highlight = input
        .highlight_color
        .as_deref()
        .map(ass_color)
        .unwrap_or_else(|| primary.clone());

    let mut content = String::new();
    content.push_str("[Script Info]\r\n");
    content.push_str("Title: ShortForge Captions\r\n");
    content.push_str("ScriptType: v4.00+\r\n");
    content.push_str("PlayResX: 1080\r\n");
    content.push_str("PlayResY: 1920\r\n");
    content.push_str("WrapStyle: 0\r\n");
    content.push_str("\r\n");

    content.push_str("[V4+ Styles]\r\n");
    content.push_str("Format: Name, Fontname, Fontsize, PrimaryColour, SecondaryColour, OutlineColour, BackColour, Bold, Italic, Underline, StrikeOut, ScaleX, ScaleY, Spacing, Angle, BorderStyle, Outline, Shadow, Alignment, MarginL, MarginR, MarginV, Encoding\r\n");
    content.push_str(&format!(
        "Style: Default,Arial,72,{},&H000000FF,&H00000000,&H80000000,1,0,0,0,100,100,0,0,1,4,2,{},40,40,120,1\r\n",
        primary,
        ass_alignment(input.position)
    ));
    content.push_str(&format!(
        "Style: Hook,Arial,84,{},&H000000FF,&H00000000,&H80000000,1,0,0,0,100,100,0,0,1,4,2,8,40,40,260,1\r\n",
        highlight
    ));
    content.push_str("\r\n");

    content.push_str("[Events]\r\n");
    content.push_str(
        "Format: Layer, Start, End, Style, Name, MarginL, MarginR, MarginV, Effect, Text\r\n",
    );

    if let Some(hook) = hook {
        content.push_str(&format!(
            "Dialogue: 1,{},{},Hook,,0,0,0,,{}\r\n",
            format_ass_timestamp(0.0),
            format_ass_timestamp(HOOK_DISPLAY_SECS.min(input.duration)),
            escape_ass(&hook.to_uppercase())
        ));
    }

    for seg in &segments {
        content.push_str(&format!(
            "Dialogue: 0,{},{},Default,,0,0,0,,{}\r\n",
            format_ass_timestamp(seg.start),
            format_ass_timestamp(seg.end),
            escape_ass(&seg.text)
        ));
    }

    Some(content)
}
