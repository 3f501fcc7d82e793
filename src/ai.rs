//! Smart-caption generation client
//! Optional best-effort collaborator that proposes a rehook line and caption
//! phrasing for a clip from its transcript. Any service error degrades to a
//! locally synthesized fallback; it never fails a run.

use anyhow::{anyhow, Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};

use crate::types::{CaptionSegment, WordTimestamp};

/// Words taken from the transcript head when synthesizing a fallback rehook
const FALLBACK_HOOK_WORDS: usize = 5;

#[derive(Debug, Serialize)]
struct SmartCaptionRequest<'a> {
    transcript: &'a str,
    start_time: f64,
    end_time: f64,
    language: &'a str,
    max_captions: usize,
}

/// Service response: proposed captions plus an optional rehook and
/// suggested trim adjustments
#[derive(Debug, Clone, Deserialize)]
pub struct SmartCaptionResponse {
    #[serde(default)]
    pub captions: Vec<CaptionSegment>,
    #[serde(default)]
    pub rehook: Option<String>,
    #[serde(default)]
    pub suggested_start_time: Option<f64>,
    #[serde(default)]
    pub suggested_end_time: Option<f64>,
}

pub struct SmartCaptionClient {
    client: reqwest::Client,
    endpoint: Option<String>,
}

impl SmartCaptionClient {
    pub fn new(endpoint: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
        }
    }

    async fn request_captions(
        &self,
        transcript: &str,
        start_time: f64,
        end_time: f64,
        language: &str,
    ) -> Result<SmartCaptionResponse> {
        let endpoint = self
            .endpoint
            .as_deref()
            .filter(|e| !e.trim().is_empty())
            .ok_or_else(|| anyhow!("No smart-caption endpoint configured"))?;

        let payload = SmartCaptionRequest {
            transcript,
            start_time,
            end_time,
            language,
            max_captions: 10,
        };

        let response = self
            .client
            .post(endpoint)
            .json(&payload)
            .send()
            .await
            .context("Smart-caption service request failed")?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "Smart-caption service returned HTTP {}",
                response.status()
            ));
        }

        response
            .json()
            .await
            .context("Failed to parse smart-caption response")
    }

    /// Ask the service for a rehook, falling back to a line synthesized
    /// from the transcript head when the service is missing or errors
    pub async fn rehook_or_fallback(
        &self,
        transcript: &str,
        words: &[WordTimestamp],
        start_time: f64,
        end_time: f64,
        language: &str,
    ) -> Option<String> {
        match self
            .request_captions(transcript, start_time, end_time, language)
            .await
        {
            Ok(response) => response
                .rehook
                .filter(|r| !r.trim().is_empty())
                .or_else(|| synthesize_rehook(words)),
            Err(e) => {
                warn!("Smart-caption service unavailable ({}), using fallback", e);
                synthesize_rehook(words)
            }
        }
    }
}

/// Local fallback: the clip's opening words, uppercased, with an ellipsis
/// when the sentence continues
fn synthesize_rehook(words: &[WordTimestamp]) -> Option<String> {
    if words.is_empty() {
        return None;
    }

    let head: Vec<&str> = words
        .iter()
        .take(FALLBACK_HOOK_WORDS)
        .map(|w| w.word.trim())
        .filter(|w| !w.is_empty())
        .collect();
    if head.is_empty() {
        return None;
    }

    let mut hook = head.join(" ").to_uppercase();
    if words.len() > FALLBACK_HOOK_WORDS && !hook.ends_with(['.', '!', '?']) {
        hook.push_str("...");
    }
    Some(hook)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(text: &str, start: f64) -> WordTimestamp {
        WordTimestamp {
            word: text.to_string(),
            start,
            end: start + 0.2,
            confidence: 0.9,
        }
    }

    #[test]
    fn test_synthesize_rehook_from_transcript_head() {
        let words: Vec<WordTimestamp> = ["this", "is", "the", "craziest", "thing", "ever"]
            .iter()
            .enumerate()
            .map(|(i, w)| word(w, i as f64 * 0.3))
            .collect();
        let hook = synthesize_rehook(&words).unwrap();
        assert_eq!(hook, "THIS IS THE CRAZIEST THING...");
    }

    #[test]
    fn test_short_transcript_gets_no_ellipsis() {
        let words = vec![word("incredible", 0.0)];
        assert_eq!(synthesize_rehook(&words).unwrap(), "INCREDIBLE");
    }

    #[test]
    fn test_empty_transcript_yields_no_hook() {
        assert!(synthesize_rehook(&[]).is_none());
        let blank = vec![word("  ", 0.0)];
        assert!(synthesize_rehook(&blank).is_none());
    }

    #[test]
    fn test_response_parsing() {
        let json = r#"{
            "captions": [{"text": "hello", "start": 0.0, "end": 1.0}],
            "rehook": "WAIT FOR IT",
            "suggested_start_time": 12.5,
            "suggested_end_time": 42.5
        }"#;
        let parsed: SmartCaptionResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.captions.len(), 1);
        assert_eq!(parsed.rehook.as_deref(), Some("WAIT FOR IT"));
        assert_eq!(parsed.suggested_start_time, Some(12.5));
    }

    #[test]
    fn test_sparse_response_parses() {
        let parsed: SmartCaptionResponse = serde_json::from_str("{}").unwrap();
        assert!(parsed.captions.is_empty());
        assert!(parsed.rehook.is_none());
    }
}
