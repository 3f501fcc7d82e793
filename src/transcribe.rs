//! Transcription service client
//! Sends clip-window audio to the external speech-to-text collaborator and
//! receives word-level timestamps. The service makes no latency or
//! determinism promises; empty word lists are a valid non-error outcome.

use anyhow::{anyhow, Context, Result};
use base64::Engine as _;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::types::WordTimestamp;

/// Request payload: base64 PCM/WAV audio plus a language hint
#[derive(Debug, Serialize)]
struct TranscriptionRequest<'a> {
    audio: String,
    language: &'a str,
}

/// Transcription result for one clip window
#[derive(Debug, Clone, Deserialize)]
pub struct TranscriptionResponse {
    pub success: bool,
    #[serde(default)]
    pub transcription: String,
    #[serde(default)]
    pub words: Vec<WordTimestamp>,
    #[serde(default)]
    pub language: String,
}

pub struct TranscriptionClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl TranscriptionClient {
    pub fn new(endpoint: String, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            api_key,
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.endpoint.trim().is_empty()
    }

    /// Transcribe one clip window of 16kHz mono WAV audio.
    /// Timestamps in the response are relative to the window start, which
    /// matches the clip-relative frame captions are rendered in.
    pub async fn transcribe_window(
        &self,
        wav_bytes: &[u8],
        language: &str,
    ) -> Result<TranscriptionResponse> {
        if !self.is_configured() {
            return Err(anyhow!("No transcription endpoint configured"));
        }

        let payload = TranscriptionRequest {
            audio: base64::engine::general_purpose::STANDARD.encode(wav_bytes),
            language,
        };

        let mut request = self.client.post(&self.endpoint).json(&payload);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .context("Transcription service request failed")?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "Transcription service returned HTTP {}",
                response.status()
            ));
        }

        let body: TranscriptionResponse = response
            .json()
            .await
            .context("Failed to parse transcription response")?;

        if !body.success {
            return Err(anyhow!("Transcription service reported failure"));
        }

        debug!(
            "Transcribed window: {} words, language '{}'",
            body.words.len(),
            body.language
        );
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unconfigured_client_is_detected() {
        let client = TranscriptionClient::new(String::new(), None);
        assert!(!client.is_configured());
        let client = TranscriptionClient::new("http://localhost:9999/stt".to_string(), None);
        assert!(client.is_configured());
    }

    #[test]
    fn test_response_parsing_with_words() {
        let json = r#"{
            "success": true,
            "transcription": "hello world",
            "words": [
                {"word": "hello", "start": 0.1, "end": 0.4, "confidence": 0.98},
                {"word": "world", "start": 0.5, "end": 0.9, "confidence": 0.95}
            ],
            "language": "en"
        }"#;
        let parsed: TranscriptionResponse = serde_json::from_str(json).unwrap();
        assert!(parsed.success);
        assert_eq!(parsed.words.len(), 2);
        assert_eq!(parsed.words[0].word, "hello");
        assert_eq!(parsed.language, "en");
    }

    #[test]
    fn test_empty_result_is_valid() {
        // No speech in the window is not an error
        let json = r#"{"success": true}"#;
        let parsed: TranscriptionResponse = serde_json::from_str(json).unwrap();
        assert!(parsed.success);
        assert!(parsed.words.is_empty());
        assert!(parsed.transcription.is_empty());
    }

    #[test]
    fn test_missing_confidence_defaults() {
        let json = r#"{
            "success": true,
            "words": [{"word": "hi", "start": 0.0, "end": 0.3}]
        }"#;
        let parsed: TranscriptionResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.words[0].confidence, 0.0);
    }
}
