//! Speech-to-text over an OpenAI-compatible `/audio/transcriptions` endpoint.
//!
//! Works with OpenAI (`whisper-1`) and Groq (`whisper-large-v3-turbo`).

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use voicegate_core::config::TranscriptionConfig;
use voicegate_core::error::{Result, VoiceGateError};
use voicegate_media::wav::encode_wav;

use crate::{Transcriber, error_body, http_client};

pub struct WhisperTranscriber {
    base_url: String,
    model: String,
    language: Option<String>,
    api_key: Option<String>,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

impl WhisperTranscriber {
    pub fn from_config(config: &TranscriptionConfig) -> Result<Self> {
        Ok(Self {
            base_url: config.effective_base_url(),
            model: config.effective_model(),
            language: config.language.clone(),
            api_key: config.resolve_api_key(),
            client: http_client("transcription", config.request_timeout_secs)?,
        })
    }

    pub fn endpoint(&self) -> String {
        format!("{}/audio/transcriptions", self.base_url)
    }
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    async fn transcribe(&self, samples: &[f32], sample_rate: u32) -> Result<String> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| VoiceGateError::transcription("no API key configured"))?;

        let wav = encode_wav(samples, sample_rate);
        debug!(model = %self.model, wav_bytes = wav.len(), "sending audio for transcription");

        let part = reqwest::multipart::Part::bytes(wav)
            .file_name("utterance.wav")
            .mime_str("audio/wav")
            .map_err(|e| VoiceGateError::transcription(e.to_string()))?;

        let mut form = reqwest::multipart::Form::new()
            .text("model", self.model.clone())
            .text("response_format", "json")
            .part("file", part);
        if let Some(language) = &self.language {
            form = form.text("language", language.clone());
        }

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| VoiceGateError::transcription(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = error_body(response).await;
            return Err(VoiceGateError::transcription(format!("status {status}: {body}")));
        }

        let parsed: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| VoiceGateError::transcription(format!("malformed response: {e}")))?;
        Ok(parsed.text.trim().to_string())
    }
}
