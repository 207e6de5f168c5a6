//! Text-to-speech through OpenAI's `/audio/speech` endpoint.

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use voicegate_core::config::TtsConfig;
use voicegate_core::error::{Result, VoiceGateError};

use crate::{Synthesizer, error_body, http_client};

pub struct OpenAiSynthesizer {
    base_url: String,
    model: String,
    voice: String,
    format: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    voice: &'a str,
    input: &'a str,
    response_format: &'a str,
}

impl OpenAiSynthesizer {
    pub fn from_config(config: &TtsConfig) -> Result<Self> {
        Ok(Self {
            base_url: config.effective_base_url(),
            model: config.model.clone(),
            voice: config.voice.clone(),
            format: config.format.clone(),
            api_key: config.resolve_api_key(),
            client: http_client("speech", config.request_timeout_secs)?,
        })
    }
}

#[async_trait]
impl Synthesizer for OpenAiSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Option<Vec<u8>>> {
        if text.trim().is_empty() {
            return Ok(None);
        }
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| VoiceGateError::synthesis("no API key configured"))?;

        let response = self
            .client
            .post(format!("{}/audio/speech", self.base_url))
            .bearer_auth(api_key)
            .json(&SpeechRequest {
                model: &self.model,
                voice: &self.voice,
                input: text,
                response_format: &self.format,
            })
            .send()
            .await
            .map_err(|e| VoiceGateError::synthesis(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = error_body(response).await;
            return Err(VoiceGateError::synthesis(format!("status {status}: {body}")));
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| VoiceGateError::synthesis(e.to_string()))?;
        debug!(voice = %self.voice, bytes = audio.len(), "speech synthesized");

        if audio.is_empty() {
            return Ok(None);
        }
        Ok(Some(audio.to_vec()))
    }
}
