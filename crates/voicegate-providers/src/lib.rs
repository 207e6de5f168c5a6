//! External collaborators reached by each recognition unit.
//!
//! Every collaborator sits behind a narrow async trait so the gateway can be
//! driven with in-memory doubles. The HTTP implementations are built once at
//! startup and shared through [`Services`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use voicegate_core::config::Config;
use voicegate_core::error::Result;

pub mod analysis;
pub mod backend;
pub mod speech;
pub mod transcription;

pub use analysis::ChatAnalyzer;
pub use backend::HttpBackend;
pub use speech::OpenAiSynthesizer;
pub use transcription::WhisperTranscriber;

/// Refined text produced from a raw transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Analysis {
    pub text: String,
}

/// Body of the backend notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendRequest {
    pub summoner_id: String,
    pub final_text: String,
    pub region: String,
}

/// Acknowledgement returned by the backend on a successful notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendAck {
    /// Text to speak back immediately.
    pub spell_check_message: String,
    pub champion_name: String,
    pub spell_name: String,
}

impl BackendAck {
    /// Parameters for the follow-up event tied to this acknowledgement.
    pub fn event_params(&self, summoner_id: &str) -> EventParams {
        EventParams {
            summoner_id: summoner_id.to_string(),
            champion_name: self.champion_name.clone(),
            spell_name: self.spell_name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventParams {
    pub summoner_id: String,
    pub champion_name: String,
    pub spell_name: String,
}

/// Follow-up event pushed by the backend once it fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendEvent {
    pub spell_cool_down_message: String,
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Turn normalized mono samples into text.
    async fn transcribe(&self, samples: &[f32], sample_rate: u32) -> Result<String>;
}

#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(&self, text: &str) -> Result<Analysis>;
}

#[async_trait]
pub trait Backend: Send + Sync {
    /// Report an analysis result. Only a 201 with a well-formed body is success.
    async fn notify(&self, request: &BackendRequest) -> Result<BackendAck>;

    /// Wait for the follow-up event. `Ok(None)` on timeout or a non-200 answer.
    async fn await_event(
        &self,
        params: &EventParams,
        timeout: Duration,
    ) -> Result<Option<BackendEvent>>;
}

#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Render text to audio. `Ok(None)` when the provider returned no audio.
    async fn synthesize(&self, text: &str) -> Result<Option<Vec<u8>>>;
}

/// Process-wide collaborator handles, cheap to clone into each unit.
#[derive(Clone)]
pub struct Services {
    pub transcriber: Arc<dyn Transcriber>,
    pub analyzer: Arc<dyn Analyzer>,
    pub backend: Arc<dyn Backend>,
    pub synthesizer: Arc<dyn Synthesizer>,
    /// How long a unit waits for the backend follow-up event.
    pub event_timeout: Duration,
}

impl Services {
    /// Build the HTTP-backed collaborators described by `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let backend_config = config.backend();
        Ok(Self {
            transcriber: Arc::new(WhisperTranscriber::from_config(&config.transcription())?),
            analyzer: Arc::new(ChatAnalyzer::from_config(&config.analysis())?),
            backend: Arc::new(HttpBackend::from_config(&backend_config)?),
            synthesizer: Arc::new(OpenAiSynthesizer::from_config(&config.tts())?),
            event_timeout: Duration::from_secs(backend_config.event_timeout_secs),
        })
    }
}

/// HTTP client whose requests give up after `timeout_secs`.
pub(crate) fn http_client(name: &str, timeout_secs: u64) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .with_context(|| format!("building {name} HTTP client"))?;
    Ok(client)
}

/// Read an error response body for logging, capped so large pages stay readable.
pub(crate) async fn error_body(response: reqwest::Response) -> String {
    let mut body = response.text().await.unwrap_or_default();
    if body.len() > 512 {
        let mut cut = 512;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    body
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_ack_wire_names() {
        let ack: BackendAck = serde_json::from_str(
            r#"{"spellCheckMessage":"Flash checked","championName":"Ahri","spellName":"Flash"}"#,
        )
        .unwrap();
        assert_eq!(ack.champion_name, "Ahri");

        let params = ack.event_params("4545");
        let json = serde_json::to_value(&params).unwrap();
        assert_eq!(json["summonerId"], "4545");
        assert_eq!(json["spellName"], "Flash");
    }

    #[test]
    fn test_backend_ack_missing_field_rejected() {
        let parsed: std::result::Result<BackendAck, _> =
            serde_json::from_str(r#"{"spellCheckMessage":"x","championName":"Ahri"}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_services_from_default_config() {
        let services = Services::from_config(&Config::default()).unwrap();
        assert_eq!(services.event_timeout, Duration::from_secs(360));
    }
}
