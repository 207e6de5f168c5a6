//! Transcript refinement through a chat completion.
//!
//! The raw transcript is substituted into a prompt template at `{raw_text}` and
//! the trimmed first choice becomes the analysis result.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use voicegate_core::config::AnalysisConfig;
use voicegate_core::error::{Result, VoiceGateError};

use crate::{Analysis, Analyzer, error_body, http_client};

/// Used when neither `prompt_file` nor `prompt` is configured.
pub const DEFAULT_PROMPT: &str = "\
The following text was transcribed from a League of Legends player's voice chat.
Identify the enemy champion and the summoner spell the player is reporting as used.
Speech recognition may have misheard names, so map them to the closest real champion
and spell (Flash, Ignite, Teleport, Heal, Barrier, Exhaust, Cleanse, Ghost, Smite).
Reply with exactly \"[champion name] [spell name]\" and nothing else.

Text: {raw_text}";

pub struct ChatAnalyzer {
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    template: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Substitute the transcript into a prompt template.
pub fn render_prompt(template: &str, raw_text: &str) -> String {
    template.replace("{raw_text}", raw_text)
}

impl ChatAnalyzer {
    /// Fails when a configured prompt file cannot be read.
    pub fn from_config(config: &AnalysisConfig) -> Result<Self> {
        let template = match (&config.prompt_file, &config.prompt) {
            (Some(path), _) => std::fs::read_to_string(path).map_err(|e| {
                VoiceGateError::Config(format!("cannot read prompt file {path}: {e}"))
            })?,
            (None, Some(inline)) => inline.clone(),
            (None, None) => DEFAULT_PROMPT.to_string(),
        };

        Ok(Self {
            base_url: config.effective_base_url(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            template,
            api_key: config.resolve_api_key(),
            client: http_client("analysis", config.request_timeout_secs)?,
        })
    }

    pub fn template(&self) -> &str {
        &self.template
    }
}

#[async_trait]
impl Analyzer for ChatAnalyzer {
    async fn analyze(&self, text: &str) -> Result<Analysis> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| VoiceGateError::analysis("no API key configured"))?;

        let prompt = render_prompt(&self.template, text);
        let body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: &prompt,
            }],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        debug!(model = %self.model, chars = text.len(), "requesting analysis");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| VoiceGateError::analysis(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = error_body(response).await;
            return Err(VoiceGateError::analysis(format!("status {status}: {body}")));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| VoiceGateError::analysis(format!("malformed response: {e}")))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| VoiceGateError::analysis("response had no choices"))?;

        Ok(Analysis {
            text: content.trim().to_string(),
        })
    }
}
