//! Configuration loading and validation.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, VoiceGateError};

/// Top-level voicegate configuration.
///
/// Every section is optional; the accessor methods fill in defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<GatewayConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub vad: Option<VadConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool: Option<PoolConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcription: Option<TranscriptionConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<AnalysisConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<BackendConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tts: Option<TtsConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

// --- Gateway ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_bind")]
    pub bind: String,

    /// WebSocket route (default: "/ws").
    #[serde(default = "default_ws_path")]
    pub path: String,

    /// Largest inbound WebSocket message accepted, in bytes.
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,

    /// Text message clients send to keep the connection alive. Ignored on receipt.
    #[serde(default = "default_keepalive_token")]
    pub keepalive_token: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
            path: default_ws_path(),
            max_message_bytes: default_max_message_bytes(),
            keepalive_token: default_keepalive_token(),
        }
    }
}

fn default_port() -> u16 {
    8888
}

fn default_bind() -> String {
    "0.0.0.0".into()
}

fn default_ws_path() -> String {
    "/ws".into()
}

fn default_max_message_bytes() -> usize {
    4 * 1024 * 1024
}

fn default_keepalive_token() -> String {
    "ping".into()
}

// --- Voice activity detection ---

/// Which speech classifier gates frames that already pass the volume threshold.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierKind {
    /// Volume threshold alone decides.
    Volume,
    /// RMS energy plus zero-crossing rate.
    Energy,
    /// WebRTC VAD in its most aggressive mode. Needs 8, 16, 32 or 48 kHz
    /// audio in 10, 20 or 30 ms frames.
    #[default]
    #[serde(rename = "webrtc")]
    WebRtc,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VadConfig {
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    #[serde(default = "default_frame_duration_ms")]
    pub frame_duration_ms: u32,

    /// Consecutive silent frames kept after speech; one more ends the utterance.
    #[serde(default = "default_silence_threshold_frames")]
    pub silence_threshold_frames: usize,

    /// Minimum peak amplitude (0.0..=1.0) for a frame to count as speech.
    #[serde(default = "default_volume_threshold")]
    pub volume_threshold: f32,

    #[serde(default)]
    pub classifier: ClassifierKind,

    /// RMS floor used by the energy classifier.
    #[serde(default = "default_energy_threshold")]
    pub energy_threshold: f32,

    /// Zero-crossing rate above which the energy classifier calls a frame noise.
    #[serde(default = "default_max_zero_crossing_rate")]
    pub max_zero_crossing_rate: f32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            frame_duration_ms: default_frame_duration_ms(),
            silence_threshold_frames: default_silence_threshold_frames(),
            volume_threshold: default_volume_threshold(),
            classifier: ClassifierKind::default(),
            energy_threshold: default_energy_threshold(),
            max_zero_crossing_rate: default_max_zero_crossing_rate(),
        }
    }
}

impl VadConfig {
    /// Samples per frame: `sample_rate * frame_duration_ms / 1000`.
    pub fn frame_size(&self) -> usize {
        (self.sample_rate as u64 * self.frame_duration_ms as u64 / 1000) as usize
    }
}

fn default_sample_rate() -> u32 {
    16_000
}

fn default_frame_duration_ms() -> u32 {
    30
}

fn default_silence_threshold_frames() -> usize {
    33
}

fn default_volume_threshold() -> f32 {
    0.7
}

fn default_energy_threshold() -> f32 {
    0.02
}

fn default_max_zero_crossing_rate() -> f32 {
    0.35
}

// --- Worker pool ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Units allowed to run at the same time.
    #[serde(default = "default_pool_size")]
    pub size: usize,

    /// Admitted units allowed to wait for a free slot. Beyond this, submissions are rejected.
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: default_pool_size(),
            queue_depth: default_queue_depth(),
        }
    }
}

fn default_pool_size() -> usize {
    11
}

fn default_queue_depth() -> usize {
    32
}

// --- Session ---

/// Fallback caller identity when the connection URL carries none.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_summoner_id")]
    pub default_summoner_id: String,

    #[serde(default = "default_region")]
    pub default_region: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_summoner_id: default_summoner_id(),
            default_region: default_region(),
        }
    }
}

fn default_summoner_id() -> String {
    "anonymous".into()
}

fn default_region() -> String {
    "KR".into()
}

// --- Collaborators ---

/// Speech-to-text configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    /// Provider: "openai" or "groq" (default: "openai").
    #[serde(default = "default_transcription_provider")]
    pub provider: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Model name; defaults per provider.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// ISO-639-1 hint passed to the provider.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    /// Per-request timeout; a stalled provider fails the unit instead of holding a pool slot.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            provider: default_transcription_provider(),
            api_key: None,
            api_key_env: None,
            base_url: None,
            model: None,
            language: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_transcription_provider() -> String {
    "openai".into()
}

impl TranscriptionConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        let fallback_env = match self.provider.as_str() {
            "groq" => "GROQ_API_KEY",
            _ => "OPENAI_API_KEY",
        };
        resolve_secret_field(
            &self.api_key,
            &Some(self.api_key_env.clone().unwrap_or_else(|| fallback_env.into())),
        )
    }

    pub fn effective_base_url(&self) -> String {
        if let Some(url) = &self.base_url {
            return url.trim_end_matches('/').to_string();
        }
        match self.provider.as_str() {
            "groq" => "https://api.groq.com/openai/v1".into(),
            _ => OPENAI_BASE_URL.into(),
        }
    }

    pub fn effective_model(&self) -> String {
        if let Some(model) = &self.model {
            return model.clone();
        }
        match self.provider.as_str() {
            "groq" => "whisper-large-v3-turbo".into(),
            _ => "whisper-1".into(),
        }
    }
}

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Text analysis (chat completion) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(default = "default_analysis_model")]
    pub model: String,

    #[serde(default = "default_analysis_temperature")]
    pub temperature: f32,

    #[serde(default = "default_analysis_max_tokens")]
    pub max_tokens: u32,

    /// Path to a prompt template file containing `{raw_text}`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_file: Option<String>,

    /// Inline prompt template; used when no `prompt_file` is set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,

    /// Per-request timeout; bounds the chat completion call.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_key_env: None,
            base_url: None,
            model: default_analysis_model(),
            temperature: default_analysis_temperature(),
            max_tokens: default_analysis_max_tokens(),
            prompt_file: None,
            prompt: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_analysis_model() -> String {
    "gpt-4".into()
}

fn default_analysis_temperature() -> f32 {
    0.3
}

fn default_analysis_max_tokens() -> u32 {
    100
}

impl AnalysisConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(
            &self.api_key,
            &Some(self.api_key_env.clone().unwrap_or_else(|| "OPENAI_API_KEY".into())),
        )
    }

    pub fn effective_base_url(&self) -> String {
        self.base_url
            .as_deref()
            .unwrap_or(OPENAI_BASE_URL)
            .trim_end_matches('/')
            .to_string()
    }
}

/// Upstream business backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_backend_url")]
    pub base_url: String,

    /// Timeout for the notify request.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// How long to wait for the follow-up event before giving up.
    #[serde(default = "default_event_timeout_secs")]
    pub event_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_backend_url(),
            request_timeout_secs: default_request_timeout_secs(),
            event_timeout_secs: default_event_timeout_secs(),
        }
    }
}

fn default_backend_url() -> String {
    "https://lolpago.com".into()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_event_timeout_secs() -> u64 {
    360
}

/// Text-to-speech configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(default = "default_tts_model")]
    pub model: String,

    #[serde(default = "default_tts_voice")]
    pub voice: String,

    /// Output format (e.g. "mp3", "opus").
    #[serde(default = "default_tts_format")]
    pub format: String,

    /// Per-request timeout; bounds the speech request.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_key_env: None,
            base_url: None,
            model: default_tts_model(),
            voice: default_tts_voice(),
            format: default_tts_format(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_tts_model() -> String {
    "tts-1".into()
}

fn default_tts_voice() -> String {
    "nova".into()
}

fn default_tts_format() -> String {
    "mp3".into()
}

impl TtsConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(
            &self.api_key,
            &Some(self.api_key_env.clone().unwrap_or_else(|| "OPENAI_API_KEY".into())),
        )
    }

    pub fn effective_base_url(&self) -> String {
        self.base_url
            .as_deref()
            .unwrap_or(OPENAI_BASE_URL)
            .trim_end_matches('/')
            .to_string()
    }
}

// --- Logging ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "voicegate_media=debug").
    #[serde(default)]
    pub filters: Vec<String>,

    /// Output target: "stderr" (default) or "stdout".
    #[serde(default = "default_log_output")]
    pub output: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: default_log_format(),
            level: None,
            filters: Vec::new(),
            output: default_log_output(),
        }
    }
}

fn default_log_format() -> String {
    "plain".into()
}

fn default_log_output() -> String {
    "stderr".into()
}

/// Resolve a secret: check the direct value first, then the env-var reference.
pub fn resolve_secret_field(direct: &Option<String>, env_var: &Option<String>) -> Option<String> {
    if let Some(val) = direct {
        if !val.is_empty() {
            return Some(val.clone());
        }
    }
    if let Some(env) = env_var {
        if let Ok(val) = std::env::var(env) {
            if !val.is_empty() {
                return Some(val);
            }
        }
    }
    None
}

/// Replace `${ENV_VAR}` patterns with the variable's value (empty when unset).
fn substitute_env_vars(input: &str) -> String {
    let Ok(re) = regex::Regex::new(r"\$\{([^}]+)\}") else {
        return input.to_string();
    };
    re.replace_all(input, |caps: &regex::Captures| {
        std::env::var(&caps[1]).unwrap_or_default()
    })
    .into_owned()
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    ///
    /// A missing file yields the default configuration.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        let substituted = substitute_env_vars(&raw);

        json5::from_str(&substituted).map_err(|e| VoiceGateError::Config(e.to_string()))
    }

    /// Default config file location: `~/.voicegate/config.json`.
    pub fn default_path() -> PathBuf {
        data_dir().join("config.json")
    }

    pub fn gateway(&self) -> GatewayConfig {
        self.gateway.clone().unwrap_or_default()
    }

    pub fn vad(&self) -> VadConfig {
        self.vad.clone().unwrap_or_default()
    }

    pub fn pool(&self) -> PoolConfig {
        self.pool.clone().unwrap_or_default()
    }

    pub fn session(&self) -> SessionConfig {
        self.session.clone().unwrap_or_default()
    }

    pub fn transcription(&self) -> TranscriptionConfig {
        self.transcription.clone().unwrap_or_default()
    }

    pub fn analysis(&self) -> AnalysisConfig {
        self.analysis.clone().unwrap_or_default()
    }

    pub fn backend(&self) -> BackendConfig {
        self.backend.clone().unwrap_or_default()
    }

    pub fn tts(&self) -> TtsConfig {
        self.tts.clone().unwrap_or_default()
    }

    pub fn logging(&self) -> LoggingConfig {
        self.logging.clone().unwrap_or_default()
    }

    /// Validate config, returning (warnings, errors).
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        let gateway = self.gateway();
        if gateway.port == 0 {
            errors.push("Gateway port cannot be 0".to_string());
        }
        if !gateway.path.starts_with('/') {
            errors.push(format!("Gateway path must start with '/': {}", gateway.path));
        }
        if gateway.max_message_bytes == 0 {
            errors.push("gateway.max_message_bytes must be positive".to_string());
        }

        let vad = self.vad();
        if vad.sample_rate == 0 || vad.frame_duration_ms == 0 || vad.frame_size() == 0 {
            errors.push(format!(
                "VAD frame size is empty (sample_rate={}, frame_duration_ms={})",
                vad.sample_rate, vad.frame_duration_ms
            ));
        }
        if vad.classifier == ClassifierKind::WebRtc {
            if !matches!(vad.sample_rate, 8_000 | 16_000 | 32_000 | 48_000) {
                errors.push(format!(
                    "webrtc classifier needs a sample rate of 8000, 16000, 32000 or 48000 Hz, got {}",
                    vad.sample_rate
                ));
            }
            if !matches!(vad.frame_duration_ms, 10 | 20 | 30) {
                errors.push(format!(
                    "webrtc classifier needs 10, 20 or 30 ms frames, got {}",
                    vad.frame_duration_ms
                ));
            }
        }
        if vad.silence_threshold_frames == 0 {
            errors.push("vad.silence_threshold_frames must be at least 1".to_string());
        }
        if !(0.0..=1.0).contains(&vad.volume_threshold) {
            errors.push(format!(
                "vad.volume_threshold must be within 0.0..=1.0, got {}",
                vad.volume_threshold
            ));
        }

        if self.pool().size == 0 {
            errors.push("pool.size must be at least 1".to_string());
        }

        let transcription = self.transcription();
        if !matches!(transcription.provider.as_str(), "openai" | "groq") {
            errors.push(format!(
                "Unknown transcription provider '{}'",
                transcription.provider
            ));
        }
        if transcription.resolve_api_key().is_none() {
            warnings.push(format!(
                "Transcription provider '{}' has no API key configured",
                transcription.provider
            ));
        }
        if self.analysis().resolve_api_key().is_none() {
            warnings.push("Analysis has no API key configured".to_string());
        }
        if self.tts().resolve_api_key().is_none() {
            warnings.push("TTS has no API key configured".to_string());
        }
        if let Some(file) = self.analysis().prompt_file {
            if !Path::new(&file).exists() {
                errors.push(format!("Analysis prompt file not found: {file}"));
            }
        }

        let backend = self.backend();
        if !backend.base_url.starts_with("http://") && !backend.base_url.starts_with("https://") {
            errors.push(format!(
                "backend.base_url must be an http(s) URL: {}",
                backend.base_url
            ));
        }

        for (section, secs) in [
            ("transcription", transcription.request_timeout_secs),
            ("analysis", self.analysis().request_timeout_secs),
            ("backend", backend.request_timeout_secs),
            ("tts", self.tts().request_timeout_secs),
        ] {
            if secs == 0 {
                errors.push(format!("{section}.request_timeout_secs must be at least 1"));
            }
        }

        (warnings, errors)
    }
}

/// Base directory for voicegate data: `~/.voicegate/`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".voicegate")
}
