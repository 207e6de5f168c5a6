//! In-memory collaborators and sinks shared by the unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use voicegate_core::config::{ClassifierKind, Config, VadConfig};
use voicegate_core::error::{Result, VoiceGateError};
use voicegate_media::Utterance;
use voicegate_providers::{
    Analysis, Analyzer, Backend, BackendAck, BackendEvent, BackendRequest, EventParams, Services,
    Synthesizer, Transcriber,
};

use crate::delivery::AudioSink;
use crate::state::GatewayState;

const FRAME: usize = 480;

/// Records every payload it is asked to send.
#[derive(Clone, Default)]
pub struct RecordingSink {
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl RecordingSink {
    pub fn payloads(&self) -> Vec<Vec<u8>> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl AudioSink for RecordingSink {
    async fn send_audio(&mut self, bytes: Vec<u8>) -> Result<()> {
        self.sent.lock().unwrap().push(bytes);
        Ok(())
    }
}

/// Fails the n-th send (zero-based) and records the rest.
#[derive(Clone)]
pub struct FlakySink {
    pub recorded: RecordingSink,
    fail_on: usize,
    attempts: Arc<AtomicUsize>,
}

impl FlakySink {
    pub fn failing_on(fail_on: usize) -> Self {
        Self {
            recorded: RecordingSink::default(),
            fail_on,
            attempts: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl AudioSink for FlakySink {
    async fn send_audio(&mut self, bytes: Vec<u8>) -> Result<()> {
        if self.attempts.fetch_add(1, Ordering::SeqCst) == self.fail_on {
            return Err(VoiceGateError::Delivery("socket reset".into()));
        }
        self.recorded.send_audio(bytes).await
    }
}

#[derive(Default)]
pub struct Calls {
    transcribe: AtomicUsize,
    analyze: AtomicUsize,
    notify: AtomicUsize,
    synthesize: AtomicUsize,
}

impl Calls {
    pub fn analyze(&self) -> usize {
        self.analyze.load(Ordering::SeqCst)
    }

    pub fn notify(&self) -> usize {
        self.notify.load(Ordering::SeqCst)
    }

    pub fn synthesize(&self) -> usize {
        self.synthesize.load(Ordering::SeqCst)
    }
}

/// Scripted collaborators. The transcript defaults to `"heard {n} frames"`,
/// the acknowledgement echoes it as `"ack: ..."`, and synthesized audio is the
/// UTF-8 text itself.
#[derive(Clone, Default)]
pub struct MockServices {
    pub calls: Arc<Calls>,
    transcript: Option<String>,
    delay_per_frame: Option<Duration>,
    event: Option<String>,
    fail_backend: bool,
    fail_synthesis_for: Option<String>,
}

impl MockServices {
    pub fn with_transcript(mut self, text: &str) -> Self {
        self.transcript = Some(text.into());
        self
    }

    pub fn with_delay_per_frame(mut self, delay: Duration) -> Self {
        self.delay_per_frame = Some(delay);
        self
    }

    pub fn with_event(mut self, message: &str) -> Self {
        self.event = Some(message.into());
        self
    }

    pub fn failing_backend(mut self) -> Self {
        self.fail_backend = true;
        self
    }

    pub fn failing_synthesis_for(mut self, text: &str) -> Self {
        self.fail_synthesis_for = Some(text.into());
        self
    }

    pub fn services(&self) -> Services {
        let shared = Arc::new(self.clone());
        Services {
            transcriber: shared.clone(),
            analyzer: shared.clone(),
            backend: shared.clone(),
            synthesizer: shared,
            event_timeout: Duration::from_secs(1),
        }
    }
}

#[async_trait]
impl Transcriber for MockServices {
    async fn transcribe(&self, samples: &[f32], _sample_rate: u32) -> Result<String> {
        self.calls.transcribe.fetch_add(1, Ordering::SeqCst);
        let frames = samples.len() / FRAME;
        if let Some(delay) = self.delay_per_frame {
            tokio::time::sleep(delay * frames as u32).await;
        }
        Ok(self
            .transcript
            .clone()
            .unwrap_or_else(|| format!("heard {frames} frames")))
    }
}

#[async_trait]
impl Analyzer for MockServices {
    async fn analyze(&self, text: &str) -> Result<Analysis> {
        self.calls.analyze.fetch_add(1, Ordering::SeqCst);
        Ok(Analysis { text: text.into() })
    }
}

#[async_trait]
impl Backend for MockServices {
    async fn notify(&self, request: &BackendRequest) -> Result<BackendAck> {
        self.calls.notify.fetch_add(1, Ordering::SeqCst);
        if self.fail_backend {
            return Err(VoiceGateError::backend("expected 201 Created, got 500"));
        }
        Ok(BackendAck {
            spell_check_message: format!("ack: {}", request.final_text),
            champion_name: "Ahri".into(),
            spell_name: "Flash".into(),
        })
    }

    async fn await_event(
        &self,
        _params: &EventParams,
        _timeout: Duration,
    ) -> Result<Option<BackendEvent>> {
        Ok(self.event.clone().map(|message| BackendEvent {
            spell_cool_down_message: message,
        }))
    }
}

#[async_trait]
impl Synthesizer for MockServices {
    async fn synthesize(&self, text: &str) -> Result<Option<Vec<u8>>> {
        self.calls.synthesize.fetch_add(1, Ordering::SeqCst);
        if self.fail_synthesis_for.as_deref() == Some(text) {
            return Err(VoiceGateError::synthesis("voice unavailable"));
        }
        Ok(Some(text.as_bytes().to_vec()))
    }
}

/// An utterance of `frames` constant-amplitude frames.
pub fn utterance(frames: usize) -> Utterance {
    Utterance::from_samples(vec![0.5; frames * FRAME], FRAME, 16_000)
        .expect("non-empty utterance")
}

/// `frames` frames of constant 16-bit PCM, little-endian.
pub fn pcm_frames(amplitude: i16, frames: usize) -> Vec<u8> {
    std::iter::repeat_n(amplitude.to_le_bytes(), frames * FRAME)
        .flatten()
        .collect()
}

/// Volume-only VAD with a short hangover so tests stay small.
pub fn test_config() -> Config {
    Config {
        vad: Some(VadConfig {
            silence_threshold_frames: 3,
            classifier: ClassifierKind::Volume,
            ..VadConfig::default()
        }),
        ..Config::default()
    }
}

pub fn test_state(mock: MockServices) -> Arc<GatewayState> {
    Arc::new(GatewayState::new(test_config(), mock.services()))
}

pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..400 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached within 2s");
}
