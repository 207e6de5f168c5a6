//! Per-frame speech classifiers.
//!
//! The detector only consults a classifier for frames whose peak amplitude
//! already reaches the volume threshold.

use std::sync::Mutex;

use tracing::{debug, warn};
use voicegate_core::config::{ClassifierKind, VadConfig};
use webrtc_vad::{SampleRate, Vad, VadMode};

use crate::frame::to_pcm16;

/// Decides whether a single frame contains speech.
pub trait SpeechClassifier: Send + Sync {
    fn is_speech(&self, frame: &[f32], sample_rate: u32) -> bool;
}

/// Accepts every frame; the volume threshold alone decides.
#[derive(Debug, Clone, Copy, Default)]
pub struct VolumeOnly;

impl SpeechClassifier for VolumeOnly {
    fn is_speech(&self, _frame: &[f32], _sample_rate: u32) -> bool {
        true
    }
}

/// RMS energy floor combined with a zero-crossing ceiling.
///
/// Voiced speech carries most of its energy below ~1 kHz, so a high
/// zero-crossing rate at high amplitude points to clicks or broadband noise.
#[derive(Debug, Clone, Copy)]
pub struct EnergyClassifier {
    pub rms_threshold: f32,
    pub max_zero_crossing_rate: f32,
}

impl EnergyClassifier {
    pub fn new(rms_threshold: f32, max_zero_crossing_rate: f32) -> Self {
        Self {
            rms_threshold,
            max_zero_crossing_rate,
        }
    }

    pub fn rms(frame: &[f32]) -> f32 {
        if frame.is_empty() {
            return 0.0;
        }
        let sum: f32 = frame.iter().map(|s| s * s).sum();
        (sum / frame.len() as f32).sqrt()
    }

    /// Fraction of adjacent sample pairs that change sign.
    pub fn zero_crossing_rate(frame: &[f32]) -> f32 {
        if frame.len() < 2 {
            return 0.0;
        }
        let crossings = frame
            .windows(2)
            .filter(|w| (w[0] >= 0.0) != (w[1] >= 0.0))
            .count();
        crossings as f32 / (frame.len() - 1) as f32
    }
}

impl SpeechClassifier for EnergyClassifier {
    fn is_speech(&self, frame: &[f32], _sample_rate: u32) -> bool {
        Self::rms(frame) >= self.rms_threshold
            && Self::zero_crossing_rate(frame) <= self.max_zero_crossing_rate
    }
}

/// Owned libfvad handle.
struct FvadHandle(Vad);

// SAFETY: the fvad instance is heap state with no thread affinity. The only
// access path is through the `Mutex` in `WebRtcClassifier`, so it is never
// touched from two threads at once.
unsafe impl Send for FvadHandle {}

/// WebRTC VAD (libfvad) in very aggressive mode.
///
/// Frames must be 10, 20 or 30 ms long; anything else is reported as silence.
pub struct WebRtcClassifier {
    vad: Mutex<FvadHandle>,
}

impl WebRtcClassifier {
    /// `None` when `sample_rate` is not 8, 16, 32 or 48 kHz.
    pub fn new(sample_rate: u32) -> Option<Self> {
        let rate = match sample_rate {
            8_000 => SampleRate::Rate8kHz,
            16_000 => SampleRate::Rate16kHz,
            32_000 => SampleRate::Rate32kHz,
            48_000 => SampleRate::Rate48kHz,
            _ => return None,
        };
        let vad = Vad::new_with_rate_and_mode(rate, VadMode::VeryAggressive);
        Some(Self {
            vad: Mutex::new(FvadHandle(vad)),
        })
    }
}

impl SpeechClassifier for WebRtcClassifier {
    fn is_speech(&self, frame: &[f32], _sample_rate: u32) -> bool {
        let pcm = to_pcm16(frame);
        let mut handle = self.vad.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match handle.0.is_voice_segment(&pcm) {
            Ok(voiced) => voiced,
            Err(()) => {
                debug!(samples = pcm.len(), "webrtc vad rejected frame length");
                false
            }
        }
    }
}

/// Build the classifier selected in config.
///
/// A `webrtc` selection with an unsupported sample rate falls back to the
/// energy classifier; `Config::validate` reports that case as an error.
pub fn from_config(config: &VadConfig) -> Box<dyn SpeechClassifier> {
    let energy = || -> Box<dyn SpeechClassifier> {
        Box::new(EnergyClassifier::new(
            config.energy_threshold,
            config.max_zero_crossing_rate,
        ))
    };
    match config.classifier {
        ClassifierKind::Volume => Box::new(VolumeOnly),
        ClassifierKind::Energy => energy(),
        ClassifierKind::WebRtc => match WebRtcClassifier::new(config.sample_rate) {
            Some(classifier) => Box::new(classifier),
            None => {
                warn!(
                    sample_rate = config.sample_rate,
                    "webrtc vad unavailable at this rate, using energy classifier"
                );
                energy()
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, amplitude: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| amplitude * (2.0 * std::f32::consts::PI * freq * i as f32 / 16_000.0).sin())
            .collect()
    }

    #[test]
    fn test_energy_accepts_voiced_tone() {
        let classifier = EnergyClassifier::new(0.02, 0.35);
        assert!(classifier.is_speech(&sine(200.0, 0.8, 480), 16_000));
    }

    #[test]
    fn test_energy_rejects_silence_and_buzz() {
        let classifier = EnergyClassifier::new(0.02, 0.35);
        assert!(!classifier.is_speech(&vec![0.0; 480], 16_000));

        let buzz: Vec<f32> = (0..480).map(|i| if i % 2 == 0 { 0.9 } else { -0.9 }).collect();
        assert!(EnergyClassifier::zero_crossing_rate(&buzz) > 0.99);
        assert!(!classifier.is_speech(&buzz, 16_000));
    }

    #[test]
    fn test_webrtc_rejects_silence() {
        for rate in [8_000, 16_000, 32_000, 48_000] {
            let classifier = WebRtcClassifier::new(rate).unwrap();
            let samples = (rate / 1000 * 30) as usize;
            assert!(!classifier.is_speech(&vec![0.0; samples], rate));
        }
    }

    #[test]
    fn test_webrtc_unsupported_rate_and_frame_length() {
        assert!(WebRtcClassifier::new(22_050).is_none());

        // 25 ms is not a frame length the detector accepts.
        let classifier = WebRtcClassifier::new(16_000).unwrap();
        assert!(!classifier.is_speech(&sine(200.0, 0.8, 400), 16_000));
    }

    #[test]
    fn test_from_config_defaults_to_webrtc() {
        let classifier = from_config(&VadConfig::default());
        assert!(!classifier.is_speech(&vec![0.0; 480], 16_000));

        // Unsupported rate: the energy classifier stands in.
        let config = VadConfig {
            sample_rate: 22_050,
            ..VadConfig::default()
        };
        let classifier = from_config(&config);
        assert!(classifier.is_speech(&sine(200.0, 0.8, 480), 22_050));
    }

    #[test]
    fn test_from_config_volume() {
        let config = VadConfig {
            classifier: ClassifierKind::Volume,
            ..VadConfig::default()
        };
        assert!(from_config(&config).is_speech(&[0.0; 4], 16_000));
    }
}
