//! Media pipeline: frame decoding, speech classification, VAD segmentation, WAV encoding.

pub mod classifier;
pub mod frame;
pub mod vad;
pub mod wav;

pub use classifier::{EnergyClassifier, SpeechClassifier, VolumeOnly, WebRtcClassifier};
pub use frame::decode;
pub use vad::{RingBuffer, Utterance, VadState, VoiceActivityDetector};
