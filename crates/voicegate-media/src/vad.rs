//! Voice activity detection: segments a continuous sample stream into utterances.
//!
//! Samples are cut into fixed-size frames. A frame counts as speech when its
//! peak amplitude reaches `volume_threshold` and the configured classifier
//! agrees. While idle, recent frames are kept in a bounded ring so the start of
//! an utterance includes the audio just before the trigger. While recording,
//! up to `silence_threshold_frames` consecutive silent frames are kept; the next
//! silent frame ends the utterance and is discarded. After an emission the
//! detector is idle with an empty ring and a zero silence counter.

use std::collections::VecDeque;

use serde::Serialize;
use tracing::debug;
use voicegate_core::config::VadConfig;

use crate::classifier::{self, SpeechClassifier};

/// Bounded FIFO that evicts its oldest item when full.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    /// A zero capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append an item, returning the evicted oldest item if the ring was full.
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.items.len() == self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    /// Remove every item, oldest first.
    pub fn drain(&mut self) -> impl Iterator<Item = T> + '_ {
        self.items.drain(..)
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VadState {
    NotRecording,
    Recording,
}

/// A completed speech segment, always at least one frame long.
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    samples: Vec<f32>,
    frames: usize,
    sample_rate: u32,
}

impl Utterance {
    /// Wrap already segmented samples. `None` when `samples` is empty.
    pub fn from_samples(samples: Vec<f32>, frame_size: usize, sample_rate: u32) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        let frames = samples.len().div_ceil(frame_size.max(1));
        Some(Self {
            samples,
            frames,
            sample_rate,
        })
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Number of frames the utterance was assembled from.
    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.samples.len() as u64 * 1000 / self.sample_rate as u64
    }
}

/// Per-connection segmentation state machine.
pub struct VoiceActivityDetector {
    config: VadConfig,
    frame_size: usize,
    classifier: Box<dyn SpeechClassifier>,
    state: VadState,
    silence_count: usize,
    ring: RingBuffer<Vec<f32>>,
    recording: Vec<f32>,
    recorded_frames: usize,
    /// Samples received but not yet consumed as frames.
    pending: Vec<f32>,
}

impl VoiceActivityDetector {
    /// Create a detector using the classifier selected in `config`.
    pub fn new(config: VadConfig) -> Self {
        let classifier = classifier::from_config(&config);
        Self::with_classifier(config, classifier)
    }

    pub fn with_classifier(config: VadConfig, classifier: Box<dyn SpeechClassifier>) -> Self {
        let frame_size = config.frame_size().max(1);
        let ring = RingBuffer::new(config.silence_threshold_frames);
        Self {
            config,
            frame_size,
            classifier,
            state: VadState::NotRecording,
            silence_count: 0,
            ring,
            recording: Vec::new(),
            recorded_frames: 0,
            pending: Vec::new(),
        }
    }

    /// Feed samples; returns an utterance if one ended inside this input.
    ///
    /// A trailing partial frame is kept for the next call. When an utterance is
    /// returned, frames after the terminating one stay buffered: call [`poll`]
    /// until it returns `None` to segment them.
    ///
    /// [`poll`]: Self::poll
    pub fn process(&mut self, samples: &[f32]) -> Option<Utterance> {
        self.pending.extend_from_slice(samples);
        self.poll()
    }

    /// Continue segmenting buffered frames without new input.
    pub fn poll(&mut self) -> Option<Utterance> {
        let mut consumed = 0;
        let mut emitted = None;

        while self.pending.len() - consumed >= self.frame_size {
            let frame = self.pending[consumed..consumed + self.frame_size].to_vec();
            consumed += self.frame_size;
            if let Some(utterance) = self.step(frame) {
                emitted = Some(utterance);
                break;
            }
        }

        self.pending.drain(..consumed);
        emitted
    }

    fn step(&mut self, frame: Vec<f32>) -> Option<Utterance> {
        let volume = frame.iter().fold(0.0f32, |peak, s| peak.max(s.abs()));
        let speech = volume >= self.config.volume_threshold
            && self.classifier.is_speech(&frame, self.config.sample_rate);

        match self.state {
            VadState::NotRecording => {
                self.ring.push(frame);
                if speech {
                    self.state = VadState::Recording;
                    self.silence_count = 0;
                    for buffered in self.ring.drain() {
                        self.recording.extend_from_slice(&buffered);
                        self.recorded_frames += 1;
                    }
                    debug!(pre_roll = self.recorded_frames - 1, volume, "speech started");
                }
                None
            }
            VadState::Recording if speech => {
                self.silence_count = 0;
                self.append(&frame);
                None
            }
            VadState::Recording => {
                self.silence_count += 1;
                if self.silence_count <= self.config.silence_threshold_frames {
                    self.append(&frame);
                    return None;
                }

                let utterance = Utterance {
                    samples: std::mem::take(&mut self.recording),
                    frames: std::mem::take(&mut self.recorded_frames),
                    sample_rate: self.config.sample_rate,
                };
                self.state = VadState::NotRecording;
                self.silence_count = 0;
                self.ring.clear();
                debug!(
                    frames = utterance.frames,
                    duration_ms = utterance.duration_ms(),
                    "utterance complete"
                );
                Some(utterance)
            }
        }
    }

    fn append(&mut self, frame: &[f32]) {
        self.recording.extend_from_slice(frame);
        self.recorded_frames += 1;
    }

    /// Drop all buffered audio and return to idle.
    pub fn reset(&mut self) {
        self.state = VadState::NotRecording;
        self.silence_count = 0;
        self.ring.clear();
        self.recording.clear();
        self.recorded_frames = 0;
        self.pending.clear();
    }

    pub fn state(&self) -> VadState {
        self.state
    }

    pub fn pending_samples(&self) -> usize {
        self.pending.len()
    }

    pub fn ring_len(&self) -> usize {
        self.ring.len()
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn config(&self) -> &VadConfig {
        &self.config
    }
}
