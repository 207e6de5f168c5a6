//! Per-session outbound audio queue.
//!
//! Any number of units push through cloned [`DeliveryHandle`]s; a single
//! [`DeliveryWorker`] drains the queue and writes to the transport one payload
//! at a time. Both sides share the session's liveness token: once it is
//! cancelled, pushes are dropped and the worker stops.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use voicegate_core::error::Result;
use voicegate_core::types::AudioPayload;

/// Outbound half of a transport, written by exactly one worker.
#[async_trait]
pub trait AudioSink: Send {
    async fn send_audio(&mut self, bytes: Vec<u8>) -> Result<()>;
}

/// Producer side of a session's delivery queue.
#[derive(Clone)]
pub struct DeliveryHandle {
    session_id: String,
    tx: mpsc::UnboundedSender<AudioPayload>,
    live: CancellationToken,
}

impl DeliveryHandle {
    /// Queue one complete payload. Returns `false` if the session is gone.
    pub fn push(&self, bytes: Vec<u8>) -> bool {
        if self.live.is_cancelled() {
            debug!(session_id = %self.session_id, bytes = bytes.len(), "session closed, dropping audio");
            return false;
        }
        let len = bytes.len();
        match self.tx.send(AudioPayload::new(self.session_id.clone(), bytes)) {
            Ok(()) => true,
            Err(_) => {
                debug!(session_id = %self.session_id, bytes = len, "delivery queue closed, dropping audio");
                false
            }
        }
    }

    pub fn is_live(&self) -> bool {
        !self.live.is_cancelled() && !self.tx.is_closed()
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

/// Counters returned when a worker stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    pub sent: usize,
    pub failed: usize,
}

/// Single consumer of a session's delivery queue.
pub struct DeliveryWorker<S> {
    session_id: String,
    rx: mpsc::UnboundedReceiver<AudioPayload>,
    sink: S,
    live: CancellationToken,
}

/// Create a queue for `session_id` whose lifetime follows `live`.
pub fn channel<S: AudioSink>(
    session_id: impl Into<String>,
    sink: S,
    live: CancellationToken,
) -> (DeliveryHandle, DeliveryWorker<S>) {
    let session_id = session_id.into();
    let (tx, rx) = mpsc::unbounded_channel();
    (
        DeliveryHandle {
            session_id: session_id.clone(),
            tx,
            live: live.clone(),
        },
        DeliveryWorker {
            session_id,
            rx,
            sink,
            live,
        },
    )
}

impl<S: AudioSink> DeliveryWorker<S> {
    /// Send queued payloads in order until the session is cancelled or every
    /// producer is dropped. A failed send skips that payload only.
    pub async fn run(mut self) -> DeliveryStats {
        let mut stats = DeliveryStats::default();
        loop {
            let payload = tokio::select! {
                biased;
                _ = self.live.cancelled() => break,
                item = self.rx.recv() => match item {
                    Some(payload) => payload,
                    None => break,
                },
            };

            let len = payload.len();
            let result = tokio::select! {
                biased;
                _ = self.live.cancelled() => break,
                result = self.sink.send_audio(payload.bytes) => result,
            };
            match result {
                Ok(()) => {
                    stats.sent += 1;
                    debug!(session_id = %self.session_id, bytes = len, "audio delivered");
                }
                Err(e) => {
                    stats.failed += 1;
                    warn!(session_id = %self.session_id, bytes = len, error = %e, "audio delivery failed");
                }
            }
        }

        self.rx.close();
        debug!(session_id = %self.session_id, sent = stats.sent, failed = stats.failed, "delivery worker stopped");
        stats
    }
}
