//! Per-connection session: owns the VAD, the delivery queue and its worker.
//!
//! The session is transport-agnostic. The connection task feeds it inbound
//! messages in arrival order and closes it when the transport ends.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use voicegate_core::types::SessionContext;
use voicegate_media::{Utterance, VadState, VoiceActivityDetector, frame};

use crate::delivery::{self, AudioSink, DeliveryHandle, DeliveryStats};
use crate::pipeline;
use crate::state::{GatewayState, SessionInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Closing,
    Closed,
}

/// Transport-independent view of one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    Binary(Vec<u8>),
    Text(String),
    Close,
}

pub struct ConnectionSession {
    gateway: Arc<GatewayState>,
    ctx: SessionContext,
    vad: VoiceActivityDetector,
    keepalive_token: String,
    delivery: DeliveryHandle,
    live: CancellationToken,
    worker: Option<JoinHandle<DeliveryStats>>,
    state: SessionState,
    dispatched: usize,
    rejected: usize,
}

impl ConnectionSession {
    /// Set up the VAD and delivery queue, spawn the delivery worker, and register the session.
    pub async fn open<S>(gateway: Arc<GatewayState>, ctx: SessionContext, sink: S) -> Self
    where
        S: AudioSink + 'static,
    {
        let live = gateway.shutdown.child_token();
        let (delivery, worker) = delivery::channel(ctx.session_id.clone(), sink, live.clone());
        let worker = tokio::spawn(worker.run());
        let vad = VoiceActivityDetector::new(gateway.config.vad());
        let keepalive_token = gateway.config.gateway().keepalive_token;

        gateway.sessions.write().await.insert(
            ctx.session_id.clone(),
            SessionInfo {
                summoner_id: ctx.summoner_id.clone(),
                region: ctx.region.clone(),
                connected_at: chrono::Utc::now(),
            },
        );
        info!(
            session_id = %ctx.session_id,
            summoner_id = %ctx.summoner_id,
            region = %ctx.region,
            "session opened"
        );

        Self {
            gateway,
            ctx,
            vad,
            keepalive_token,
            delivery,
            live,
            worker: Some(worker),
            state: SessionState::Open,
            dispatched: 0,
            rejected: 0,
        }
    }

    /// Handle one inbound message. Returns `false` once the connection should end.
    pub fn handle(&mut self, message: InboundMessage) -> bool {
        if self.state != SessionState::Open {
            return false;
        }
        match message {
            InboundMessage::Binary(bytes) => {
                self.ingest(&bytes);
                true
            }
            InboundMessage::Text(text) if text == self.keepalive_token => {
                trace!(session_id = %self.ctx.session_id, "keepalive");
                true
            }
            InboundMessage::Text(text) => {
                debug!(session_id = %self.ctx.session_id, chars = text.len(), "ignoring text message");
                true
            }
            InboundMessage::Close => false,
        }
    }

    fn ingest(&mut self, raw: &[u8]) {
        let samples = match frame::decode(raw) {
            Ok(samples) => samples,
            Err(e) => {
                warn!(session_id = %self.ctx.session_id, bytes = raw.len(), error = %e, "dropping frame");
                return;
            }
        };

        let mut next = self.vad.process(&samples);
        while let Some(utterance) = next {
            self.dispatch(utterance);
            next = self.vad.poll();
        }
    }

    fn dispatch(&mut self, utterance: Utterance) {
        let frames = utterance.frames();
        let unit = pipeline::run_unit(
            self.gateway.services.clone(),
            self.ctx.clone(),
            utterance,
            self.delivery.clone(),
        );
        match self.gateway.pool.submit(unit) {
            Ok(()) => {
                self.dispatched += 1;
                info!(session_id = %self.ctx.session_id, frames, "utterance dispatched");
            }
            Err(e) => {
                self.rejected += 1;
                warn!(session_id = %self.ctx.session_id, frames, error = %e, "utterance dropped");
            }
        }
    }

    /// Stop delivery and release the session. Safe to call more than once.
    pub async fn close(&mut self) {
        if self.state != SessionState::Open {
            return;
        }
        self.state = SessionState::Closing;
        self.live.cancel();

        if let Some(worker) = self.worker.take() {
            match worker.await {
                Ok(stats) => debug!(
                    session_id = %self.ctx.session_id,
                    sent = stats.sent,
                    failed = stats.failed,
                    "delivery worker joined"
                ),
                Err(e) => warn!(session_id = %self.ctx.session_id, error = %e, "delivery worker panicked"),
            }
        }
        self.vad.reset();
        self.gateway.sessions.write().await.remove(&self.ctx.session_id);

        self.state = SessionState::Closed;
        info!(
            session_id = %self.ctx.session_id,
            dispatched = self.dispatched,
            rejected = self.rejected,
            "session closed"
        );
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    pub fn vad_state(&self) -> VadState {
        self.vad.state()
    }

    pub fn utterances_dispatched(&self) -> usize {
        self.dispatched
    }

    pub fn utterances_rejected(&self) -> usize {
        self.rejected
    }

    pub fn delivery(&self) -> &DeliveryHandle {
        &self.delivery
    }
}

impl Drop for ConnectionSession {
    fn drop(&mut self) {
        // Units still holding a delivery handle must see the session as gone.
        self.live.cancel();
        if self.state == SessionState::Closed {
            return;
        }

        // Dropped without `close()`: release the registry entry anyway.
        let session_id = self.ctx.session_id.clone();
        if let Ok(mut sessions) = self.gateway.sessions.try_write() {
            sessions.remove(&session_id);
            return;
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let gateway = self.gateway.clone();
            handle.spawn(async move {
                gateway.sessions.write().await.remove(&session_id);
            });
        } else {
            warn!(session_id = %session_id, "session dropped outside the runtime, registry entry kept");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        MockServices, RecordingSink, pcm_frames, test_state, wait_until,
    };
    use std::time::Duration;

    const SPEECH: i16 = 29_000;

    /// Speech frames followed by enough silence to end the utterance (threshold 3).
    fn one_utterance(speech_frames: usize) -> Vec<u8> {
        let mut bytes = pcm_frames(SPEECH, speech_frames);
        bytes.extend(pcm_frames(0, 4));
        bytes
    }

    #[tokio::test]
    async fn test_speech_produces_audio_reply() {
        let state = test_state(MockServices::default());
        let sink = RecordingSink::default();
        let ctx = state.session_context(Some("4545".into()), None);
        let mut session = ConnectionSession::open(state.clone(), ctx, sink.clone()).await;
        assert_eq!(state.session_count().await, 1);

        assert!(session.handle(InboundMessage::Binary(one_utterance(6))));
        assert_eq!(session.utterances_dispatched(), 1);

        wait_until(|| sink.payloads().len() == 1).await;
        // 6 speech + 3 trailing silent frames.
        assert_eq!(sink.payloads()[0], b"ack: heard 9 frames".to_vec());

        session.close().await;
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(state.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_keepalive_and_text_are_ignored() {
        let state = test_state(MockServices::default());
        let sink = RecordingSink::default();
        let ctx = state.session_context(None, None);
        let mut session = ConnectionSession::open(state, ctx, sink.clone()).await;

        assert!(session.handle(InboundMessage::Text("ping".into())));
        assert!(session.handle(InboundMessage::Text("hello".into())));
        assert_eq!(session.vad_state(), VadState::NotRecording);
        assert_eq!(session.utterances_dispatched(), 0);
        session.close().await;
    }

    #[tokio::test]
    async fn test_malformed_frame_dropped_session_continues() {
        let state = test_state(MockServices::default());
        let sink = RecordingSink::default();
        let ctx = state.session_context(None, None);
        let mut session = ConnectionSession::open(state, ctx, sink.clone()).await;

        assert!(session.handle(InboundMessage::Binary(vec![1, 2, 3])));
        assert!(session.handle(InboundMessage::Binary(Vec::new())));
        assert_eq!(session.state(), SessionState::Open);

        session.handle(InboundMessage::Binary(one_utterance(2)));
        assert_eq!(session.utterances_dispatched(), 1);
        session.close().await;
    }

    #[tokio::test]
    async fn test_close_message_ends_connection() {
        let state = test_state(MockServices::default());
        let ctx = state.session_context(None, None);
        let mut session = ConnectionSession::open(state, ctx, RecordingSink::default()).await;
        assert!(!session.handle(InboundMessage::Close));
        session.close().await;
        assert!(!session.handle(InboundMessage::Binary(one_utterance(2))));
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_releases_resources() {
        let state = test_state(MockServices::default());
        for _ in 0..3 {
            let ctx = state.session_context(None, None);
            let mut session = ConnectionSession::open(state.clone(), ctx, RecordingSink::default()).await;
            session.close().await;
            session.close().await;
            assert_eq!(session.state(), SessionState::Closed);
            assert!(!session.delivery().is_live());
        }
        assert_eq!(state.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_drop_without_close_releases_registry_entry() {
        let state = test_state(MockServices::default());
        let ctx = state.session_context(None, None);
        let session = ConnectionSession::open(state.clone(), ctx, RecordingSink::default()).await;
        let delivery = session.delivery().clone();
        assert_eq!(state.session_count().await, 1);

        drop(session);
        assert!(!delivery.is_live());
        assert_eq!(state.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_no_sends_after_close() {
        let mock = MockServices::default().with_delay_per_frame(Duration::from_millis(20));
        let state = test_state(mock.clone());
        let sink = RecordingSink::default();
        let ctx = state.session_context(None, None);
        let mut session = ConnectionSession::open(state.clone(), ctx, sink.clone()).await;

        session.handle(InboundMessage::Binary(one_utterance(2)));
        session.close().await;

        // The unit keeps running and finishes after the session is gone.
        wait_until(|| mock.calls.synthesize() == 1).await;
        wait_until(|| state.pool.in_flight() == 0).await;
        assert!(sink.payloads().is_empty());
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let state = test_state(MockServices::default());
        let sink_a = RecordingSink::default();
        let sink_b = RecordingSink::default();
        let mut a = ConnectionSession::open(
            state.clone(),
            state.session_context(Some("a".into()), None),
            sink_a.clone(),
        )
        .await;
        let mut b = ConnectionSession::open(
            state.clone(),
            state.session_context(Some("b".into()), None),
            sink_b.clone(),
        )
        .await;

        // A is mid-utterance; B only sees silence.
        a.handle(InboundMessage::Binary(pcm_frames(SPEECH, 3)));
        b.handle(InboundMessage::Binary(pcm_frames(0, 10)));
        assert_eq!(a.vad_state(), VadState::Recording);
        assert_eq!(b.vad_state(), VadState::NotRecording);

        b.close().await;
        a.handle(InboundMessage::Binary(pcm_frames(0, 4)));
        assert_eq!(a.state(), SessionState::Open);

        wait_until(|| sink_a.payloads().len() == 1).await;
        assert!(sink_b.payloads().is_empty());
        a.close().await;
        assert_eq!(state.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_later_utterance_may_be_delivered_first() {
        // Longer utterances take longer to transcribe.
        let mock = MockServices::default().with_delay_per_frame(Duration::from_millis(15));
        let state = test_state(mock);
        let sink = RecordingSink::default();
        let ctx = state.session_context(None, None);
        let mut session = ConnectionSession::open(state, ctx, sink.clone()).await;

        let mut stream = one_utterance(20);
        stream.extend(one_utterance(1));
        session.handle(InboundMessage::Binary(stream));
        assert_eq!(session.utterances_dispatched(), 2);

        wait_until(|| sink.payloads().len() == 2).await;
        // B (dispatched second, shorter) completed and was delivered before A.
        // Cross-unit ordering is not guaranteed, so this is accepted behavior.
        // B starts from an empty ring: 1 speech + 3 trailing frames.
        let payloads = sink.payloads();
        assert_eq!(payloads[0], b"ack: heard 4 frames".to_vec());
        assert_eq!(payloads[1], b"ack: heard 23 frames".to_vec());
        session.close().await;
    }

    #[tokio::test]
    async fn test_saturated_pool_drops_utterance() {
        let mock = MockServices::default().with_delay_per_frame(Duration::from_millis(50));
        let state = test_state_with_pool(mock, 1, 0);
        let ctx = state.session_context(None, None);
        let mut session = ConnectionSession::open(state, ctx, RecordingSink::default()).await;

        let mut stream = one_utterance(2);
        stream.extend(one_utterance(2));
        session.handle(InboundMessage::Binary(stream));
        assert_eq!(session.utterances_dispatched(), 1);
        assert_eq!(session.utterances_rejected(), 1);
        session.close().await;
    }

    fn test_state_with_pool(mock: MockServices, size: usize, queue_depth: usize) -> Arc<GatewayState> {
        let mut config = crate::test_support::test_config();
        config.pool = Some(voicegate_core::config::PoolConfig { size, queue_depth });
        Arc::new(GatewayState::new(config, mock.services()))
    }
}
