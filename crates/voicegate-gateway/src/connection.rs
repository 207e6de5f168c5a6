//! WebSocket connection lifecycle: read loop feeding a [`ConnectionSession`].

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use voicegate_core::error::{Result, VoiceGateError};
use voicegate_core::types::SessionContext;

use crate::delivery::AudioSink;
use crate::session::{ConnectionSession, InboundMessage};
use crate::state::GatewayState;

/// Write half of a client socket. Each payload goes out as one binary message.
pub struct WsSink(SplitSink<WebSocket, Message>);

#[async_trait]
impl AudioSink for WsSink {
    async fn send_audio(&mut self, bytes: Vec<u8>) -> Result<()> {
        self.0
            .send(Message::Binary(bytes.into()))
            .await
            .map_err(|e| VoiceGateError::Delivery(e.to_string()))
    }
}

/// Map a transport message onto the session's view. `None` means skip.
fn inbound(message: Message) -> Option<InboundMessage> {
    match message {
        Message::Binary(bytes) => Some(InboundMessage::Binary(bytes.to_vec())),
        Message::Text(text) => Some(InboundMessage::Text(text.as_str().to_owned())),
        Message::Close(_) => Some(InboundMessage::Close),
        // axum answers pings itself.
        Message::Ping(_) | Message::Pong(_) => None,
    }
}

/// Handle a new WebSocket connection until the client leaves or the gateway stops.
pub async fn handle_ws_connection(state: Arc<GatewayState>, ws: WebSocket, ctx: SessionContext) {
    let session_id = ctx.session_id.clone();
    let (ws_tx, mut ws_rx) = ws.split();
    let mut session = ConnectionSession::open(state.clone(), ctx, WsSink(ws_tx)).await;

    loop {
        let next = tokio::select! {
            _ = state.shutdown.cancelled() => {
                debug!(session_id = %session_id, "gateway shutting down");
                break;
            }
            next = ws_rx.next() => next,
        };

        let message = match next {
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                let err = VoiceGateError::Connection(e.to_string());
                warn!(session_id = %session_id, kind = err.kind(), error = %err, "read failed");
                break;
            }
            None => {
                debug!(session_id = %session_id, "client went away");
                break;
            }
        };

        let Some(message) = inbound(message) else {
            continue;
        };
        if !session.handle(message) {
            debug!(session_id = %session_id, "client requested close");
            break;
        }
    }

    session.close().await;
    info!(session_id = %session_id, "WebSocket connection closed");
}
