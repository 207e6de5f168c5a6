//! Real-time voice gateway.
//!
//! Clients stream 16-bit PCM over a WebSocket. Each connection gets a
//! [`session::ConnectionSession`] that segments the stream into utterances;
//! every utterance becomes one recognition unit on the shared
//! [`pool::WorkerPool`], and any synthesized replies flow back through the
//! session's serial delivery queue.

pub mod connection;
pub mod delivery;
pub mod pipeline;
pub mod pool;
pub mod server;
pub mod session;
pub mod state;

#[cfg(test)]
pub(crate) mod test_support;

pub use delivery::{AudioSink, DeliveryHandle, DeliveryStats};
pub use pool::WorkerPool;
pub use server::{router, serve, start_gateway};
pub use session::{ConnectionSession, InboundMessage, SessionState};
pub use state::{GatewayState, SessionInfo};
