use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of a connected client, carried by every pool unit the session submits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionContext {
    pub session_id: String,
    pub summoner_id: String,
    pub region: String,
}

impl SessionContext {
    /// Create a context with a freshly generated session id.
    pub fn new(summoner_id: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            summoner_id: summoner_id.into(),
            region: region.into(),
        }
    }
}

/// One complete outbound audio message for a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioPayload {
    pub session_id: String,
    pub bytes: Vec<u8>,
}

impl AudioPayload {
    pub fn new(session_id: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            session_id: session_id.into(),
            bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}
