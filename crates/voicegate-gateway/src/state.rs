//! Gateway shared state.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use voicegate_core::config::Config;
use voicegate_core::types::SessionContext;
use voicegate_providers::Services;

use crate::pool::WorkerPool;

/// Registry entry for an open session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub summoner_id: String,
    pub region: String,
    pub connected_at: DateTime<Utc>,
}

/// State shared by every connection. Sessions never share anything mutable
/// except the worker pool and the registry.
pub struct GatewayState {
    pub config: Arc<Config>,
    pub services: Services,
    pub pool: Arc<WorkerPool>,
    pub sessions: RwLock<HashMap<String, SessionInfo>>,
    /// Cancelled on shutdown; every session token is a child of this one.
    pub shutdown: CancellationToken,
}

impl GatewayState {
    pub fn new(config: Config, services: Services) -> Self {
        let pool = Arc::new(WorkerPool::from_config(&config.pool()));
        Self {
            config: Arc::new(config),
            services,
            pool,
            sessions: RwLock::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Build the identity for a new connection, falling back to configured defaults.
    pub fn session_context(
        &self,
        summoner_id: Option<String>,
        region: Option<String>,
    ) -> SessionContext {
        let defaults = self.config.session();
        let pick = |value: Option<String>, fallback: String| {
            value
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or(fallback)
        };
        SessionContext::new(
            pick(summoner_id, defaults.default_summoner_id),
            pick(region, defaults.default_region),
        )
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}
