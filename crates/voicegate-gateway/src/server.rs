//! Axum-based WebSocket server.

use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::connection::handle_ws_connection;
use crate::state::GatewayState;

/// Identity supplied by the client on the upgrade request.
#[derive(Debug, Default, Deserialize)]
pub struct ConnectQuery {
    pub summoner_id: Option<String>,
    pub region: Option<String>,
}

/// Routes: the configured audio path and `/health`.
pub fn router(state: Arc<GatewayState>) -> Router {
    let path = state.config.gateway().path;
    Router::new()
        .route(&path, get(ws_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and run the gateway until ctrl-c or the shutdown token fires.
pub async fn start_gateway(state: Arc<GatewayState>, bind: &str, port: u16) -> anyhow::Result<()> {
    let addr = format!("{bind}:{port}");
    let listener = TcpListener::bind(&addr).await?;
    info!(path = %state.config.gateway().path, "Gateway listening on {addr}");
    serve(state, listener).await
}

/// Serve on an already bound listener.
pub async fn serve(state: Arc<GatewayState>, listener: TcpListener) -> anyhow::Result<()> {
    let app = router(state.clone());
    let shutdown = state.shutdown.clone();

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    // Stop admitting units and end every session still attached.
    state.pool.close();
    state.shutdown.cancel();
    info!("Gateway stopped");
    Ok(())
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<ConnectQuery>,
    State(state): State<Arc<GatewayState>>,
) -> impl IntoResponse {
    let ctx = state.session_context(query.summoner_id, query.region);
    let max = state.config.gateway().max_message_bytes;
    ws.max_message_size(max)
        .on_upgrade(move |socket| handle_ws_connection(state, socket, ctx))
}

async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let version = env!("CARGO_PKG_VERSION");
    let sessions = state.session_count().await;
    let pool = &state.pool;

    axum::Json(json!({
        "status": "ok",
        "version": version,
        "sessions": sessions,
        "pool": {
            "size": pool.size(),
            "capacity": pool.capacity(),
            "in_flight": pool.in_flight(),
            "running": pool.running(),
            "closed": pool.is_closed(),
        },
    }))
}

async fn shutdown_signal(token: tokio_util::sync::CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => {
                warn!(error = %e, "Failed to install CTRL+C handler");
                token.cancelled().await;
            }
        },
        _ = token.cancelled() => info!("Shutdown requested"),
    }
    // Close open sockets so graceful shutdown does not wait on them.
    token.cancel();
}
