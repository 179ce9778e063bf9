//! HTTP + WebSocket boundary.
//!
//! Every route is a thin adapter: it authenticates the caller, registers a
//! peer with the hub's broker (or starts a telemetry stream), and pumps
//! frames between the socket and the peer's queue.

mod chat;
mod discovery;
mod socket;
mod traffic;

use std::future::Future;

use axum::Router;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use opsdeck_core::{CoreError, Hub};

/// Build the router with every route mounted.
pub fn router(hub: Hub, cors_origins: &[String]) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/discovery/ws/agent", get(discovery::agent_ws))
        .route("/api/discovery/ws/subscribe", get(discovery::subscribe_ws))
        .route("/api/discovery/scan/{kind}", post(discovery::scan))
        .route("/api/chat/ws/{room_id}", get(chat::chat_ws))
        .route("/api/chat/rooms/{room_id}/messages", get(chat::history))
        .route("/ws/traffic/{device_id}", get(traffic::traffic_ws))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(cors_origins))
        .with_state(hub)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::permissive();
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(origin, error = %e, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(allowed)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Serve until `shutdown` resolves, then shut the hub down.
///
/// The hub is shut down before HTTP connections drain so that open
/// sockets see their sessions end instead of holding the server up.
pub async fn serve(
    listener: TcpListener,
    hub: Hub,
    cors_origins: &[String],
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let app = router(hub.clone(), cors_origins);
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "listening");
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.await;
            info!("shutdown requested");
            hub.shutdown().await;
        })
        .await
}

/// GET /api/health
async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

// ── Error responses ─────────────────────────────────────────────────

/// A `CoreError` rendered as `{"detail": "..."}` with a fitting status.
#[derive(Debug)]
pub struct ApiError(CoreError);

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self.0 {
            CoreError::NoProducer { .. }
            | CoreError::ProducerBusy { .. }
            | CoreError::BrokerClosed => StatusCode::SERVICE_UNAVAILABLE,
            CoreError::TargetNotFound { .. } => StatusCode::NOT_FOUND,
            CoreError::ProtocolViolation { .. } | CoreError::InvalidChannel { .. } => {
                StatusCode::BAD_REQUEST
            }
            CoreError::AuthenticationFailed { .. } => StatusCode::UNAUTHORIZED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let detail = match &self.0 {
            CoreError::NoProducer { .. } => "No discovery agent is connected.".to_owned(),
            other => other.to_string(),
        };
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        let status = |e: CoreError| ApiError::from(e).status();
        assert_eq!(
            status(CoreError::NoProducer {
                channel: "discovery".into()
            }),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status(CoreError::TargetNotFound { id: 3.into() }),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status(CoreError::Persistence {
                message: "disk".into()
            }),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn invalid_origins_are_skipped() {
        // Builds without panicking even when an origin is garbage.
        let _layer = cors_layer(&["http://localhost:5173".into(), "\n".into()]);
    }
}
