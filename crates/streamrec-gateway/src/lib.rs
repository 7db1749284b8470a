//! streamrec-gateway: HTTP JSON API.
//!
//! Provides:
//! - Schedule CRUD under `/api/schedules`
//! - Next-occurrence polling with a change token
//! - Manual recording control and engine state
//! - Bearer token authentication
//! - HTTP health check endpoint

pub mod error;
pub mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::{Query, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use streamrec_scheduler::{Clock, NextOccurrenceBadge, ScheduleStore, SchedulerEngine};

pub use error::ApiError;

/// Shared gateway state.
pub struct GatewayState {
    pub store: Arc<ScheduleStore>,
    pub engine: Arc<SchedulerEngine>,
    pub badge: Arc<NextOccurrenceBadge>,
    pub clock: Arc<dyn Clock>,
    pub auth_token: Option<String>,
}

/// Build the router. `/health` is always open; everything under `/api`
/// requires the auth token when one is configured.
pub fn router(state: Arc<GatewayState>) -> Router {
    let api = Router::new()
        .route(
            "/api/schedules",
            get(handlers::list_schedules).post(handlers::add_schedule),
        )
        .route("/api/schedules/next", get(handlers::next_schedule))
        .route(
            "/api/schedules/{id}",
            get(handlers::get_schedule)
                .put(handlers::update_schedule)
                .delete(handlers::delete_schedule),
        )
        .route("/api/recording/status", get(handlers::recording_status))
        .route("/api/recording/start", post(handlers::start_recording))
        .route("/api/recording/stop", post(handlers::stop_recording))
        .route("/api/scheduler/state", get(handlers::scheduler_state))
        .route("/api/scheduler/tick", post(handlers::scheduler_tick))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/health", get(health_handler))
        .merge(api)
        .with_state(state)
}

/// Serve the API until `shutdown` fires.
pub async fn start_gateway(
    state: Arc<GatewayState>,
    host: &str,
    port: u16,
    shutdown: CancellationToken,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr: SocketAddr = format!("{host}:{port}").parse()?;
    let app = router(state);

    info!("Gateway listening on {addr}");
    info!("  API:    http://{addr}/api/schedules");
    info!("  Health: http://{addr}/health");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    info!("Gateway stopped");
    Ok(())
}

/// GET /health: simple HTTP health check.
async fn health_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Query parameter alternative to the Authorization header.
#[derive(Deserialize, Default)]
struct TokenQuery {
    token: Option<String>,
}

async fn require_auth(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Query(query): Query<TokenQuery>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    if let Some(expected_token) = &state.auth_token {
        let provided_token = extract_bearer_token(&headers).or(query.token.as_deref());

        match provided_token {
            Some(token) if token == expected_token => {}
            _ => {
                warn!(path = %request.uri().path(), "API authentication failed");
                return Err(StatusCode::UNAUTHORIZED);
            }
        }
    }
    Ok(next.run(request).await)
}

/// Extract bearer token from Authorization header.
fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_bearer_token() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer my-secret-token".parse().unwrap());
        assert_eq!(extract_bearer_token(&headers), Some("my-secret-token"));
    }

    #[test]
    fn test_extract_bearer_token_missing() {
        let headers = HeaderMap::new();
        assert_eq!(extract_bearer_token(&headers), None);
    }

    #[test]
    fn test_extract_bearer_token_wrong_scheme() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Basic abc123".parse().unwrap());
        assert_eq!(extract_bearer_token(&headers), None);
    }
}
