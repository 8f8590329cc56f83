//! HTTP API for the auth gateway
//!
//! MediaMTX and the reverse proxy call these endpoints:
//! - `POST /auth` - MediaMTX external authentication hook
//! - `GET /connection` - connect/disconnect notifications (`runOnConnect`)
//! - `GET /forward` - forward-auth for the thumbnail server
//! - `GET /healthz` - liveness probe
//! - `GET /metrics` - gateway metrics

pub mod auth;
pub mod connection;
pub mod forward;

use axum::{
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::access::AllowList;
use crate::config::{Config, ConfigError};
use crate::metrics::{global_metrics, MetricsSnapshot};
use crate::service::AuthService;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Authorization façade
    pub service: Arc<AuthService>,
    /// Clients allowed to use the MediaMTX control API
    pub api_ips: Arc<AllowList>,
    /// Clients allowed without a token
    pub private_ips: Arc<AllowList>,
    /// Service configuration
    pub config: Arc<Config>,
}

impl AppState {
    /// Create a new AppState, parsing the configured allow-lists
    pub fn new(service: Arc<AuthService>, config: Arc<Config>) -> Result<Self, ConfigError> {
        Ok(Self {
            service,
            api_ips: Arc::new(config.access.api_allow_list()?),
            private_ips: Arc::new(config.access.private_allow_list()?),
            config,
        })
    }
}

/// Build the HTTP API router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/auth", post(auth::authorize))
        .route("/connection", get(connection::notify))
        .route("/forward", get(forward::forward_auth))
        // Health and metrics
        .route("/healthz", get(health_check))
        .route("/metrics", get(metrics_handler))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "ok"
}

/// Metrics endpoint
async fn metrics_handler() -> Json<MetricsSnapshot> {
    Json(global_metrics().snapshot())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{app_state, MemoryStore, RecordingControlPlane};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn router() -> Router {
        let state = app_state(
            Arc::new(MemoryStore::default()),
            Arc::new(RecordingControlPlane::default()),
            Config::default(),
        );
        build_router(state)
    }

    #[test]
    fn test_app_state_rejects_invalid_cidr() {
        let mut config = Config::default();
        config.access.private_ip_ranges = vec!["10.0.0.0/40".to_string()];
        let state = app_state(
            Arc::new(MemoryStore::default()),
            Arc::new(RecordingControlPlane::default()),
            Config::default(),
        );
        assert!(AppState::new(state.service, Arc::new(config)).is_err());
    }

    #[tokio::test]
    async fn test_healthz() {
        let resp = router()
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"ok");
    }

    #[tokio::test]
    async fn test_metrics_is_json() {
        let resp = router()
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let v: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(v["lookups"].is_u64());
        assert!(v["kick_attempts"].is_u64());
    }

    #[tokio::test]
    async fn test_wrong_method_is_rejected() {
        let resp = router()
            .oneshot(Request::builder().uri("/auth").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);

        let resp = router()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/forward")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
