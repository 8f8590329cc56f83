//! MediaMTX external authentication hook

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use serde::Deserialize;

use super::AppState;
use crate::model::{AuthorizationKey, Protocol, Session};

/// Actions that address the MediaMTX control surface rather than a stream
const CONTROL_ACTIONS: [&str; 3] = ["api", "metrics", "pprof"];

/// Body MediaMTX posts for every authentication
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthRequest {
    // Credentials are not used; access is granted by query token
    pub user: Option<String>,
    pub password: Option<String>,
    pub token: Option<String>,

    pub ip: Option<String>,
    pub action: Option<String>,
    pub path: Option<String>,

    /// Generic protocol label (`rtmp`, `srt`, ...)
    pub protocol: Option<String>,

    /// Session id, matched later by connect/disconnect notifications
    pub id: Option<String>,

    /// Raw query string of the client request
    pub query: Option<String>,
}

/// `POST /auth`
pub async fn authorize(State(state): State<AppState>, body: Bytes) -> StatusCode {
    let request: AuthRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            tracing::debug!(error = %e, "Malformed auth request");
            return StatusCode::BAD_REQUEST;
        }
    };

    let (Some(ip), Some(action)) = (request.ip.as_deref(), request.action.as_deref()) else {
        return StatusCode::BAD_REQUEST;
    };

    if CONTROL_ACTIONS.contains(&action) {
        return if state.api_ips.contains_str(ip) {
            StatusCode::OK
        } else {
            tracing::info!(ip, action, "Control API access denied");
            StatusCode::FORBIDDEN
        };
    }

    if state.private_ips.contains_str(ip) {
        return StatusCode::OK;
    }

    let query = request.query.as_deref().unwrap_or_default();
    let path = request.path.as_deref().unwrap_or_default();
    if query.is_empty() || path.is_empty() {
        return StatusCode::FORBIDDEN;
    }

    let token = query_param(query, &state.config.access.query_token_key).unwrap_or_default();
    let key = AuthorizationKey::new(action, path, token);

    let session = match (request.protocol, request.id) {
        (Some(protocol), Some(id)) => Some(Session::new(id, Protocol::parse(&protocol))),
        _ => None,
    };

    match state.service.lookup(&key, session).await {
        Ok(true) => StatusCode::OK,
        Ok(false) => {
            tracing::info!(ip, path, action, "Access denied");
            StatusCode::FORBIDDEN
        }
        Err(e) => {
            tracing::error!(path, action, error = %e, "Error while validating auth");
            StatusCode::FORBIDDEN
        }
    }
}

/// First value of `name` in a URL-encoded query string
pub(crate) fn query_param(query: &str, name: &str) -> Option<String> {
    url::form_urlencoded::parse(query.trim_start_matches('?').as_bytes())
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}
