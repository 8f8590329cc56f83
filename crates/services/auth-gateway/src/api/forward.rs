//! Forward-auth for the thumbnail server
//!
//! The reverse proxy forwards the original URI and client address in
//! headers. Thumbnails are named after their stream path, so
//! `/thumbnails/cam1.png?token=abc` is checked as a read of `cam1`.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use url::Url;

use super::auth::query_param;
use super::AppState;
use crate::model::{AuthorizationKey, ACTION_READ};

/// `GET /forward`
pub async fn forward_auth(State(state): State<AppState>, headers: HeaderMap) -> StatusCode {
    let settings = &state.config.forward_auth;
    let ip_header = header(&headers, &settings.ip_header);
    let uri_header = header(&headers, &settings.uri_header);
    let (Some(ip_header), Some(uri_header)) = (ip_header, uri_header) else {
        return StatusCode::BAD_REQUEST;
    };

    let Some(uri) = uri_header.strip_prefix(settings.base_path.as_str()) else {
        return StatusCode::BAD_REQUEST;
    };

    // Closest client first
    let ip = ip_header.split(',').next().unwrap_or_default();
    if state.private_ips.contains_str(ip) {
        return StatusCode::OK;
    }

    let Some((path, token)) = parse_target(uri, &state.config.access.query_token_key) else {
        tracing::debug!(uri = %uri_header, "Unparseable forwarded URI");
        return StatusCode::BAD_REQUEST;
    };

    let key = AuthorizationKey::new(ACTION_READ, path, token);
    match state.service.lookup(&key, None).await {
        Ok(true) => StatusCode::OK,
        Ok(false) => StatusCode::FORBIDDEN,
        Err(e) => {
            tracing::error!(path = %key.path, error = %e, "Error while validating auth");
            StatusCode::FORBIDDEN
        }
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
}

/// Stream path (file stem of the last segment) and token of a forwarded URI
fn parse_target(uri: &str, token_key: &str) -> Option<(String, String)> {
    let base = Url::parse("http://forward.invalid/").ok()?;
    let target = base.join(uri).ok()?;

    let file = target
        .path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .unwrap_or_default();
    let stem = match file.rfind('.') {
        Some(dot) => &file[..dot],
        None => file,
    };

    let token = target
        .query()
        .and_then(|query| query_param(query, token_key))
        .unwrap_or_default();
    Some((stem.to_string(), token))
}
