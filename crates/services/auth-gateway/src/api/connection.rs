//! Connect/disconnect notifications from MediaMTX hooks
//!
//! Invoked with GET so that the hook can use `wget` from inside the media
//! server container.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use serde::Deserialize;

use super::AppState;
use crate::model::{Protocol, Session};

#[derive(Debug, Default, Deserialize)]
pub struct ConnectionParams {
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub id: String,
    #[serde(default, rename = "type")]
    pub kind: String,
}

/// `GET /connection?action=connect|disconnect&id=..&type=..`
pub async fn notify(
    State(state): State<AppState>,
    Query(params): Query<ConnectionParams>,
) -> StatusCode {
    let session = Session::new(params.id, Protocol::parse(&params.kind));

    if params.action == "connect" {
        state.service.connect(&session);
    } else {
        // Anything else is treated as a disconnect
        state.service.disconnect(&session).await;
    }
    StatusCode::OK
}
