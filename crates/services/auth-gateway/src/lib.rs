//! Stream Authorization Gateway
//!
//! External authentication backend for MediaMTX. Decides whether a client
//! may read, publish or play back a stream path, caches the decision, and
//! revokes live sessions through the MediaMTX control API once their grant
//! is withdrawn.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      remotemedia-auth-gateway                           │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌──────────────────┐                                                   │
//! │  │  HTTP API Server │ ← POST /auth        (MediaMTX auth hook)          │
//! │  │  (axum)          │ ← GET  /connection  (connect / disconnect)        │
//! │  └────────┬─────────┘ ← GET  /forward     (thumbnail forward-auth)      │
//! │           │ lookup                                                      │
//! │           ▼                                                             │
//! │  ┌──────────────────┐   miss   ┌──────────────────┐                     │
//! │  │  AuthService     │─────────▶│  SQLite grants   │◀──── Poller         │
//! │  └───┬──────────┬───┘          └──────────────────┘   (promotes denials)│
//! │      │          │                       ▲                               │
//! │      ▼          ▼                       │ re-validate on expiry         │
//! │  ┌──────────┐ ┌─────────────────┐       │                               │
//! │  │ Session  │ │ CredentialCache │───────┘                               │
//! │  │ Registry │ │ (key → record)  │                                       │
//! │  └────┬─────┘ └────────┬────────┘                                       │
//! │       │ liveness       │ revoke                                         │
//! │       ▼                ▼                                                │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │  RevocationController → MediaMTX /v3/{collection}/{get,kick}/{id} │  │
//! │  └──────────────────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod access;
pub mod api;
pub mod config;
pub mod control;
pub mod credentials;
pub mod error;
pub mod metrics;
pub mod model;
pub mod poller;
pub mod registry;
pub mod service;
pub mod store;
pub mod ttl;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};
