//! Registry of live sessions and the grants that authorized them
//!
//! Expiry here is a periodic liveness sweep, not a deadline: when a record's
//! TTL elapses the control plane is asked whether the session still exists,
//! and the record is renewed if it does.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::control::RevocationController;
use crate::model::{Protocol, SessionRecord};
use crate::ttl::{EvictionDecision, EvictionHook, EvictionReason, TtlStore};

/// Session id → tracked session
pub struct SessionRegistry {
    sessions: Arc<TtlStore<String, SessionRecord>>,
}

impl SessionRegistry {
    /// Create a registry whose expired records are re-checked through `controller`
    pub fn new(ttl: Duration, controller: Arc<RevocationController>) -> Self {
        Self::with_hook(ttl, Arc::new(LivenessCheck { controller }))
    }

    pub fn with_hook(ttl: Duration, hook: Arc<dyn EvictionHook<String, SessionRecord>>) -> Self {
        Self {
            sessions: Arc::new(TtlStore::new(ttl, hook)),
        }
    }

    /// Track a session with the default TTL, replacing any previous record
    pub fn register(&self, id: impl Into<String>, record: SessionRecord) {
        self.sessions.insert(id.into(), record);
    }

    /// Fill in the concrete protocol reported by a connect notification.
    ///
    /// Keeps the record's expiry. Returns false for untracked sessions.
    pub fn update_protocol(&self, id: &str, protocol: Protocol) -> bool {
        self.sessions
            .modify(&id.to_string(), |record| record.session.protocol = protocol)
    }

    /// Stop tracking a session
    pub async fn remove(&self, id: &str) -> Option<SessionRecord> {
        self.sessions.remove(&id.to_string()).await
    }

    pub fn get(&self, id: &str) -> Option<SessionRecord> {
        self.sessions.get(&id.to_string())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn ttl_remaining(&self, id: &str) -> Option<Duration> {
        self.sessions.ttl_remaining(&id.to_string())
    }

    /// Re-check every expired record now
    pub async fn purge_expired(&self) -> usize {
        self.sessions.purge_expired().await
    }

    /// Run the periodic liveness sweep until shutdown
    pub async fn run_sweeper(&self, interval: Duration, shutdown_rx: broadcast::Receiver<()>) {
        self.sessions
            .clone()
            .run_sweeper("sessions", interval, shutdown_rx)
            .await;
    }
}

/// Renews sessions the media server still reports, drops the rest
struct LivenessCheck {
    controller: Arc<RevocationController>,
}

#[async_trait]
impl EvictionHook<String, SessionRecord> for LivenessCheck {
    async fn on_evict(
        &self,
        id: &String,
        record: &SessionRecord,
        reason: EvictionReason,
    ) -> EvictionDecision {
        if reason != EvictionReason::Expired {
            return EvictionDecision::Drop;
        }

        if self.controller.is_alive(&record.session, record.action()).await {
            tracing::debug!(session_id = %id, "Session still alive, renewing");
            EvictionDecision::Renew
        } else {
            tracing::debug!(session_id = %id, protocol = %record.session.protocol, "Session gone, dropping");
            EvictionDecision::Drop
        }
    }
}
