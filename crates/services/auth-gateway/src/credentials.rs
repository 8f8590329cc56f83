//! Credential cache: cached authorization decisions and the sessions relying on them
//!
//! When a decision expires while sessions still depend on it, the grant is
//! re-checked against the backing store. A grant that still exists is renewed;
//! one that is gone (or cannot be checked) has its sessions kicked.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::control::RevocationController;
use crate::metrics::global_metrics;
use crate::model::AuthorizationKey;
use crate::registry::SessionRegistry;
use crate::store::AuthStore;
use crate::ttl::{EvictionDecision, EvictionHook, EvictionReason, TtlStore};

/// Ordered session ids guarded by the owning record's own lock
#[derive(Debug, Default)]
pub struct SessionSet {
    ids: Mutex<Vec<String>>,
}

impl SessionSet {
    /// Add an id. Duplicates are ignored.
    pub fn add(&self, id: &str) {
        let mut ids = self.ids.lock();
        if !ids.iter().any(|existing| existing == id) {
            ids.push(id.to_string());
        }
    }

    pub fn remove(&self, id: &str) -> bool {
        let mut ids = self.ids.lock();
        match ids.iter().position(|existing| existing == id) {
            Some(index) => {
                ids.remove(index);
                true
            }
            None => false,
        }
    }

    /// Take every id, leaving the set empty
    pub fn drain(&self) -> Vec<String> {
        std::mem::take(&mut *self.ids.lock())
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.ids.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.ids.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.lock().is_empty()
    }
}

/// Cached decision for one authorization key
#[derive(Debug, Default)]
pub struct AuthorizationRecord {
    valid: AtomicBool,
    sessions: SessionSet,
}

impl AuthorizationRecord {
    pub fn new(valid: bool) -> Self {
        Self {
            valid: AtomicBool::new(valid),
            sessions: SessionSet::default(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    pub fn set_valid(&self, valid: bool) {
        self.valid.store(valid, Ordering::Release);
    }

    pub fn sessions(&self) -> &SessionSet {
        &self.sessions
    }
}

/// Authorization key → shared decision record
pub struct CredentialCache {
    entries: Arc<TtlStore<AuthorizationKey, Arc<AuthorizationRecord>>>,
}

impl CredentialCache {
    /// Create a cache whose expiring records are re-validated against `store`
    pub fn new(
        ttl: Duration,
        store: Arc<dyn AuthStore>,
        registry: Arc<SessionRegistry>,
        controller: Arc<RevocationController>,
    ) -> Self {
        Self::with_hook(
            ttl,
            Arc::new(Revalidation {
                store,
                registry,
                controller,
            }),
        )
    }

    pub fn with_hook(
        ttl: Duration,
        hook: Arc<dyn EvictionHook<AuthorizationKey, Arc<AuthorizationRecord>>>,
    ) -> Self {
        Self {
            entries: Arc::new(TtlStore::new(ttl, hook)),
        }
    }

    /// Cached record for `key`. Never extends its expiry.
    pub fn get(&self, key: &AuthorizationKey) -> Option<Arc<AuthorizationRecord>> {
        self.entries.get(key)
    }

    pub fn insert(&self, key: AuthorizationKey, record: Arc<AuthorizationRecord>) {
        self.entries.insert(key, record);
    }

    pub fn insert_with_ttl(
        &self,
        key: AuthorizationKey,
        record: Arc<AuthorizationRecord>,
        ttl: Duration,
    ) {
        self.entries.insert_with_ttl(key, record, ttl);
    }

    /// Cache `record` unless a concurrent lookup already cached one for `key`
    pub async fn get_or_insert(
        &self,
        key: AuthorizationKey,
        record: Arc<AuthorizationRecord>,
    ) -> Arc<AuthorizationRecord> {
        self.entries.get_or_insert(key, record).await
    }

    /// Get a record even if it has expired and is awaiting re-validation
    pub fn peek(&self, key: &AuthorizationKey) -> Option<Arc<AuthorizationRecord>> {
        self.entries.peek(key)
    }

    /// Forget a record, running the eviction policy for its sessions
    pub async fn remove(&self, key: &AuthorizationKey) -> Option<Arc<AuthorizationRecord>> {
        self.entries.remove(key).await
    }

    /// Flip a cached denial to valid and restart its TTL.
    ///
    /// Returns false when the key is not cached or already valid.
    pub fn promote(&self, key: &AuthorizationKey) -> bool {
        self.entries.renew_if(key, |record| {
            if record.is_valid() {
                return false;
            }
            record.set_valid(true);
            true
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ttl_remaining(&self, key: &AuthorizationKey) -> Option<Duration> {
        self.entries.ttl_remaining(key)
    }

    /// Run the eviction policy for every expired record now
    pub async fn purge_expired(&self) -> usize {
        self.entries.purge_expired().await
    }

    /// Run the periodic expiry sweep until shutdown
    pub async fn run_sweeper(&self, interval: Duration, shutdown_rx: broadcast::Receiver<()>) {
        self.entries
            .clone()
            .run_sweeper("credentials", interval, shutdown_rx)
            .await;
    }
}

/// Eviction policy: re-check grants that sessions still rely on
struct Revalidation {
    store: Arc<dyn AuthStore>,
    registry: Arc<SessionRegistry>,
    controller: Arc<RevocationController>,
}

impl Revalidation {
    /// Kick every tracked session of `record` and forget them
    async fn revoke(&self, key: &AuthorizationKey, record: &AuthorizationRecord) {
        global_metrics().revoked();
        let ids = record.sessions().drain();
        tracing::info!(path = %key.path, action = %key.action, sessions = ids.len(), "Revoking grant");

        let kicks = ids.into_iter().map(|id| async move {
            match self.registry.remove(&id).await {
                Some(tracked) => {
                    self.controller
                        .kick(&tracked.session, Some(key.action.as_str()))
                        .await;
                }
                None => {
                    // Already disconnected or never tracked (allow-listed traffic)
                    tracing::debug!(session_id = %id, "Untracked session, nothing to kick");
                }
            }
        });
        join_all(kicks).await;
    }
}

#[async_trait]
impl EvictionHook<AuthorizationKey, Arc<AuthorizationRecord>> for Revalidation {
    async fn on_evict(
        &self,
        key: &AuthorizationKey,
        record: &Arc<AuthorizationRecord>,
        reason: EvictionReason,
    ) -> EvictionDecision {
        if record.sessions().is_empty() {
            return EvictionDecision::Drop;
        }

        match self.store.exists(key).await {
            Ok(true) => {
                tracing::debug!(path = %key.path, action = %key.action, ?reason, "Grant still valid, renewing");
                EvictionDecision::Renew
            }
            Ok(false) => {
                self.revoke(key, record).await;
                EvictionDecision::Drop
            }
            Err(e) => {
                global_metrics().store_error();
                tracing::warn!(path = %key.path, action = %key.action, error = %e, "Re-validation failed, revoking");
                self.revoke(key, record).await;
                EvictionDecision::Drop
            }
        }
    }

    fn merge(&self, current: &Arc<AuthorizationRecord>, renewed: Arc<AuthorizationRecord>) {
        for id in renewed.sessions().drain() {
            current.sessions().add(&id);
        }
    }
}
