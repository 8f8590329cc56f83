//! Authorization service: the lookup/connect/disconnect façade
//!
//! Ties the credential cache, the session registry and the backing store
//! together. Request handlers only ever talk to [`AuthService`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::control::{is_persistent, RevocationController};
use crate::credentials::{AuthorizationRecord, CredentialCache};
use crate::metrics::global_metrics;
use crate::model::{AuthorizationKey, Session, SessionRecord};
use crate::poller::Poller;
use crate::registry::SessionRegistry;
use crate::store::AuthStore;
use crate::Result;

/// Background task intervals
#[derive(Debug, Clone, Copy)]
pub struct TaskIntervals {
    /// How often each TTL map is swept for expired entries
    pub sweep: Duration,

    /// How often the poller scans for new grants
    pub poll: Duration,
}

/// Authorization façade shared by every request handler
pub struct AuthService {
    cache: Arc<CredentialCache>,
    registry: Arc<SessionRegistry>,
    store: Arc<dyn AuthStore>,
}

impl AuthService {
    /// Wire the caches to `store` and `controller`
    pub fn new(
        store: Arc<dyn AuthStore>,
        controller: Arc<RevocationController>,
        cache_ttl: Duration,
        session_ttl: Duration,
    ) -> Self {
        let registry = Arc::new(SessionRegistry::new(session_ttl, controller.clone()));
        let cache = Arc::new(CredentialCache::new(
            cache_ttl,
            store.clone(),
            registry.clone(),
            controller,
        ));
        Self::from_parts(cache, registry, store)
    }

    pub fn from_parts(
        cache: Arc<CredentialCache>,
        registry: Arc<SessionRegistry>,
        store: Arc<dyn AuthStore>,
    ) -> Self {
        Self {
            cache,
            registry,
            store,
        }
    }

    pub fn cache(&self) -> &Arc<CredentialCache> {
        &self.cache
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Decide whether `key` is authorized, registering `session` when it is.
    ///
    /// A cached decision is returned without touching the store. A store
    /// failure on a miss is returned as an error and nothing is cached.
    pub async fn lookup(&self, key: &AuthorizationKey, session: Option<Session>) -> Result<bool> {
        if let Some(record) = self.cache.get(key) {
            global_metrics().lookup(true);
            let valid = record.is_valid();
            if valid {
                if let Some(session) = session {
                    self.register(key, &record, session);
                }
            }
            tracing::debug!(path = %key.path, action = %key.action, valid, "Cache hit");
            return Ok(valid);
        }

        global_metrics().lookup(false);
        let valid = match self.store.exists(key).await {
            Ok(valid) => valid,
            Err(e) => {
                global_metrics().store_error();
                return Err(e.into());
            }
        };

        // A concurrent miss for the same key may have cached first; use its record
        let record = self
            .cache
            .get_or_insert(key.clone(), Arc::new(AuthorizationRecord::new(valid)))
            .await;
        let valid = record.is_valid();
        if valid {
            if let Some(session) = session {
                self.register(key, &record, session);
            }
        }
        tracing::debug!(path = %key.path, action = %key.action, valid, "Cache miss");
        Ok(valid)
    }

    fn register(&self, key: &AuthorizationKey, record: &AuthorizationRecord, session: Session) {
        global_metrics().session_registered();

        if !is_persistent(&session.protocol) {
            tracing::debug!(session_id = %session.id, protocol = %session.protocol, "Non-persistent session, not attached");
            self.registry.register(
                session.id.clone(),
                SessionRecord {
                    session,
                    authorization: None,
                },
            );
            return;
        }

        record.sessions().add(&session.id);
        self.registry.register(
            session.id.clone(),
            SessionRecord {
                session,
                authorization: Some(key.clone()),
            },
        );
    }

    /// Record the concrete protocol of a session that just connected.
    ///
    /// A connect for a session no lookup has registered yet is ignored.
    pub fn connect(&self, session: &Session) -> bool {
        let updated = self
            .registry
            .update_protocol(&session.id, session.protocol.clone());
        if !updated {
            tracing::debug!(session_id = %session.id, protocol = %session.protocol, "Connect for untracked session");
        }
        updated
    }

    /// Forget a session that disconnected.
    ///
    /// Also detaches it from a grant whose record has expired but is still
    /// being re-validated.
    pub async fn disconnect(&self, session: &Session) -> Option<SessionRecord> {
        let Some(record) = self.registry.remove(&session.id).await else {
            tracing::debug!(session_id = %session.id, "Disconnect for untracked session");
            return None;
        };
        global_metrics().session_disconnected();

        if let Some(key) = &record.authorization {
            if let Some(credentials) = self.cache.peek(key) {
                credentials.sessions().remove(&session.id);
            }
        }
        Some(record)
    }

    /// Spawn the cache sweeper, the registry sweeper and the poller.
    ///
    /// Each task stops when `shutdown_tx` broadcasts.
    pub fn spawn_background_tasks(
        &self,
        intervals: TaskIntervals,
        shutdown_tx: &broadcast::Sender<()>,
    ) -> Vec<JoinHandle<()>> {
        let cache = self.cache.clone();
        let cache_shutdown = shutdown_tx.subscribe();
        let cache_sweeper = tokio::spawn(async move {
            cache.run_sweeper(intervals.sweep, cache_shutdown).await;
        });

        let registry = self.registry.clone();
        let registry_shutdown = shutdown_tx.subscribe();
        let registry_sweeper = tokio::spawn(async move {
            registry.run_sweeper(intervals.sweep, registry_shutdown).await;
        });

        let poller = Arc::new(Poller::new(self.cache.clone(), self.store.clone(), intervals.poll));
        let poller_task = tokio::spawn(poller.run(shutdown_tx.subscribe()));

        vec![cache_sweeper, registry_sweeper, poller_task]
    }
}
