//! Background promotion of newly granted authorizations
//!
//! A client denied moments before its grant lands would otherwise wait out the
//! full cache TTL. Each cycle scans grants created since the previous cycle
//! and flips matching cached denials to valid. Keys nobody asked for are not
//! warmed.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;

use crate::credentials::CredentialCache;
use crate::metrics::global_metrics;
use crate::store::AuthStore;

/// Periodic grant scanner
pub struct Poller {
    cache: Arc<CredentialCache>,
    store: Arc<dyn AuthStore>,
    interval: Duration,
    last_poll: Mutex<DateTime<Utc>>,
}

impl Poller {
    pub fn new(cache: Arc<CredentialCache>, store: Arc<dyn AuthStore>, interval: Duration) -> Self {
        Self {
            cache,
            store,
            interval,
            last_poll: Mutex::new(Utc::now()),
        }
    }

    /// High-water mark of the last completed scan
    pub fn last_poll(&self) -> DateTime<Utc> {
        *self.last_poll.lock()
    }

    /// Run one cycle. Returns the number of keys promoted.
    pub async fn poll_once(&self) -> usize {
        let since = std::mem::replace(&mut *self.last_poll.lock(), Utc::now());

        if self.cache.is_empty() {
            return 0;
        }

        let keys = match self.store.created_since(since).await {
            Ok(keys) => keys,
            Err(e) => {
                global_metrics().store_error();
                tracing::warn!(error = %e, since = %since, "Grant scan failed, retrying next cycle");
                *self.last_poll.lock() = since;
                return 0;
            }
        };

        let mut promoted = 0;
        for key in &keys {
            if self.cache.promote(key) {
                tracing::info!(path = %key.path, action = %key.action, "Promoted cached denial");
                promoted += 1;
            }
        }

        if promoted > 0 {
            global_metrics().promoted(promoted as u64);
        }
        tracing::debug!(scanned = keys.len(), promoted, "Poll cycle complete");
        promoted
    }

    /// Poll once right away, then on the configured interval until shutdown
    pub async fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        tracing::info!(interval_secs = self.interval.as_secs(), "Poller started");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.poll_once().await;
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("Poller shutting down");
                    break;
                }
            }
        }
    }
}
