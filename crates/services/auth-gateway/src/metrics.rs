//! Metrics collection for the auth gateway
//!
//! Plain atomic counters, exposed as a JSON snapshot on `/metrics`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Gateway metrics collector
#[derive(Default)]
pub struct Metrics {
    /// Authorization lookups served
    lookups: AtomicU64,

    /// Lookups answered from the credential cache
    cache_hits: AtomicU64,

    /// Lookups that went to the backing store
    cache_misses: AtomicU64,

    /// Backing-store queries that failed
    store_errors: AtomicU64,

    /// Sessions registered against a grant
    sessions_registered: AtomicU64,

    /// Sessions removed by a disconnect notification
    sessions_disconnected: AtomicU64,

    /// Grants whose sessions were revoked
    revocations: AtomicU64,

    /// Kick calls issued to the control plane
    kick_attempts: AtomicU64,

    /// Kick calls that failed
    kick_failures: AtomicU64,

    /// Liveness checks against the control plane
    liveness_checks: AtomicU64,

    /// Cached denials promoted by the poller
    promotions: AtomicU64,

    /// Startup timestamp (unix seconds)
    startup_time: AtomicU64,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        Self {
            startup_time: AtomicU64::new(now),
            ..Default::default()
        }
    }

    pub fn lookup(&self, cache_hit: bool) {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        if cache_hit {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.cache_misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn store_error(&self) {
        self.store_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_registered(&self) {
        self.sessions_registered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_disconnected(&self) {
        self.sessions_disconnected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn revoked(&self) {
        self.revocations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn kick_attempted(&self) {
        self.kick_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn kick_failed(&self) {
        self.kick_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn liveness_checked(&self) {
        self.liveness_checks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn promoted(&self, count: u64) {
        self.promotions.fetch_add(count, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        MetricsSnapshot {
            lookups: self.lookups.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            store_errors: self.store_errors.load(Ordering::Relaxed),
            sessions_registered: self.sessions_registered.load(Ordering::Relaxed),
            sessions_disconnected: self.sessions_disconnected.load(Ordering::Relaxed),
            revocations: self.revocations.load(Ordering::Relaxed),
            kick_attempts: self.kick_attempts.load(Ordering::Relaxed),
            kick_failures: self.kick_failures.load(Ordering::Relaxed),
            liveness_checks: self.liveness_checks.load(Ordering::Relaxed),
            promotions: self.promotions.load(Ordering::Relaxed),
            uptime_secs: now.saturating_sub(self.startup_time.load(Ordering::Relaxed)),
        }
    }
}

/// Snapshot of current metrics
#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSnapshot {
    pub lookups: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub store_errors: u64,
    pub sessions_registered: u64,
    pub sessions_disconnected: u64,
    pub revocations: u64,
    pub kick_attempts: u64,
    pub kick_failures: u64,
    pub liveness_checks: u64,
    pub promotions: u64,
    pub uptime_secs: u64,
}

impl MetricsSnapshot {
    /// Fraction of lookups answered without a store query
    pub fn cache_hit_rate(&self) -> f64 {
        if self.lookups == 0 {
            0.0
        } else {
            self.cache_hits as f64 / self.lookups as f64
        }
    }
}

/// Global metrics instance
static GLOBAL_METRICS: std::sync::OnceLock<Arc<Metrics>> = std::sync::OnceLock::new();

/// Get the global metrics instance
pub fn global_metrics() -> Arc<Metrics> {
    GLOBAL_METRICS
        .get_or_init(|| Arc::new(Metrics::new()))
        .clone()
}
