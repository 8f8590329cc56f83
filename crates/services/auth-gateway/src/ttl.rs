//! Concurrent TTL map with an eviction observer
//!
//! Storage mechanics only: what happens to an evicted entry is decided by the
//! [`EvictionHook`] the store is built with. Reads never move an entry's
//! expiry; only inserts, renewals and [`TtlStore::renew_if`] do.
//!
//! Expired entries are invisible to reads immediately and are handed to the
//! hook by [`TtlStore::purge_expired`], which the sweeper task runs on an
//! interval. An expired entry stays in the map, marked as evicting, while its
//! hook runs. Each expiry is observed exactly once, and an explicit
//! [`TtlStore::remove`] in that window still returns the value and cancels a
//! pending renewal.

use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::join_all;
use tokio::sync::broadcast;
use tokio::time::Instant;

/// Cap for deadlines that would overflow `Instant`
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

fn deadline(now: Instant, ttl: Duration) -> Instant {
    now.checked_add(ttl).unwrap_or_else(|| now + FAR_FUTURE)
}

/// Why an entry left the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionReason {
    /// The entry's time-to-live elapsed
    Expired,

    /// The entry was removed explicitly
    Removed,
}

/// What the store should do with an evicted entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionDecision {
    /// Re-insert with a fresh default TTL (honored for expiry only)
    Renew,

    /// Let the entry go
    Drop,
}

/// Observer invoked once for every evicted entry
#[async_trait]
pub trait EvictionHook<K, V>: Send + Sync {
    async fn on_evict(&self, key: &K, value: &V, reason: EvictionReason) -> EvictionDecision;

    /// Called instead of re-inserting when a renewed entry finds its key
    /// already re-populated by a concurrent writer.
    fn merge(&self, _current: &V, _renewed: V) {}
}

/// Hook that lets every entry lapse
pub struct NoopHook;

#[async_trait]
impl<K: Sync, V: Sync> EvictionHook<K, V> for NoopHook {
    async fn on_evict(&self, _key: &K, _value: &V, _reason: EvictionReason) -> EvictionDecision {
        EvictionDecision::Drop
    }
}

struct Slot<V> {
    value: V,
    expires_at: Instant,
    /// Expired and currently being handed to the hook
    evicting: bool,
}

impl<V> Slot<V> {
    fn new(value: V, expires_at: Instant) -> Self {
        Self {
            value,
            expires_at,
            evicting: false,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }
}

/// TTL map backed by a sharded concurrent hash map
pub struct TtlStore<K, V> {
    entries: DashMap<K, Slot<V>>,
    default_ttl: Duration,
    hook: Arc<dyn EvictionHook<K, V>>,
}

impl<K, V> TtlStore<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Create a store with the given default TTL and eviction observer
    pub fn new(default_ttl: Duration, hook: Arc<dyn EvictionHook<K, V>>) -> Self {
        Self {
            entries: DashMap::new(),
            default_ttl,
            hook,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Get a live entry. Does not extend its expiry.
    pub fn get(&self, key: &K) -> Option<V> {
        let slot = self.entries.get(key)?;
        if slot.is_expired(Instant::now()) {
            return None;
        }
        Some(slot.value.clone())
    }

    /// Insert or replace with the default TTL
    pub fn insert(&self, key: K, value: V) {
        self.insert_with_ttl(key, value, self.default_ttl);
    }

    /// Insert or replace with an explicit TTL
    pub fn insert_with_ttl(&self, key: K, value: V, ttl: Duration) {
        self.entries
            .insert(key, Slot::new(value, deadline(Instant::now(), ttl)));
    }

    /// Return the live entry for `key`, or insert `value` with the default TTL.
    ///
    /// A stale entry still waiting for the sweeper is displaced and goes
    /// through the eviction hook before this returns.
    pub async fn get_or_insert(&self, key: K, value: V) -> V {
        let now = Instant::now();
        let displaced = match self.entries.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                if !occupied.get().is_expired(now) {
                    return occupied.get().value.clone();
                }
                let fresh = Slot::new(value.clone(), deadline(now, self.default_ttl));
                let stale = std::mem::replace(occupied.get_mut(), fresh);
                if stale.evicting {
                    // The sweep already owns the stale value's eviction
                    return value;
                }
                stale.value
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Slot::new(value.clone(), deadline(now, self.default_ttl)));
                return value;
            }
        };

        self.evict(key, displaced, EvictionReason::Expired).await;
        value
    }

    /// Remove an entry and run the eviction hook for it.
    ///
    /// Returns the value even if it had expired but was not yet swept. An
    /// entry whose expiry hook is in flight is returned without a second
    /// hook call, and will not be renewed.
    pub async fn remove(&self, key: &K) -> Option<V> {
        let (key, slot) = self.entries.remove(key)?;
        if !slot.evicting {
            self.evict(key, slot.value.clone(), EvictionReason::Removed)
                .await;
        }
        Some(slot.value)
    }

    /// Get an entry even if it has expired and awaits eviction
    pub fn peek(&self, key: &K) -> Option<V> {
        self.entries.get(key).map(|slot| slot.value.clone())
    }

    /// Reset a live entry's expiry to the default TTL if `predicate` accepts it
    pub fn renew_if(&self, key: &K, predicate: impl FnOnce(&V) -> bool) -> bool {
        let Some(mut slot) = self.entries.get_mut(key) else {
            return false;
        };
        let now = Instant::now();
        if slot.is_expired(now) || !predicate(&slot.value) {
            return false;
        }
        slot.expires_at = deadline(now, self.default_ttl);
        true
    }

    /// Mutate a live entry in place, keeping its expiry
    pub fn modify(&self, key: &K, f: impl FnOnce(&mut V)) -> bool {
        let Some(mut slot) = self.entries.get_mut(key) else {
            return false;
        };
        if slot.is_expired(Instant::now()) {
            return false;
        }
        f(&mut slot.value);
        true
    }

    /// Number of entries, including expired ones not yet swept
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Time left before `key` expires, if it is live
    pub fn ttl_remaining(&self, key: &K) -> Option<Duration> {
        let slot = self.entries.get(key)?;
        let now = Instant::now();
        if slot.is_expired(now) {
            return None;
        }
        Some(slot.expires_at - now)
    }

    /// Evict every expired entry, running hooks concurrently.
    ///
    /// Returns the number of entries evicted.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let evicting: Vec<(K, V)> = self
            .entries
            .iter_mut()
            .filter_map(|mut slot| {
                if slot.evicting || !slot.is_expired(now) {
                    return None;
                }
                slot.evicting = true;
                Some((slot.key().clone(), slot.value.clone()))
            })
            .collect();

        let count = evicting.len();
        join_all(
            evicting
                .into_iter()
                .map(|(key, value)| self.expire_in_place(key, value)),
        )
        .await;
        count
    }

    /// Run the expiry hook for a slot marked as evicting, then settle it
    async fn expire_in_place(&self, key: K, value: V) {
        let decision = self.hook.on_evict(&key, &value, EvictionReason::Expired).await;
        match self.entries.entry(key) {
            Entry::Occupied(mut occupied) if occupied.get().evicting => {
                if decision == EvictionDecision::Renew {
                    let slot = occupied.get_mut();
                    slot.evicting = false;
                    slot.expires_at = deadline(Instant::now(), self.default_ttl);
                } else {
                    occupied.remove();
                }
            }
            // Re-populated by a writer while the hook ran
            Entry::Occupied(occupied) => {
                if decision == EvictionDecision::Renew {
                    self.hook.merge(&occupied.get().value, value);
                }
            }
            // Removed explicitly while the hook ran
            Entry::Vacant(_) => {}
        }
    }

    /// Run the hook for a value already detached from its slot
    async fn evict(&self, key: K, value: V, reason: EvictionReason) {
        let decision = self.hook.on_evict(&key, &value, reason).await;
        if decision == EvictionDecision::Renew && reason == EvictionReason::Expired {
            self.renew(key, value);
        }
    }

    fn renew(&self, key: K, value: V) {
        let now = Instant::now();
        match self.entries.entry(key) {
            Entry::Occupied(occupied) if !occupied.get().is_expired(now) => {
                self.hook.merge(&occupied.get().value, value);
            }
            Entry::Occupied(mut occupied) => {
                occupied.insert(Slot::new(value, deadline(now, self.default_ttl)));
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Slot::new(value, deadline(now, self.default_ttl)));
            }
        }
    }

    /// Run the periodic expiry sweep until shutdown is signalled
    pub async fn run_sweeper(
        self: Arc<Self>,
        name: &'static str,
        interval: Duration,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        tracing::info!(store = name, interval_ms = interval.as_millis() as u64, "Expiry sweeper started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    let evicted = self.purge_expired().await;
                    if evicted > 0 {
                        tracing::debug!(store = name, evicted, "Swept expired entries");
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!(store = name, "Expiry sweeper shutting down");
                    break;
                }
            }
        }
    }
}
