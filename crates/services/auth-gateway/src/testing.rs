//! In-memory fakes for unit tests

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::Notify;
use url::Url;

use crate::api::AppState;
use crate::config::Config;
use crate::control::{ControlPlaneClient, ControlPlaneError, RevocationController};
use crate::model::AuthorizationKey;
use crate::service::AuthService;
use crate::store::{AuthStore, StoreError};

/// Grant store that counts queries and can be told to fail
#[derive(Default)]
pub struct MemoryStore {
    grants: Mutex<Vec<(AuthorizationKey, DateTime<Utc>)>>,
    failing: AtomicBool,
    exists_calls: AtomicUsize,
    scan_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn grant(&self, key: AuthorizationKey) {
        self.grant_at(key, Utc::now());
    }

    pub fn grant_at(&self, key: AuthorizationKey, created_at: DateTime<Utc>) {
        self.grants.lock().push((key, created_at));
    }

    pub fn revoke(&self, key: &AuthorizationKey) {
        self.grants.lock().retain(|(granted, _)| granted != key);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn exists_calls(&self) -> usize {
        self.exists_calls.load(Ordering::SeqCst)
    }

    pub fn scan_calls(&self) -> usize {
        self.scan_calls.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Task("store unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl AuthStore for MemoryStore {
    async fn exists(&self, key: &AuthorizationKey) -> Result<bool, StoreError> {
        self.exists_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        Ok(self.grants.lock().iter().any(|(granted, _)| granted == key))
    }

    async fn created_since(&self, since: DateTime<Utc>) -> Result<Vec<AuthorizationKey>, StoreError> {
        self.scan_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        Ok(self
            .grants
            .lock()
            .iter()
            .filter(|(_, created_at)| *created_at > since)
            .map(|(key, _)| key.clone())
            .collect())
    }

    async fn schema_version(&self) -> Result<DateTime<Utc>, StoreError> {
        self.check()?;
        Ok(Utc::now())
    }
}

/// Control plane that records every call
#[derive(Default)]
pub struct RecordingControlPlane {
    alive: Mutex<HashSet<String>>,
    gets: Mutex<Vec<String>>,
    posts: Mutex<Vec<String>>,
    failing: bool,
    gate: Option<GetGate>,
}

/// Parks liveness GETs until released
#[derive(Default)]
struct GetGate {
    entered: Notify,
    release: Notify,
}

impl RecordingControlPlane {
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Default::default()
        }
    }

    /// Every GET waits for [`Self::release_get`] before answering
    pub fn holding_gets() -> Self {
        Self {
            gate: Some(GetGate::default()),
            ..Default::default()
        }
    }

    /// Wait until a held GET is in flight
    pub async fn get_entered(&self) {
        if let Some(gate) = &self.gate {
            gate.entered.notified().await;
        }
    }

    pub fn release_get(&self) {
        if let Some(gate) = &self.gate {
            gate.release.notify_one();
        }
    }

    pub fn set_alive(&self, url: &str) {
        self.alive.lock().insert(url.to_string());
    }

    pub fn gets(&self) -> Vec<String> {
        self.gets.lock().clone()
    }

    pub fn posts(&self) -> Vec<String> {
        self.posts.lock().clone()
    }

    fn failure(url: &Url) -> ControlPlaneError {
        ControlPlaneError::InvalidUrl {
            url: url.to_string(),
            reason: "connection refused".to_string(),
        }
    }
}

#[async_trait]
impl ControlPlaneClient for RecordingControlPlane {
    async fn get(&self, url: &Url) -> Result<bool, ControlPlaneError> {
        self.gets.lock().push(url.to_string());
        if let Some(gate) = &self.gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        if self.failing {
            return Err(Self::failure(url));
        }
        Ok(self.alive.lock().contains(url.as_str()))
    }

    async fn post(&self, url: &Url) -> Result<u16, ControlPlaneError> {
        self.posts.lock().push(url.to_string());
        if self.failing {
            return Err(Self::failure(url));
        }
        Ok(200)
    }
}

/// Router state over the given fakes, with the control-plane bases from `config`
pub fn app_state(
    store: Arc<MemoryStore>,
    client: Arc<RecordingControlPlane>,
    config: Config,
) -> AppState {
    let controller = RevocationController::new(
        &config.control_plane.primary_url,
        &config.control_plane.publish_url,
        client,
    )
    .unwrap();
    let service = AuthService::new(
        store,
        Arc::new(controller),
        config.database.cache_duration(),
        Duration::from_secs(3600),
    );
    AppState::new(Arc::new(service), Arc::new(config)).unwrap()
}
