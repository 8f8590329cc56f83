//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use tempfile::TempDir;
use url::Url;

use remotemedia_auth_gateway::control::{ControlPlaneClient, ControlPlaneError};
use remotemedia_auth_gateway::model::AuthorizationKey;
use remotemedia_auth_gateway::store::{AuthStore, SqliteStore, StoreError};

pub const SCHEMA: &str = include_str!("../fixtures/schema.sql");

/// Temporary grant database with a writer connection
pub struct GrantDb {
    _dir: TempDir,
    path: PathBuf,
    writer: Connection,
}

impl GrantDb {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("auth.db");
        let writer = Connection::open(&path).unwrap();
        writer.execute_batch(SCHEMA).unwrap();
        Self {
            _dir: dir,
            path,
            writer,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn grant(&self, key: &AuthorizationKey) {
        self.grant_at(key, Utc::now());
    }

    pub fn grant_at(&self, key: &AuthorizationKey, created_at: DateTime<Utc>) {
        self.writer
            .execute(
                "INSERT INTO stream_auth (path, action, queryToken, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    key.path,
                    key.action,
                    key.query_token,
                    created_at.to_rfc3339_opts(SecondsFormat::Millis, true)
                ],
            )
            .unwrap();
    }

    pub fn revoke(&self, key: &AuthorizationKey) {
        self.writer
            .execute(
                "DELETE FROM stream_auth WHERE path = ?1 AND action = ?2 AND queryToken = ?3",
                params![key.path, key.action, key.query_token],
            )
            .unwrap();
    }

    pub fn set_schema_version(&self, version: &str) {
        self.writer
            .execute(
                "UPDATE versions SET version = ?1 WHERE application = 'db_version'",
                params![version],
            )
            .unwrap();
    }

    pub fn open_store(&self) -> Arc<CountingStore> {
        let store = SqliteStore::open(&self.path, Duration::from_secs(5)).unwrap();
        Arc::new(CountingStore::new(store))
    }
}

/// Store wrapper that counts existence queries
pub struct CountingStore {
    inner: SqliteStore,
    exists_calls: AtomicUsize,
}

impl CountingStore {
    pub fn new(inner: SqliteStore) -> Self {
        Self {
            inner,
            exists_calls: AtomicUsize::new(0),
        }
    }

    pub fn exists_calls(&self) -> usize {
        self.exists_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthStore for CountingStore {
    async fn exists(&self, key: &AuthorizationKey) -> Result<bool, StoreError> {
        self.exists_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.exists(key).await
    }

    async fn created_since(&self, since: DateTime<Utc>) -> Result<Vec<AuthorizationKey>, StoreError> {
        self.inner.created_since(since).await
    }

    async fn schema_version(&self) -> Result<DateTime<Utc>, StoreError> {
        self.inner.schema_version().await
    }
}

/// Control plane that records calls and reports configured sessions alive
#[derive(Default)]
pub struct FakeControlPlane {
    alive: Mutex<Vec<String>>,
    gets: Mutex<Vec<String>>,
    posts: Mutex<Vec<String>>,
}

impl FakeControlPlane {
    pub fn set_alive(&self, url: &str) {
        self.alive.lock().push(url.to_string());
    }

    pub fn gets(&self) -> Vec<String> {
        self.gets.lock().clone()
    }

    pub fn posts(&self) -> Vec<String> {
        let mut posts = self.posts.lock().clone();
        posts.sort();
        posts
    }
}

#[async_trait]
impl ControlPlaneClient for FakeControlPlane {
    async fn get(&self, url: &Url) -> Result<bool, ControlPlaneError> {
        self.gets.lock().push(url.to_string());
        Ok(self.alive.lock().iter().any(|alive| alive == url.as_str()))
    }

    async fn post(&self, url: &Url) -> Result<u16, ControlPlaneError> {
        self.posts.lock().push(url.to_string());
        Ok(200)
    }
}
