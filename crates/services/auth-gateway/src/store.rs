//! Backing store of authorization grants
//!
//! The gateway only reads the store. Grants live in `stream_auth`
//! (`path`, `action`, `queryToken`, `created_at`); the schema version lives in
//! `versions` under `application = 'db_version'`.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};

use crate::model::AuthorizationKey;

/// Oldest schema version this build can run against
pub const TARGET_SCHEMA_VERSION: &str = "2025-11-16T01:44:52+00:00";

/// Backing store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Query timed out after {0:?}")]
    Timeout(Duration),

    #[error("Query task failed: {0}")]
    Task(String),

    #[error("Schema version record missing")]
    MissingSchemaVersion,

    #[error("Invalid schema version: {0}")]
    InvalidSchemaVersion(String),

    #[error("Outdated schema {found} needs {required}")]
    OutdatedSchema {
        found: DateTime<Utc>,
        required: DateTime<Utc>,
    },
}

/// Read access to authorization grants
#[async_trait]
pub trait AuthStore: Send + Sync {
    /// Whether a grant matching all three fields exists
    async fn exists(&self, key: &AuthorizationKey) -> Result<bool, StoreError>;

    /// Grants created strictly after `since`
    async fn created_since(&self, since: DateTime<Utc>) -> Result<Vec<AuthorizationKey>, StoreError>;

    /// Schema version recorded in the store
    async fn schema_version(&self) -> Result<DateTime<Utc>, StoreError>;
}

/// Compare the store's schema version against [`TARGET_SCHEMA_VERSION`].
///
/// Returns the store's version when it is at least the target.
pub async fn check_schema(store: &dyn AuthStore) -> Result<DateTime<Utc>, StoreError> {
    let required = parse_timestamp(TARGET_SCHEMA_VERSION)?;
    let found = store.schema_version().await?;
    tracing::info!(schema_version = %found, "Database schema");
    if required > found {
        return Err(StoreError::OutdatedSchema { found, required });
    }
    Ok(found)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    // SQLite's CURRENT_TIMESTAMP format
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|_| StoreError::InvalidSchemaVersion(raw.to_string()))
}

/// SQLite-backed grant store.
///
/// Queries run on the blocking pool behind a single connection and are
/// bounded by `query_timeout`.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    query_timeout: Duration,
}

impl SqliteStore {
    /// Open an existing database read-only
    pub fn open(path: impl AsRef<Path>, query_timeout: Duration) -> Result<Self, StoreError> {
        let conn = Connection::open_with_flags(
            path.as_ref(),
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(query_timeout)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            query_timeout,
        })
    }

    async fn run<T, F>(&self, query: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = self.conn.clone();
        let task = tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            query(&conn)
        });

        match tokio::time::timeout(self.query_timeout, task).await {
            Err(_) => Err(StoreError::Timeout(self.query_timeout)),
            Ok(Err(e)) => Err(StoreError::Task(e.to_string())),
            Ok(Ok(result)) => result,
        }
    }
}

#[async_trait]
impl AuthStore for SqliteStore {
    async fn exists(&self, key: &AuthorizationKey) -> Result<bool, StoreError> {
        let key = key.clone();
        self.run(move |conn| {
            let found = conn.query_row(
                "SELECT EXISTS(
                    SELECT 1 FROM stream_auth
                    WHERE path = ?1 AND action = ?2 AND queryToken = ?3
                 )",
                params![key.path, key.action, key.query_token],
                |row| row.get::<_, bool>(0),
            )?;
            Ok(found)
        })
        .await
    }

    async fn created_since(&self, since: DateTime<Utc>) -> Result<Vec<AuthorizationKey>, StoreError> {
        let since = since.to_rfc3339_opts(SecondsFormat::Millis, true);
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT path, action, queryToken FROM stream_auth
                 WHERE julianday(created_at) > julianday(?1)",
            )?;
            let rows = stmt.query_map(params![since], |row| {
                Ok(AuthorizationKey {
                    path: row.get(0)?,
                    action: row.get(1)?,
                    query_token: row.get(2)?,
                })
            })?;

            let mut keys = Vec::new();
            for row in rows {
                match row {
                    Ok(key) => keys.push(key),
                    Err(e) => tracing::warn!(error = %e, "Skipping unreadable grant row"),
                }
            }
            Ok(keys)
        })
        .await
    }

    async fn schema_version(&self) -> Result<DateTime<Utc>, StoreError> {
        let raw = self
            .run(|conn| {
                let version = conn
                    .query_row(
                        "SELECT version FROM versions WHERE application = 'db_version'",
                        [],
                        |row| row.get::<_, String>(0),
                    )
                    .optional()?;
                Ok(version)
            })
            .await?;

        let raw = raw.ok_or(StoreError::MissingSchemaVersion)?;
        parse_timestamp(&raw)
    }
}
