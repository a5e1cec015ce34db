//! libSQL backend — durable `ResourceStore` implementation.
//!
//! Every record is kept as a JSON document in one `resources` table, keyed by
//! `(kind, namespace, name)`. A single-row `revision` table hands out the
//! store-wide `resource_version`; watches poll for rows whose version is
//! newer than the last one they reported.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use libsql::{Connection, Database as LibSqlDatabase, Transaction, params};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::resources::{Email, EmailSenderConfig, ObjectKey, Resource, ResourceKind, Secret};
use crate::store::migrations;
use crate::store::traits::{Applied, ResourceStore, WatchStream, prepare_apply};

/// Default interval between watch polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// libSQL-backed record store.
///
/// One connection is shared by all operations; a mutex keeps transactions
/// from interleaving with other statements on it.
#[derive(Clone)]
pub struct LibSqlStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
    lock: Arc<Mutex<()>>,
    poll_interval: Duration,
}

impl LibSqlStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Unavailable(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StoreError::Unavailable(format!("Failed to open libSQL database: {e}")))?;

        let store = Self::from_database(db).await?;
        info!(path = %path.display(), "Store opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, StoreError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                StoreError::Unavailable(format!("Failed to create in-memory database: {e}"))
            })?;
        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, StoreError> {
        let conn = db
            .connect()
            .map_err(|e| StoreError::Unavailable(format!("Failed to create connection: {e}")))?;
        migrations::run_migrations(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            conn,
            lock: Arc::new(Mutex::new(())),
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    /// Set how often watches poll for new revisions.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    async fn get_record<R>(&self, key: &ObjectKey) -> Result<R, StoreError>
    where
        R: Resource + DeserializeOwned,
    {
        let _guard = self.lock.lock().await;
        read_record::<R>(&self.conn, key)
            .await?
            .ok_or_else(|| not_found(R::KIND, key))
    }

    async fn apply_record<R>(&self, incoming: R) -> Result<R, StoreError>
    where
        R: Resource + Serialize + DeserializeOwned,
    {
        let _guard = self.lock.lock().await;
        let tx = self.begin().await?;
        let result = apply_in(&tx, incoming).await;
        finish(tx, result).await
    }

    async fn begin(&self) -> Result<Transaction, StoreError> {
        self.conn
            .transaction()
            .await
            .map_err(|e| StoreError::Unavailable(format!("Failed to begin transaction: {e}")))
    }
}

// ── Helper functions ────────────────────────────────────────────────

fn not_found(kind: ResourceKind, key: &ObjectKey) -> StoreError {
    StoreError::NotFound {
        kind,
        key: key.clone(),
    }
}

fn query_err(e: libsql::Error) -> StoreError {
    StoreError::Unavailable(format!("Query failed: {e}"))
}

/// Commit on success, roll back on failure.
async fn finish<T>(tx: Transaction, result: Result<T, StoreError>) -> Result<T, StoreError> {
    match result {
        Ok(value) => {
            tx.commit()
                .await
                .map_err(|e| StoreError::Unavailable(format!("Commit failed: {e}")))?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback) = tx.rollback().await {
                warn!("Rollback failed: {rollback}");
            }
            Err(e)
        }
    }
}

async fn next_revision(conn: &Connection) -> Result<i64, StoreError> {
    let mut rows = conn
        .query(
            "UPDATE revision SET value = value + 1 WHERE id = 1 RETURNING value",
            (),
        )
        .await
        .map_err(query_err)?;
    let row = rows
        .next()
        .await
        .map_err(query_err)?
        .ok_or_else(|| StoreError::Unavailable("revision counter missing".into()))?;
    row.get::<i64>(0).map_err(query_err)
}

async fn read_record<R>(conn: &Connection, key: &ObjectKey) -> Result<Option<R>, StoreError>
where
    R: Resource + DeserializeOwned,
{
    let mut rows = conn
        .query(
            "SELECT body FROM resources WHERE kind = ?1 AND namespace = ?2 AND name = ?3",
            params![R::KIND.as_str(), key.namespace.as_str(), key.name.as_str()],
        )
        .await
        .map_err(query_err)?;

    match rows.next().await.map_err(query_err)? {
        Some(row) => {
            let body: String = row.get(0).map_err(query_err)?;
            let record = serde_json::from_str(&body).map_err(|e| {
                StoreError::Serialization(format!("Corrupt {} {key}: {e}", R::KIND))
            })?;
            Ok(Some(record))
        }
        None => Ok(None),
    }
}

async fn write_record<R>(conn: &Connection, record: &R) -> Result<(), StoreError>
where
    R: Resource + Serialize,
{
    let meta = record.meta();
    let body = serde_json::to_string(record)
        .map_err(|e| StoreError::Serialization(format!("Failed to encode {}: {e}", R::KIND)))?;
    let created_at = meta
        .creation_timestamp
        .map(|ts| ts.to_rfc3339())
        .unwrap_or_default();

    conn.execute(
        "INSERT INTO resources (kind, namespace, name, uid, generation, resource_version, body, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(kind, namespace, name) DO UPDATE SET
             uid = excluded.uid,
             generation = excluded.generation,
             resource_version = excluded.resource_version,
             body = excluded.body",
        params![
            R::KIND.as_str(),
            meta.namespace.as_str(),
            meta.name.as_str(),
            meta.uid.to_string(),
            meta.generation,
            meta.resource_version,
            body,
            created_at
        ],
    )
    .await
    .map_err(query_err)?;
    Ok(())
}

async fn apply_in<R>(conn: &Connection, incoming: R) -> Result<R, StoreError>
where
    R: Resource + Serialize + DeserializeOwned,
{
    let key = incoming.key();
    let existing = read_record::<R>(conn, &key).await?;
    match prepare_apply(existing.as_ref(), incoming, 0) {
        Applied::Changed(mut record) => {
            record.meta_mut().resource_version = next_revision(conn).await?;
            write_record(conn, &record).await?;
            debug!(kind = %R::KIND, key = %key, version = record.meta().resource_version, "Applied record");
            Ok(record)
        }
        Applied::Unchanged(record) => Ok(record),
    }
}

async fn update_status_in(conn: &Connection, email: &Email) -> Result<Email, StoreError> {
    let key = email.key();
    let mut stored = read_record::<Email>(conn, &key)
        .await?
        .ok_or_else(|| not_found(ResourceKind::Email, &key))?;
    if stored.metadata.resource_version != email.metadata.resource_version {
        return Err(StoreError::Conflict {
            kind: ResourceKind::Email,
            key,
        });
    }
    stored.status = email.status.clone();
    stored.metadata.resource_version = next_revision(conn).await?;
    write_record(conn, &stored).await?;
    Ok(stored)
}

/// Keys of `kind` written after `since`, oldest first, with their versions.
async fn changes_since(
    conn: &Connection,
    kind: ResourceKind,
    since: i64,
) -> Result<Vec<(ObjectKey, i64)>, StoreError> {
    let mut rows = conn
        .query(
            "SELECT namespace, name, resource_version FROM resources
             WHERE kind = ?1 AND resource_version > ?2
             ORDER BY resource_version",
            params![kind.as_str(), since],
        )
        .await
        .map_err(query_err)?;

    let mut changes = Vec::new();
    while let Some(row) = rows.next().await.map_err(query_err)? {
        let namespace: String = row.get(0).map_err(query_err)?;
        let name: String = row.get(1).map_err(query_err)?;
        let version: i64 = row.get(2).map_err(query_err)?;
        changes.push((ObjectKey::new(namespace, name), version));
    }
    Ok(changes)
}

struct PollState {
    store: LibSqlStore,
    kind: ResourceKind,
    last_seen: i64,
    pending: VecDeque<ObjectKey>,
    primed: bool,
}

#[async_trait]
impl ResourceStore for LibSqlStore {
    async fn get_email(&self, key: &ObjectKey) -> Result<Email, StoreError> {
        self.get_record(key).await
    }

    async fn get_sender_config(&self, key: &ObjectKey) -> Result<EmailSenderConfig, StoreError> {
        self.get_record(key).await
    }

    async fn get_secret(&self, key: &ObjectKey) -> Result<Secret, StoreError> {
        self.get_record(key).await
    }

    async fn update_email_status(&self, email: &Email) -> Result<Email, StoreError> {
        let _guard = self.lock.lock().await;
        let tx = self.begin().await?;
        let result = update_status_in(&tx, email).await;
        finish(tx, result).await
    }

    async fn apply_email(&self, email: Email) -> Result<Email, StoreError> {
        self.apply_record(email).await
    }

    async fn apply_sender_config(
        &self,
        config: EmailSenderConfig,
    ) -> Result<EmailSenderConfig, StoreError> {
        self.apply_record(config).await
    }

    async fn apply_secret(&self, mut secret: Secret) -> Result<Secret, StoreError> {
        secret.normalize();
        self.apply_record(secret).await
    }

    async fn delete(&self, kind: ResourceKind, key: &ObjectKey) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let deleted = self
            .conn
            .execute(
                "DELETE FROM resources WHERE kind = ?1 AND namespace = ?2 AND name = ?3",
                params![kind.as_str(), key.namespace.as_str(), key.name.as_str()],
            )
            .await
            .map_err(query_err)?;
        if deleted == 0 {
            return Err(not_found(kind, key));
        }
        Ok(())
    }

    /// Deletions are not reported: a removed row leaves nothing to poll.
    async fn watch(&self, kind: ResourceKind) -> Result<WatchStream, StoreError> {
        let state = PollState {
            store: self.clone(),
            kind,
            last_seen: 0,
            pending: VecDeque::new(),
            primed: false,
        };

        let stream = futures::stream::unfold(state, |mut state| async move {
            loop {
                if let Some(key) = state.pending.pop_front() {
                    return Some((key, state));
                }
                if state.primed {
                    tokio::time::sleep(state.store.poll_interval).await;
                }
                state.primed = true;

                let changes = {
                    let _guard = state.store.lock.lock().await;
                    changes_since(&state.store.conn, state.kind, state.last_seen).await
                };
                match changes {
                    Ok(changes) => {
                        for (key, version) in changes {
                            state.last_seen = state.last_seen.max(version);
                            state.pending.push_back(key);
                        }
                    }
                    Err(e) => warn!(kind = %state.kind, "Watch poll failed: {e}"),
                }
            }
        });

        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;
    use crate::resources::{
        API_TOKEN_KEY, EmailSenderConfigSpec, EmailSpec, EmailStatus, ObjectMeta,
    };

    async fn test_store() -> LibSqlStore {
        LibSqlStore::new_memory()
            .await
            .unwrap()
            .with_poll_interval(Duration::from_millis(10))
    }

    fn email(name: &str) -> Email {
        Email::new(
            ObjectMeta::new("default", name),
            EmailSpec {
                sender_config_ref: "sender".into(),
                recipient_email: "alice@example.com".into(),
                subject: "Hi".into(),
                body: "Hello".into(),
            },
        )
    }

    #[tokio::test]
    async fn apply_and_get_round_trip() {
        let store = test_store().await;
        let applied = store.apply_email(email("welcome")).await.unwrap();
        assert_eq!(applied.metadata.generation, 1);
        assert_eq!(applied.metadata.resource_version, 1);

        let fetched = store.get_email(&applied.key()).await.unwrap();
        assert_eq!(fetched, applied);
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let store = test_store().await;
        let err = store
            .get_secret(&ObjectKey::new("default", "missing"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn spec_change_bumps_generation() {
        let store = test_store().await;
        let config = EmailSenderConfig::new(
            ObjectMeta::new("default", "sender"),
            EmailSenderConfigSpec {
                api_token_secret_ref: "token".into(),
                sender_email: "noreply@example.com".into(),
            },
        );
        let first = store.apply_sender_config(config.clone()).await.unwrap();

        let unchanged = store.apply_sender_config(config.clone()).await.unwrap();
        assert_eq!(unchanged.metadata.resource_version, first.metadata.resource_version);

        let mut edited = config;
        edited.spec.sender_email = "hello@example.com".into();
        let second = store.apply_sender_config(edited).await.unwrap();
        assert_eq!(second.metadata.generation, 2);
        assert_eq!(second.metadata.uid, first.metadata.uid);
        assert!(second.metadata.resource_version > first.metadata.resource_version);
    }

    #[tokio::test]
    async fn secret_string_data_is_stored_as_bytes() {
        let store = test_store().await;
        let mut secret = Secret::new(ObjectMeta::new("default", "token"));
        secret
            .string_data
            .insert(API_TOKEN_KEY.to_string(), "mlsn.abc".to_string());
        store.apply_secret(secret).await.unwrap();

        let fetched = store
            .get_secret(&ObjectKey::new("default", "token"))
            .await
            .unwrap();
        assert_eq!(fetched.get(API_TOKEN_KEY), Some("mlsn.abc".as_bytes()));
    }

    #[tokio::test]
    async fn stale_status_write_conflicts() {
        let store = test_store().await;
        let original = store.apply_email(email("welcome")).await.unwrap();

        let mut first = original.clone();
        first.status = EmailStatus::delivered("abc123");
        let stored = store.update_email_status(&first).await.unwrap();
        assert_eq!(stored.status, EmailStatus::delivered("abc123"));
        assert_eq!(stored.metadata.generation, 1);

        let mut stale = original;
        stale.status = EmailStatus::failed("late");
        let err = store.update_email_status(&stale).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));

        let fetched = store.get_email(&stored.key()).await.unwrap();
        assert_eq!(fetched.status, EmailStatus::delivered("abc123"));
    }

    #[tokio::test]
    async fn status_write_on_missing_email_is_not_found() {
        let store = test_store().await;
        let err = store.update_email_status(&email("ghost")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn delete_removes_row() {
        let store = test_store().await;
        let applied = store.apply_email(email("welcome")).await.unwrap();
        store.delete(ResourceKind::Email, &applied.key()).await.unwrap();
        assert!(store.get_email(&applied.key()).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn watch_reports_existing_and_new_rows() {
        let store = test_store().await;
        store.apply_email(email("a")).await.unwrap();

        let mut watch = store.watch(ResourceKind::Email).await.unwrap();
        assert_eq!(watch.next().await, Some(ObjectKey::new("default", "a")));

        store
            .apply_secret(Secret::new(ObjectMeta::new("default", "other-kind")))
            .await
            .unwrap();
        store.apply_email(email("b")).await.unwrap();

        let next = tokio::time::timeout(Duration::from_secs(2), watch.next())
            .await
            .unwrap();
        assert_eq!(next, Some(ObjectKey::new("default", "b")));
    }

    #[tokio::test]
    async fn on_disk_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("operator.db");

        {
            let store = LibSqlStore::new_local(&path).await.unwrap();
            store.apply_email(email("persisted")).await.unwrap();
        }

        let reopened = LibSqlStore::new_local(&path).await.unwrap();
        let fetched = reopened
            .get_email(&ObjectKey::new("default", "persisted"))
            .await
            .unwrap();
        assert_eq!(fetched.spec.subject, "Hi");
    }
}
