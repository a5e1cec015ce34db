//! In-memory `ResourceStore`, used by tests and for embedding.
//!
//! Writes are linearised behind one `RwLock`; watchers are fed through a
//! broadcast channel and fall back to a full re-list if they lag behind.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::resources::{Email, EmailSenderConfig, ObjectKey, Resource, ResourceKind, Secret};
use crate::store::traits::{Applied, ResourceStore, WatchStream, prepare_apply};

const WATCH_BUFFER: usize = 1024;

#[derive(Debug, Clone)]
struct WatchEvent {
    kind: ResourceKind,
    key: ObjectKey,
}

#[derive(Default)]
struct Tables {
    revision: i64,
    emails: HashMap<ObjectKey, Email>,
    sender_configs: HashMap<ObjectKey, EmailSenderConfig>,
    secrets: HashMap<ObjectKey, Secret>,
}

impl Tables {
    fn next_revision(&mut self) -> i64 {
        self.revision += 1;
        self.revision
    }

    fn keys(&self, kind: ResourceKind) -> Vec<ObjectKey> {
        let mut keys: Vec<ObjectKey> = match kind {
            ResourceKind::Email => self.emails.keys().cloned().collect(),
            ResourceKind::EmailSenderConfig => self.sender_configs.keys().cloned().collect(),
            ResourceKind::Secret => self.secrets.keys().cloned().collect(),
        };
        keys.sort();
        keys
    }
}

/// Shared, cloneable in-memory store.
#[derive(Clone)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
    events: broadcast::Sender<WatchEvent>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(WATCH_BUFFER);
        Self {
            tables: Arc::new(RwLock::new(Tables::default())),
            events,
        }
    }

    fn notify(&self, kind: ResourceKind, key: ObjectKey) {
        // No receivers is fine: nobody is watching yet.
        let _ = self.events.send(WatchEvent { kind, key });
    }

    async fn apply<R, F>(&self, incoming: R, table: F) -> Result<R, StoreError>
    where
        R: Resource,
        F: FnOnce(&mut Tables) -> (&mut HashMap<ObjectKey, R>, i64),
    {
        let key = incoming.key();
        let applied = {
            let mut tables = self.tables.write().await;
            let (records, revision) = table(&mut *tables);
            let applied = prepare_apply(records.get(&key), incoming, revision);
            if let Applied::Changed(record) = &applied {
                records.insert(key.clone(), record.clone());
            }
            applied
        };

        match applied {
            Applied::Changed(record) => {
                debug!(kind = %R::KIND, key = %key, "Applied record");
                self.notify(R::KIND, key);
                Ok(record)
            }
            Applied::Unchanged(record) => Ok(record),
        }
    }
}

fn not_found(kind: ResourceKind, key: &ObjectKey) -> StoreError {
    StoreError::NotFound {
        kind,
        key: key.clone(),
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn get_email(&self, key: &ObjectKey) -> Result<Email, StoreError> {
        self.tables
            .read()
            .await
            .emails
            .get(key)
            .cloned()
            .ok_or_else(|| not_found(ResourceKind::Email, key))
    }

    async fn get_sender_config(&self, key: &ObjectKey) -> Result<EmailSenderConfig, StoreError> {
        self.tables
            .read()
            .await
            .sender_configs
            .get(key)
            .cloned()
            .ok_or_else(|| not_found(ResourceKind::EmailSenderConfig, key))
    }

    async fn get_secret(&self, key: &ObjectKey) -> Result<Secret, StoreError> {
        self.tables
            .read()
            .await
            .secrets
            .get(key)
            .cloned()
            .ok_or_else(|| not_found(ResourceKind::Secret, key))
    }

    async fn update_email_status(&self, email: &Email) -> Result<Email, StoreError> {
        let key = email.key();
        let updated = {
            let mut tables = self.tables.write().await;
            let current_version = tables
                .emails
                .get(&key)
                .map(|stored| stored.metadata.resource_version)
                .ok_or_else(|| not_found(ResourceKind::Email, &key))?;
            if current_version != email.metadata.resource_version {
                return Err(StoreError::Conflict {
                    kind: ResourceKind::Email,
                    key,
                });
            }
            let revision = tables.next_revision();
            let stored = tables
                .emails
                .get_mut(&key)
                .ok_or_else(|| not_found(ResourceKind::Email, &key))?;
            stored.status = email.status.clone();
            stored.metadata.resource_version = revision;
            stored.clone()
        };
        self.notify(ResourceKind::Email, key);
        Ok(updated)
    }

    async fn apply_email(&self, email: Email) -> Result<Email, StoreError> {
        self.apply(email, |t| {
            let revision = t.next_revision();
            (&mut t.emails, revision)
        })
        .await
    }

    async fn apply_sender_config(
        &self,
        config: EmailSenderConfig,
    ) -> Result<EmailSenderConfig, StoreError> {
        self.apply(config, |t| {
            let revision = t.next_revision();
            (&mut t.sender_configs, revision)
        })
        .await
    }

    async fn apply_secret(&self, mut secret: Secret) -> Result<Secret, StoreError> {
        secret.normalize();
        self.apply(secret, |t| {
            let revision = t.next_revision();
            (&mut t.secrets, revision)
        })
        .await
    }

    async fn delete(&self, kind: ResourceKind, key: &ObjectKey) -> Result<(), StoreError> {
        let removed = {
            let mut tables = self.tables.write().await;
            let removed = match kind {
                ResourceKind::Email => tables.emails.remove(key).is_some(),
                ResourceKind::EmailSenderConfig => tables.sender_configs.remove(key).is_some(),
                ResourceKind::Secret => tables.secrets.remove(key).is_some(),
            };
            if removed {
                tables.next_revision();
            }
            removed
        };
        if !removed {
            return Err(not_found(kind, key));
        }
        self.notify(kind, key.clone());
        Ok(())
    }

    async fn watch(&self, kind: ResourceKind) -> Result<WatchStream, StoreError> {
        // Subscribe before listing so no write can slip between the two.
        let rx = self.events.subscribe();
        let initial: VecDeque<ObjectKey> = self.tables.read().await.keys(kind).into();
        let tables = Arc::clone(&self.tables);

        let stream = futures::stream::unfold(
            (rx, initial, tables),
            move |(mut rx, mut pending, tables)| async move {
                loop {
                    if let Some(key) = pending.pop_front() {
                        return Some((key, (rx, pending, tables)));
                    }
                    match rx.recv().await {
                        Ok(event) if event.kind == kind => {
                            return Some((event.key, (rx, pending, tables)));
                        }
                        Ok(_) => continue,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(%kind, skipped, "Watch lagged; re-listing");
                            pending.extend(tables.read().await.keys(kind));
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            },
        );

        Ok(Box::pin(stream))
    }
}
