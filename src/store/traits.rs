//! `ResourceStore` — the declarative record store the controllers run against.
//!
//! Reads and the status write are what the reconcilers need. The `apply_*`
//! and `delete` methods are the write side used by manifests and tests.

use std::pin::Pin;

use async_trait::async_trait;
use chrono::Utc;
use futures::Stream;
use uuid::Uuid;

use crate::error::StoreError;
use crate::resources::{Email, EmailSenderConfig, ObjectKey, Resource, ResourceKind, Secret};

/// Infinite stream of keys whose records may have changed.
pub type WatchStream = Pin<Box<dyn Stream<Item = ObjectKey> + Send>>;

/// Backend-agnostic store of versioned, namespaced records.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Fetch an `Email`. Missing records yield `StoreError::NotFound`.
    async fn get_email(&self, key: &ObjectKey) -> Result<Email, StoreError>;

    /// Fetch an `EmailSenderConfig`.
    async fn get_sender_config(&self, key: &ObjectKey) -> Result<EmailSenderConfig, StoreError>;

    /// Fetch a `Secret`.
    async fn get_secret(&self, key: &ObjectKey) -> Result<Secret, StoreError>;

    /// Replace the status of an `Email`.
    ///
    /// Optimistic: fails with `Conflict` unless `email.metadata.resource_version`
    /// matches the stored record. Spec changes in `email` are ignored.
    async fn update_email_status(&self, email: &Email) -> Result<Email, StoreError>;

    /// Create an `Email` or replace its spec.
    async fn apply_email(&self, email: Email) -> Result<Email, StoreError>;

    /// Create an `EmailSenderConfig` or replace its spec.
    async fn apply_sender_config(
        &self,
        config: EmailSenderConfig,
    ) -> Result<EmailSenderConfig, StoreError>;

    /// Create a `Secret` or replace its data.
    async fn apply_secret(&self, secret: Secret) -> Result<Secret, StoreError>;

    /// Remove a record. Deleting a missing record is `NotFound`.
    async fn delete(&self, kind: ResourceKind, key: &ObjectKey) -> Result<(), StoreError>;

    /// Watch one kind. The stream first yields every existing key, then the
    /// key of each later write.
    async fn watch(&self, kind: ResourceKind) -> Result<WatchStream, StoreError>;
}

/// Result of merging an apply with the stored record.
#[derive(Debug)]
pub(crate) enum Applied<R> {
    /// Write this record and notify watchers.
    Changed(R),
    /// Nothing user-visible changed; the stored record as-is.
    Unchanged(R),
}

/// Merge an incoming apply with the stored record.
///
/// Identity fields are kept, `generation` grows with spec changes and the
/// `Email` status survives. A new record never takes a caller-supplied status.
pub(crate) fn prepare_apply<R: Resource>(
    existing: Option<&R>,
    mut incoming: R,
    revision: i64,
) -> Applied<R> {
    match existing {
        Some(current) => {
            if !current.spec_differs(&incoming) {
                return Applied::Unchanged(current.clone());
            }
            incoming.carry_status_from(current);
            let meta = incoming.meta_mut();
            meta.uid = current.meta().uid;
            meta.creation_timestamp = current.meta().creation_timestamp;
            meta.generation = current.meta().generation + 1;
            meta.resource_version = revision;
        }
        None => {
            incoming.clear_status();
            let meta = incoming.meta_mut();
            meta.uid = Uuid::new_v4();
            meta.creation_timestamp = Some(Utc::now());
            meta.generation = 1;
            meta.resource_version = revision;
        }
    }
    Applied::Changed(incoming)
}
