//! Resource records the operator reads and writes.
//!
//! Three kinds live in the store: [`Email`] (the send intent, whose status the
//! operator owns), [`EmailSenderConfig`] and [`Secret`] (read-only inputs).

pub mod email;
pub mod secret;
pub mod sender_config;

pub use email::{DeliveryStatus, Email, EmailSpec, EmailStatus};
pub use secret::{API_TOKEN_KEY, Secret};
pub use sender_config::{EmailSenderConfig, EmailSenderConfigSpec};

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Namespace used when a manifest omits one.
pub const DEFAULT_NAMESPACE: &str = "default";

/// The record kinds known to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Email,
    EmailSenderConfig,
    Secret,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "Email",
            Self::EmailSenderConfig => "EmailSenderConfig",
            Self::Secret => "Secret",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Email" => Ok(Self::Email),
            "EmailSenderConfig" => Ok(Self::EmailSenderConfig),
            "Secret" => Ok(Self::Secret),
            other => Err(format!("unknown resource kind: {other}")),
        }
    }
}

/// Identity of a record within its kind: `(namespace, name)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

/// Store-managed metadata shared by every record.
///
/// Callers only supply `name` and `namespace`; the store assigns the rest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default)]
    pub uid: Uuid,
    /// Starts at 1 and grows each time the spec changes.
    #[serde(default)]
    pub generation: i64,
    /// Store-wide revision of the last write to this record.
    #[serde(default)]
    pub resource_version: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,
}

impl ObjectMeta {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            uid: Uuid::nil(),
            generation: 0,
            resource_version: 0,
            creation_timestamp: None,
        }
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.namespace.clone(), self.name.clone())
    }
}

/// Common access to the metadata of any stored record.
pub trait Resource: Clone + Send + Sync + 'static {
    const KIND: ResourceKind;

    fn meta(&self) -> &ObjectMeta;
    fn meta_mut(&mut self) -> &mut ObjectMeta;

    /// Whether the user-supplied part of two records differs.
    fn spec_differs(&self, other: &Self) -> bool;

    /// Copy controller-owned state from the stored version on re-apply.
    fn carry_status_from(&mut self, _previous: &Self) {}

    /// Drop controller-owned state supplied by the caller on create.
    fn clear_status(&mut self) {}

    fn key(&self) -> ObjectKey {
        self.meta().key()
    }
}
