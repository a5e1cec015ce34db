//! `EmailSenderConfig` — who an email is sent as, and where its token lives.

use serde::{Deserialize, Serialize};

use super::{ObjectMeta, Resource, ResourceKind};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EmailSenderConfigSpec {
    /// Name of a `Secret` in the same namespace holding the API token.
    pub api_token_secret_ref: String,
    pub sender_email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailSenderConfig {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: EmailSenderConfigSpec,
}

impl EmailSenderConfig {
    pub fn new(metadata: ObjectMeta, spec: EmailSenderConfigSpec) -> Self {
        Self { metadata, spec }
    }
}

impl Resource for EmailSenderConfig {
    const KIND: ResourceKind = ResourceKind::EmailSenderConfig;

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }

    fn spec_differs(&self, other: &Self) -> bool {
        self.spec != other.spec
    }
}
