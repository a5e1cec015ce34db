//! `Secret` — opaque key/value credential storage.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{ObjectMeta, Resource, ResourceKind};

/// Key under which a sender's API token is stored.
pub const API_TOKEN_KEY: &str = "apiToken";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Secret {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub data: BTreeMap<String, Vec<u8>>,
    /// Write-only convenience for manifests; folded into `data` by the store.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub string_data: BTreeMap<String, String>,
}

impl Secret {
    pub fn new(metadata: ObjectMeta) -> Self {
        Self {
            metadata,
            data: BTreeMap::new(),
            string_data: BTreeMap::new(),
        }
    }

    pub fn with_entry(mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.data.get(key).map(Vec::as_slice)
    }

    /// Move `string_data` entries into `data`, overriding existing keys.
    pub fn normalize(&mut self) {
        for (key, value) in std::mem::take(&mut self.string_data) {
            self.data.insert(key, value.into_bytes());
        }
    }
}

impl Resource for Secret {
    const KIND: ResourceKind = ResourceKind::Secret;

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }

    fn spec_differs(&self, other: &Self) -> bool {
        self.data != other.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_folds_string_data() {
        let mut secret: Secret = serde_json::from_str(
            r#"{"metadata":{"name":"token"},"stringData":{"apiToken":"mlsn.123"}}"#,
        )
        .unwrap();
        assert!(secret.get(API_TOKEN_KEY).is_none());

        secret.normalize();
        assert_eq!(secret.get(API_TOKEN_KEY), Some("mlsn.123".as_bytes()));
        assert!(secret.string_data.is_empty());
    }
}
