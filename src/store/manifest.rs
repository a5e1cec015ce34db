//! Manifest loader — applies JSON resource files from a directory.
//!
//! Each `*.json` file holds one resource object or an array of them, tagged
//! by `kind`. Resources are applied inputs-first (secrets, sender configs,
//! then emails) so an email never lands before the config it points at.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, info};

use crate::error::ManifestError;
use crate::resources::{Email, EmailSenderConfig, ResourceKind, Secret};
use crate::store::ResourceStore;

/// One resource as written in a manifest file.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind")]
pub enum Manifest {
    Email(Email),
    EmailSenderConfig(EmailSenderConfig),
    Secret(Secret),
}

impl Manifest {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Email(_) => ResourceKind::Email,
            Self::EmailSenderConfig(_) => ResourceKind::EmailSenderConfig,
            Self::Secret(_) => ResourceKind::Secret,
        }
    }

    fn apply_order(&self) -> u8 {
        match self {
            Self::Secret(_) => 0,
            Self::EmailSenderConfig(_) => 1,
            Self::Email(_) => 2,
        }
    }
}

/// Parse the contents of one manifest file.
pub fn parse_manifests(path: &str, contents: &str) -> Result<Vec<Manifest>, ManifestError> {
    let parse_err = |e: serde_json::Error| ManifestError::Parse {
        path: path.to_string(),
        reason: e.to_string(),
    };

    let value: serde_json::Value = serde_json::from_str(contents).map_err(parse_err)?;
    match value {
        serde_json::Value::Array(items) => items
            .into_iter()
            .map(|item| serde_json::from_value(item).map_err(parse_err))
            .collect(),
        single => Ok(vec![serde_json::from_value(single).map_err(parse_err)?]),
    }
}

/// Apply every `*.json` manifest under `dir`. Returns the number of
/// resources applied.
pub async fn load_manifests(dir: &Path, store: &dyn ResourceStore) -> Result<usize, ManifestError> {
    let dir_label = dir.display().to_string();
    let io_err = |path: &str, e: std::io::Error| ManifestError::Io {
        path: path.to_string(),
        reason: e.to_string(),
    };

    let mut paths: Vec<PathBuf> = Vec::new();
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| io_err(&dir_label, e))?;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| io_err(&dir_label, e))?
    {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "json") {
            paths.push(path);
        }
    }
    paths.sort();

    let mut manifests: Vec<(String, Manifest)> = Vec::new();
    for path in &paths {
        let label = path.display().to_string();
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| io_err(&label, e))?;
        for manifest in parse_manifests(&label, &contents)? {
            manifests.push((label.clone(), manifest));
        }
    }
    manifests.sort_by_key(|(_, manifest)| manifest.apply_order());

    for (path, manifest) in &manifests {
        let kind = manifest.kind();
        let result = match manifest.clone() {
            Manifest::Email(email) => store.apply_email(email).await.map(|r| r.metadata),
            Manifest::EmailSenderConfig(config) => {
                store.apply_sender_config(config).await.map(|r| r.metadata)
            }
            Manifest::Secret(secret) => store.apply_secret(secret).await.map(|r| r.metadata),
        };
        let meta = result.map_err(|source| ManifestError::Store {
            path: path.clone(),
            source,
        })?;
        debug!(%kind, key = %meta.key(), generation = meta.generation, "Applied manifest");
    }

    info!(
        dir = %dir_label,
        files = paths.len(),
        resources = manifests.len(),
        "Loaded manifests"
    );
    Ok(manifests.len())
}
