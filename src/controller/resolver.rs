//! Sender configuration resolution: `EmailSenderConfig` → `Secret` → token.

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::SecretString;
use tracing::debug;

use crate::error::ResolutionError;
use crate::resources::{API_TOKEN_KEY, ObjectKey};
use crate::store::ResourceStore;

/// Sender identity and credential, ready for dispatch.
#[derive(Debug, Clone)]
pub struct ResolvedSender {
    pub sender_email: String,
    pub api_token: SecretString,
}

/// Resolves a sender config reference into a [`ResolvedSender`].
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(
        &self,
        namespace: &str,
        sender_config_ref: &str,
    ) -> Result<ResolvedSender, ResolutionError>;
}

/// Resolver reading straight from the record store on every call.
///
/// Nothing is cached, so a rotated token is picked up by the next send.
pub struct StoreResolver {
    store: Arc<dyn ResourceStore>,
}

impl StoreResolver {
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Resolver for StoreResolver {
    async fn resolve(
        &self,
        namespace: &str,
        sender_config_ref: &str,
    ) -> Result<ResolvedSender, ResolutionError> {
        if sender_config_ref.is_empty() {
            return Err(ResolutionError::SenderConfigNotFound {
                name: String::new(),
            });
        }

        let config_key = ObjectKey::new(namespace, sender_config_ref);
        let config = self
            .store
            .get_sender_config(&config_key)
            .await
            .map_err(|e| {
                debug!(key = %config_key, error = %e, "Sender config lookup failed");
                ResolutionError::SenderConfigNotFound {
                    name: sender_config_ref.to_string(),
                }
            })?;

        let secret_name = config.spec.api_token_secret_ref;
        let secret_key = ObjectKey::new(namespace, secret_name.clone());
        let secret = self.store.get_secret(&secret_key).await.map_err(|e| {
            debug!(key = %secret_key, error = %e, "API token secret lookup failed");
            ResolutionError::CredentialNotFound {
                name: secret_name.clone(),
            }
        })?;

        let token = secret
            .get(API_TOKEN_KEY)
            .ok_or_else(|| ResolutionError::CredentialKeyMissing {
                secret: secret_name.clone(),
                key: API_TOKEN_KEY.to_string(),
            })?;

        Ok(ResolvedSender {
            sender_email: config.spec.sender_email,
            api_token: SecretString::from(String::from_utf8_lossy(token).into_owned()),
        })
    }
}

#[cfg(test)]
mod tests {
    use secrecy::ExposeSecret;

    use super::*;
    use crate::resources::{EmailSenderConfig, EmailSenderConfigSpec, ObjectMeta, Secret};
    use crate::store::MemoryStore;

    async fn store_with_config(secret: Option<Secret>) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store
            .apply_sender_config(EmailSenderConfig::new(
                ObjectMeta::new("default", "sender"),
                EmailSenderConfigSpec {
                    api_token_secret_ref: "token".into(),
                    sender_email: "noreply@example.com".into(),
                },
            ))
            .await
            .unwrap();
        if let Some(secret) = secret {
            store.apply_secret(secret).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn resolves_full_chain() {
        let secret =
            Secret::new(ObjectMeta::new("default", "token")).with_entry(API_TOKEN_KEY, "mlsn.abc");
        let store = store_with_config(Some(secret)).await;
        let resolver = StoreResolver::new(store);

        let resolved = resolver.resolve("default", "sender").await.unwrap();
        assert_eq!(resolved.sender_email, "noreply@example.com");
        assert_eq!(resolved.api_token.expose_secret(), "mlsn.abc");
    }

    #[tokio::test]
    async fn missing_sender_config() {
        let resolver = StoreResolver::new(Arc::new(MemoryStore::new()));
        let err = resolver.resolve("default", "sender").await.unwrap_err();
        assert_eq!(
            err,
            ResolutionError::SenderConfigNotFound {
                name: "sender".into()
            }
        );
    }

    #[tokio::test]
    async fn sender_config_in_other_namespace_is_not_visible() {
        let store = store_with_config(None).await;
        let resolver = StoreResolver::new(store);
        let err = resolver.resolve("team-b", "sender").await.unwrap_err();
        assert!(matches!(err, ResolutionError::SenderConfigNotFound { .. }));
    }

    #[tokio::test]
    async fn empty_reference_is_not_found() {
        let store = store_with_config(None).await;
        store
            .apply_sender_config(EmailSenderConfig::new(
                ObjectMeta::new("default", ""),
                EmailSenderConfigSpec {
                    api_token_secret_ref: "token".into(),
                    sender_email: "noreply@example.com".into(),
                },
            ))
            .await
            .unwrap();
        let resolver = StoreResolver::new(store);

        let err = resolver.resolve("default", "").await.unwrap_err();
        assert_eq!(
            err,
            ResolutionError::SenderConfigNotFound {
                name: String::new()
            }
        );
    }

    #[tokio::test]
    async fn missing_secret() {
        let resolver = StoreResolver::new(store_with_config(None).await);
        let err = resolver.resolve("default", "sender").await.unwrap_err();
        assert_eq!(
            err,
            ResolutionError::CredentialNotFound {
                name: "token".into()
            }
        );
    }

    #[tokio::test]
    async fn secret_without_token_key() {
        let secret =
            Secret::new(ObjectMeta::new("default", "token")).with_entry("password", "hunter2");
        let resolver = StoreResolver::new(store_with_config(Some(secret)).await);
        let err = resolver.resolve("default", "sender").await.unwrap_err();
        assert!(matches!(err, ResolutionError::CredentialKeyMissing { .. }));
        assert!(err.to_string().contains("API token not found in secret token"));
    }

    #[tokio::test]
    async fn rotated_token_is_read_on_next_resolve() {
        let secret =
            Secret::new(ObjectMeta::new("default", "token")).with_entry(API_TOKEN_KEY, "old");
        let store = store_with_config(Some(secret)).await;
        let resolver = StoreResolver::new(store.clone());
        assert_eq!(
            resolver
                .resolve("default", "sender")
                .await
                .unwrap()
                .api_token
                .expose_secret(),
            "old"
        );

        store
            .apply_secret(
                Secret::new(ObjectMeta::new("default", "token")).with_entry(API_TOKEN_KEY, "new"),
            )
            .await
            .unwrap();
        assert_eq!(
            resolver
                .resolve("default", "sender")
                .await
                .unwrap()
                .api_token
                .expose_secret(),
            "new"
        );
    }
}
