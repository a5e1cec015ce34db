//! `EmailSenderConfig` observer. Logs creates and updates; never fails.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::controller::runtime::{Action, Reconciler};
use crate::error::ReconcileError;
use crate::resources::{EmailSenderConfig, ObjectKey, ResourceKind};
use crate::store::ResourceStore;

/// How an observed config relates to its history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigEvent {
    Created,
    Updated,
}

impl ConfigEvent {
    fn of(config: &EmailSenderConfig) -> Self {
        if config.metadata.generation == 1 {
            Self::Created
        } else {
            Self::Updated
        }
    }
}

pub struct SenderConfigObserver {
    store: Arc<dyn ResourceStore>,
}

impl SenderConfigObserver {
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self { store }
    }

    /// Look the config up and report what happened to it, if it still exists.
    pub async fn observe(&self, key: &ObjectKey) -> Option<ConfigEvent> {
        let config = match self.store.get_sender_config(key).await {
            Ok(config) => config,
            Err(e) => {
                debug!(key = %key, error = %e, "EmailSenderConfig not readable");
                return None;
            }
        };

        let event = ConfigEvent::of(&config);
        match event {
            ConfigEvent::Created => info!(
                key = %key,
                sender = %config.spec.sender_email,
                "EmailSenderConfig created"
            ),
            ConfigEvent::Updated => info!(
                key = %key,
                sender = %config.spec.sender_email,
                generation = config.metadata.generation,
                "EmailSenderConfig updated"
            ),
        }
        Some(event)
    }
}

#[async_trait]
impl Reconciler for SenderConfigObserver {
    fn kind(&self) -> ResourceKind {
        ResourceKind::EmailSenderConfig
    }

    async fn reconcile(&self, key: &ObjectKey) -> Result<Action, ReconcileError> {
        self.observe(key).await;
        Ok(Action::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{EmailSenderConfigSpec, ObjectMeta};
    use crate::store::MemoryStore;

    fn config(sender: &str) -> EmailSenderConfig {
        EmailSenderConfig::new(
            ObjectMeta::new("default", "sender"),
            EmailSenderConfigSpec {
                api_token_secret_ref: "token".into(),
                sender_email: sender.into(),
            },
        )
    }

    #[tokio::test]
    async fn distinguishes_created_from_updated() {
        let store = Arc::new(MemoryStore::new());
        let observer = SenderConfigObserver::new(store.clone());
        let key = ObjectKey::new("default", "sender");

        store.apply_sender_config(config("a@example.com")).await.unwrap();
        assert_eq!(observer.observe(&key).await, Some(ConfigEvent::Created));

        store.apply_sender_config(config("b@example.com")).await.unwrap();
        assert_eq!(observer.observe(&key).await, Some(ConfigEvent::Updated));
    }

    #[test]
    fn only_first_generation_counts_as_created() {
        let mut observed = config("a@example.com");
        observed.metadata.generation = 1;
        assert_eq!(ConfigEvent::of(&observed), ConfigEvent::Created);

        for generation in [0, 2, 7] {
            observed.metadata.generation = generation;
            assert_eq!(ConfigEvent::of(&observed), ConfigEvent::Updated);
        }
    }

    #[tokio::test]
    async fn missing_config_is_not_an_error() {
        let observer = SenderConfigObserver::new(Arc::new(MemoryStore::new()));
        let key = ObjectKey::new("default", "gone");
        assert_eq!(observer.observe(&key).await, None);
        assert_eq!(observer.reconcile(&key).await.unwrap(), Action::Done);
    }
}
