//! Email reconciler — sends each `Email` at most once and records the outcome.
//!
//! One pass:
//! 1. fetch the record (gone → nothing to do)
//! 2. skip it if a delivery status is already set
//! 3. resolve sender config and token
//! 4. dispatch to the provider
//! 5. persist `Success`/`Failed` as the last step
//!
//! Resolution failures are persisted *and* returned as errors so the runtime
//! requeues; provider failures are persisted and treated as final.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::controller::dispatcher::{Dispatcher, OutboundEmail};
use crate::controller::resolver::Resolver;
use crate::controller::runtime::{Action, Reconciler};
use crate::error::{DeliveryError, ReconcileError, ResolutionError};
use crate::resources::{Email, EmailStatus, ObjectKey, ResourceKind};
use crate::store::ResourceStore;

/// Result of one delivery attempt, before it is written back.
#[derive(Debug, Clone, PartialEq)]
enum Attempt {
    Delivered { message_id: String },
    Rejected(DeliveryError),
    Unresolved(ResolutionError),
}

impl Attempt {
    fn status(&self) -> EmailStatus {
        match self {
            Self::Delivered { message_id } => EmailStatus::delivered(message_id.clone()),
            Self::Rejected(e) => EmailStatus::failed(e.to_string()),
            Self::Unresolved(e) => EmailStatus::failed(e.to_string()),
        }
    }

    /// Only resolution failures ask for another pass.
    fn into_result(self) -> Result<Action, ReconcileError> {
        match self {
            Self::Delivered { .. } | Self::Rejected(_) => Ok(Action::Done),
            Self::Unresolved(e) => Err(ReconcileError::Resolution(e)),
        }
    }
}

/// Drives `Email` records to a terminal delivery status.
pub struct EmailReconciler {
    store: Arc<dyn ResourceStore>,
    resolver: Arc<dyn Resolver>,
    dispatcher: Arc<dyn Dispatcher>,
}

impl EmailReconciler {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        resolver: Arc<dyn Resolver>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Self {
        Self {
            store,
            resolver,
            dispatcher,
        }
    }

    async fn attempt(&self, email: &Email) -> Attempt {
        let key = email.metadata.key();
        let sender = match self
            .resolver
            .resolve(&key.namespace, &email.spec.sender_config_ref)
            .await
        {
            Ok(sender) => sender,
            Err(e) => {
                error!(key = %key, error = %e, "Unable to resolve sender configuration");
                return Attempt::Unresolved(e);
            }
        };

        let outbound = OutboundEmail {
            sender_email: &sender.sender_email,
            api_token: &sender.api_token,
            recipient_email: &email.spec.recipient_email,
            subject: &email.spec.subject,
            body: &email.spec.body,
        };
        match self.dispatcher.send(&outbound).await {
            Ok(message_id) => {
                info!(key = %key, message_id = %message_id, "Email sent successfully");
                Attempt::Delivered { message_id }
            }
            Err(e) => {
                error!(key = %key, error = %e, "Failed to send email");
                Attempt::Rejected(e)
            }
        }
    }

    async fn persist(&self, mut email: Email, status: EmailStatus) -> Result<(), ReconcileError> {
        let key = email.metadata.key();
        email.status = status;
        match self.store.update_email_status(&email).await {
            Ok(updated) => {
                debug!(
                    key = %key,
                    status = updated.status.delivery_status.as_str(),
                    version = updated.metadata.resource_version,
                    "Updated Email status"
                );
                Ok(())
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Unable to update Email status");
                Err(ReconcileError::Persist(e))
            }
        }
    }
}

#[async_trait]
impl Reconciler for EmailReconciler {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Email
    }

    async fn reconcile(&self, key: &ObjectKey) -> Result<Action, ReconcileError> {
        let email = match self.store.get_email(key).await {
            Ok(email) => email,
            Err(e) if e.is_not_found() => {
                debug!(key = %key, "Email no longer exists");
                return Ok(Action::Done);
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Unable to fetch Email");
                return Err(ReconcileError::Fetch(e));
            }
        };

        if email.status.delivery_status.is_terminal() {
            debug!(
                key = %key,
                status = email.status.delivery_status.as_str(),
                "Email already processed"
            );
            return Ok(Action::Done);
        }

        let attempt = self.attempt(&email).await;
        self.persist(email, attempt.status()).await?;
        attempt.into_result()
    }
}
