//! `Email` — a request to send one message, plus the operator-owned outcome.

use serde::{Deserialize, Serialize};

use super::{ObjectMeta, Resource, ResourceKind};

/// Caller-supplied description of the message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EmailSpec {
    /// Name of an `EmailSenderConfig` in the same namespace.
    pub sender_config_ref: String,
    pub recipient_email: String,
    pub subject: String,
    pub body: String,
}

/// Delivery outcome. Anything other than `Unset` is terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryStatus {
    #[default]
    #[serde(rename = "")]
    Unset,
    Success,
    Failed,
}

impl DeliveryStatus {
    pub fn is_unset(&self) -> bool {
        matches!(self, Self::Unset)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_unset()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unset => "",
            Self::Success => "Success",
            Self::Failed => "Failed",
        }
    }
}

/// Status written back by the reconciler.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EmailStatus {
    #[serde(skip_serializing_if = "DeliveryStatus::is_unset")]
    pub delivery_status: DeliveryStatus,
    /// Provider-assigned id; only meaningful when `Success`.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub message_id: String,
    /// Human-readable failure; only meaningful when `Failed`.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error: String,
}

impl EmailStatus {
    pub fn delivered(message_id: impl Into<String>) -> Self {
        Self {
            delivery_status: DeliveryStatus::Success,
            message_id: message_id.into(),
            error: String::new(),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            delivery_status: DeliveryStatus::Failed,
            message_id: String::new(),
            error: error.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Email {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: EmailSpec,
    #[serde(default)]
    pub status: EmailStatus,
}

impl Email {
    pub fn new(metadata: ObjectMeta, spec: EmailSpec) -> Self {
        Self {
            metadata,
            spec,
            status: EmailStatus::default(),
        }
    }
}

impl Resource for Email {
    const KIND: ResourceKind = ResourceKind::Email;

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }

    fn spec_differs(&self, other: &Self) -> bool {
        self.spec != other.spec
    }

    fn carry_status_from(&mut self, previous: &Self) {
        self.status = previous.status.clone();
    }

    fn clear_status(&mut self) {
        self.status = EmailStatus::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_status_serializes_empty() {
        let json = serde_json::to_value(EmailStatus::default()).unwrap();
        assert_eq!(json, serde_json::json!({}));
    }

    #[test]
    fn status_uses_wire_names() {
        let json = serde_json::to_value(EmailStatus::delivered("abc123")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"deliveryStatus": "Success", "messageId": "abc123"})
        );

        let parsed: EmailStatus =
            serde_json::from_str(r#"{"deliveryStatus":"Failed","error":"boom"}"#).unwrap();
        assert_eq!(parsed, EmailStatus::failed("boom"));
    }

    #[test]
    fn empty_delivery_status_is_unset() {
        let parsed: EmailStatus = serde_json::from_str(r#"{"deliveryStatus":""}"#).unwrap();
        assert!(parsed.delivery_status.is_unset());
        assert!(!parsed.delivery_status.is_terminal());
    }

    #[test]
    fn spec_reads_camel_case_fields() {
        let email: Email = serde_json::from_str(
            r#"{
                "metadata": {"name": "welcome", "namespace": "team-a"},
                "spec": {
                    "senderConfigRef": "default-sender",
                    "recipientEmail": "alice@example.com",
                    "subject": "Hi",
                    "body": "Hello Alice"
                }
            }"#,
        )
        .unwrap();
        assert_eq!(email.spec.sender_config_ref, "default-sender");
        assert_eq!(email.spec.recipient_email, "alice@example.com");
        assert_eq!(email.metadata.namespace, "team-a");
        assert!(email.status.delivery_status.is_unset());
    }
}
