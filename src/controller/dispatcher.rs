//! Outbound delivery — hands a single message to the email provider.

use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::ProviderConfig;
use crate::error::{ConfigError, DeliveryError};

/// Longest slice of a rejection body kept for logs.
const MAX_ERROR_BODY: usize = 512;

/// Everything needed to send one message.
#[derive(Debug, Clone)]
pub struct OutboundEmail<'a> {
    pub sender_email: &'a str,
    pub api_token: &'a SecretString,
    pub recipient_email: &'a str,
    pub subject: &'a str,
    pub body: &'a str,
}

/// Performs the delivery side effect.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Send the message and return the provider's message id, which may be
    /// empty if the provider did not report one.
    async fn send(&self, email: &OutboundEmail<'_>) -> Result<String, DeliveryError>;
}

#[derive(Debug, Serialize)]
struct Address<'a> {
    email: &'a str,
}

/// JSON body of the provider's send endpoint.
#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    from: Address<'a>,
    to: [Address<'a>; 1],
    subject: &'a str,
    #[serde(skip_serializing_if = "is_blank")]
    text: &'a str,
}

fn is_blank(text: &&str) -> bool {
    text.is_empty()
}

impl<'a> SendRequest<'a> {
    fn from_outbound(email: &OutboundEmail<'a>) -> Self {
        Self {
            from: Address {
                email: email.sender_email,
            },
            to: [Address {
                email: email.recipient_email,
            }],
            subject: email.subject,
            text: email.body,
        }
    }
}

/// Build the shared outbound HTTP client.
pub fn build_http_client(config: &ProviderConfig) -> Result<reqwest::Client, ConfigError> {
    reqwest::Client::builder()
        .timeout(config.request_timeout)
        .build()
        .map_err(|e| ConfigError::HttpClient(e.to_string()))
}

/// Dispatcher for MailerSend-style HTTP APIs.
///
/// The `reqwest::Client` is built once and handed in; clones share its
/// connection pool.
#[derive(Debug, Clone)]
pub struct HttpDispatcher {
    client: reqwest::Client,
    url: String,
    message_id_header: String,
}

impl HttpDispatcher {
    pub fn new(client: reqwest::Client, config: &ProviderConfig) -> Self {
        Self {
            client,
            url: config.url.clone(),
            message_id_header: config.message_id_header.clone(),
        }
    }
}

#[async_trait]
impl Dispatcher for HttpDispatcher {
    async fn send(&self, email: &OutboundEmail<'_>) -> Result<String, DeliveryError> {
        let payload = SendRequest::from_outbound(email);

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(email.api_token.expose_secret())
            .json(&payload)
            .send()
            .await
            .map_err(|e| DeliveryError::TransportFailure(e.to_string()))?;

        let status = response.status();
        if status != StatusCode::OK && status != StatusCode::ACCEPTED {
            let mut body = response.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let cut = (0..=MAX_ERROR_BODY)
                    .rev()
                    .find(|&i| body.is_char_boundary(i))
                    .unwrap_or(0);
                body.truncate(cut);
            }
            warn!(
                status = %status,
                recipient = %email.recipient_email,
                body = %body,
                "Provider rejected email"
            );
            return Err(DeliveryError::ProviderRejected {
                status: status.as_u16(),
                body,
            });
        }

        let message_id = response
            .headers()
            .get(self.message_id_header.as_str())
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if message_id.is_empty() {
            debug!(header = %self.message_id_header, "Provider response carried no message id");
        }

        info!(
            recipient = %email.recipient_email,
            message_id = %message_id,
            "Email accepted by provider"
        );
        Ok(message_id)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn dispatcher_for(server: &MockServer, timeout: Duration) -> HttpDispatcher {
        let config = ProviderConfig {
            url: format!("{}/v1/email", server.uri()),
            request_timeout: timeout,
            ..ProviderConfig::default()
        };
        let client = build_http_client(&config).unwrap();
        HttpDispatcher::new(client, &config)
    }

    fn outbound<'a>(token: &'a SecretString, body: &'a str) -> OutboundEmail<'a> {
        OutboundEmail {
            sender_email: "noreply@example.com",
            api_token: token,
            recipient_email: "alice@example.com",
            subject: "Welcome",
            body,
        }
    }

    #[test]
    fn request_body_matches_provider_contract() {
        let token = SecretString::from("t");
        let json = serde_json::to_value(SendRequest::from_outbound(&outbound(&token, "Hi"))).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "from": {"email": "noreply@example.com"},
                "to": [{"email": "alice@example.com"}],
                "subject": "Welcome",
                "text": "Hi"
            })
        );
    }

    #[test]
    fn empty_body_omits_text() {
        let token = SecretString::from("t");
        let json = serde_json::to_value(SendRequest::from_outbound(&outbound(&token, ""))).unwrap();
        assert!(json.get("text").is_none());
    }

    #[tokio::test]
    async fn accepted_returns_message_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/email"))
            .and(header("authorization", "Bearer mlsn.abc"))
            .and(header("content-type", "application/json"))
            .and(body_json(serde_json::json!({
                "from": {"email": "noreply@example.com"},
                "to": [{"email": "alice@example.com"}],
                "subject": "Welcome",
                "text": "Hello Alice"
            })))
            .respond_with(ResponseTemplate::new(202).insert_header("X-Message-Id", "abc123"))
            .expect(1)
            .mount(&server)
            .await;

        let token = SecretString::from("mlsn.abc");
        let id = dispatcher_for(&server, Duration::from_secs(5))
            .send(&outbound(&token, "Hello Alice"))
            .await
            .unwrap();
        assert_eq!(id, "abc123");
    }

    #[tokio::test]
    async fn ok_without_header_yields_empty_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let token = SecretString::from("mlsn.abc");
        let id = dispatcher_for(&server, Duration::from_secs(5))
            .send(&outbound(&token, "Hello"))
            .await
            .unwrap();
        assert_eq!(id, "");
    }

    #[tokio::test]
    async fn other_success_codes_are_rejections() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(201))
            .mount(&server)
            .await;

        let token = SecretString::from("mlsn.abc");
        let err = dispatcher_for(&server, Duration::from_secs(5))
            .send(&outbound(&token, "Hello"))
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::ProviderRejected { status: 201, .. }));
    }

    #[tokio::test]
    async fn server_error_is_rejection_with_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
            .mount(&server)
            .await;

        let token = SecretString::from("mlsn.abc");
        let err = dispatcher_for(&server, Duration::from_secs(5))
            .send(&outbound(&token, "Hello"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            DeliveryError::ProviderRejected {
                status: 500,
                body: "upstream down".into()
            }
        );
        assert!(err.to_string().contains("500"));
    }

    #[tokio::test]
    async fn timeout_is_transport_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(202).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let token = SecretString::from("mlsn.abc");
        let err = dispatcher_for(&server, Duration::from_millis(100))
            .send(&outbound(&token, "Hello"))
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::TransportFailure(_)));
    }

    #[tokio::test]
    async fn connection_refused_is_transport_failure() {
        let config = ProviderConfig {
            url: "http://127.0.0.1:1/v1/email".into(),
            request_timeout: Duration::from_secs(2),
            ..ProviderConfig::default()
        };
        let dispatcher = HttpDispatcher::new(build_http_client(&config).unwrap(), &config);

        let token = SecretString::from("mlsn.abc");
        let err = dispatcher.send(&outbound(&token, "Hello")).await.unwrap_err();
        assert!(matches!(err, DeliveryError::TransportFailure(_)));
    }
}
