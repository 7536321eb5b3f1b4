//! Messaging channel plumbing: webhook signatures, event envelope, replies.
//!
//! Inbound requests carry `x-line-signature`, the base64 HMAC-SHA256 of the
//! raw body keyed with the channel secret. Outbound replies go through the
//! [`ReplySender`] trait so tests and dry runs can swap the HTTP client out.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::Duration;
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-line-signature";

/// Most messages the reply API accepts per call
pub const MAX_REPLY_MESSAGES: usize = 5;

// ============================================================================
// Signatures
// ============================================================================

/// Base64 HMAC-SHA256 of `body` keyed with `secret`.
pub fn sign_body(secret: &str, body: &[u8]) -> String {
    // HMAC accepts keys of any length, so this cannot fail.
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(body);
    BASE64.encode(mac.finalize().into_bytes())
}

/// Constant-time check of a supplied signature against the raw body.
pub fn verify_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    let Ok(provided) = BASE64.decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    let expected = mac.finalize().into_bytes();
    bool::from(expected.as_slice().ct_eq(provided.as_slice()))
}

// ============================================================================
// Webhook envelope
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookEnvelope {
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub events: Vec<WebhookEvent>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub reply_token: Option<String>,
    #[serde(default)]
    pub webhook_event_id: Option<String>,
    #[serde(default)]
    pub message: Option<EventMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

impl WebhookEvent {
    /// `(reply_token, text)` for a text message event that can be answered.
    pub fn text_message(&self) -> Option<(&str, &str)> {
        if self.kind != "message" {
            return None;
        }
        let message = self.message.as_ref()?;
        if message.kind != "text" {
            return None;
        }
        Some((self.reply_token.as_deref()?, message.text.as_deref()?))
    }
}

// ============================================================================
// Replies
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplyMessage {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub text: String,
}

impl ReplyMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: "text",
            text: text.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ReplyError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("reply API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Missing channel access token")]
    MissingToken,
}

#[async_trait]
pub trait ReplySender: Send + Sync {
    async fn reply(&self, reply_token: &str, messages: &[ReplyMessage]) -> Result<(), ReplyError>;

    fn name(&self) -> &str;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReplyRequest<'a> {
    reply_token: &'a str,
    messages: &'a [ReplyMessage],
}

#[derive(Debug, Clone)]
pub struct LineReplyClient {
    client: Client,
    access_token: String,
    base_url: String,
}

impl LineReplyClient {
    pub fn new(base_url: String, access_token: String) -> Result<Self, ReplyError> {
        if access_token.is_empty() {
            return Err(ReplyError::MissingToken);
        }
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            client,
            access_token,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ReplySender for LineReplyClient {
    async fn reply(&self, reply_token: &str, messages: &[ReplyMessage]) -> Result<(), ReplyError> {
        let url = format!("{}/v2/bot/message/reply", self.base_url);
        let messages = &messages[..messages.len().min(MAX_REPLY_MESSAGES)];

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&ReplyRequest {
                reply_token,
                messages,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ReplyError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "line"
    }
}

/// Logs replies instead of sending them.
#[derive(Debug, Default, Clone)]
pub struct LogReplySender;

#[async_trait]
impl ReplySender for LogReplySender {
    async fn reply(&self, reply_token: &str, messages: &[ReplyMessage]) -> Result<(), ReplyError> {
        tracing::info!(reply_token, count = messages.len(), "Reply suppressed (send_replies = false)");
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_signature_roundtrip_and_tamper() {
        let body = br#"{"events":[]}"#;
        let signature = sign_body("channel-secret", body);

        assert!(verify_signature("channel-secret", body, &signature));
        assert!(!verify_signature("other-secret", body, &signature));
        assert!(!verify_signature("channel-secret", br#"{"events":[{}]}"#, &signature));
        assert!(!verify_signature("channel-secret", body, "not base64 !!"));
        assert!(!verify_signature("channel-secret", body, ""));
    }

    #[test]
    fn test_known_signature_vector() {
        // RFC 4231 test case 2, base64 encoded
        assert_eq!(
            sign_body("Jefe", b"what do ya want for nothing?"),
            "W9zBRr9gdU5qBCQmCJV1x1oAPwidJzmDnexYuWTsOEM="
        );
    }

    #[test]
    fn test_text_message_extraction() {
        let envelope: WebhookEnvelope = serde_json::from_value(serde_json::json!({
            "destination": "U123",
            "events": [
                {
                    "type": "message",
                    "replyToken": "r1",
                    "webhookEventId": "e1",
                    "message": { "type": "text", "id": "m1", "text": "１２３４" }
                },
                { "type": "follow", "replyToken": "r2" },
                {
                    "type": "message",
                    "replyToken": "r3",
                    "message": { "type": "image", "id": "m3" }
                }
            ]
        }))
        .unwrap();

        assert_eq!(envelope.events.len(), 3);
        assert_eq!(envelope.events[0].text_message(), Some(("r1", "１２３４")));
        assert_eq!(envelope.events[0].webhook_event_id.as_deref(), Some("e1"));
        assert_eq!(envelope.events[1].text_message(), None);
        assert_eq!(envelope.events[2].text_message(), None);
    }

    #[tokio::test]
    async fn test_reply_posts_bearer_json() {
        let mock_server = MockServer::start().await;
        let client = LineReplyClient::new(mock_server.uri(), "token-1".to_string()).unwrap();

        Mock::given(method("POST"))
            .and(path("/v2/bot/message/reply"))
            .and(header("authorization", "Bearer token-1"))
            .and(body_json(serde_json::json!({
                "replyToken": "r1",
                "messages": [{ "type": "text", "text": "hello" }]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .expect(1)
            .mount(&mock_server)
            .await;

        client
            .reply("r1", &[ReplyMessage::text("hello")])
            .await
            .expect("reply should succeed");
    }

    #[tokio::test]
    async fn test_reply_error_status_surfaces() {
        let mock_server = MockServer::start().await;
        let client = LineReplyClient::new(mock_server.uri(), "token-1".to_string()).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("Invalid reply token"))
            .mount(&mock_server)
            .await;

        let err = client.reply("r1", &[ReplyMessage::text("x")]).await.unwrap_err();
        assert!(matches!(err, ReplyError::Api { status: 400, .. }));
    }
}
