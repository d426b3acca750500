// SPDX-FileCopyrightText: 2026 Waitline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Outbound messaging provider abstraction plus the HTTP implementation
//! for WhatsApp-style cloud messaging APIs.
//!
//! Failures are split into two classes the retry sweeper treats
//! differently: [`WaitlineError::Transient`] (5xx, timeouts; retry with
//! backoff) and [`WaitlineError::Channel`] (4xx; the payload is wrong and
//! retrying will not help).

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;
use waitline_core::WaitlineError;

/// One interactive reply button.
#[derive(Debug, Clone, Deserialize)]
pub struct ReplyButton {
    pub id: String,
    pub title: String,
}

/// Body payload for `kind = "buttons"` outbox entries: the body text plus
/// up to three quick-reply buttons, stored as JSON in the outbox row.
#[derive(Debug, Clone, Deserialize)]
pub struct ButtonsPayload {
    pub body: String,
    pub buttons: Vec<ReplyButton>,
}

#[async_trait]
pub trait MessageProvider: Send + Sync {
    /// Deliver one message. `kind` selects the payload shape:
    /// "text" (plain body), "template" (pre-approved template name),
    /// "buttons" (JSON [`ButtonsPayload`]).
    async fn send(&self, phone: &str, body: &str, kind: &str) -> Result<(), WaitlineError>;
}

/// Graph-API style HTTP provider: POST {base_url}/{sender_id}/messages
/// with a bearer token.
pub struct HttpProvider {
    http: reqwest::Client,
    base_url: String,
    sender_id: String,
    access_token: String,
}

impl HttpProvider {
    pub fn new(base_url: &str, sender_id: &str, access_token: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            sender_id: sender_id.to_string(),
            access_token: access_token.to_string(),
        }
    }

    fn payload(&self, phone: &str, body: &str, kind: &str) -> Result<serde_json::Value, WaitlineError> {
        let payload = match kind {
            "text" => json!({
                "messaging_product": "whatsapp",
                "to": phone,
                "type": "text",
                "text": { "body": body },
            }),
            "template" => json!({
                "messaging_product": "whatsapp",
                "to": phone,
                "type": "template",
                "template": {
                    "name": body,
                    "language": { "code": "en" },
                },
            }),
            "buttons" => {
                let parsed: ButtonsPayload = serde_json::from_str(body).map_err(|e| {
                    WaitlineError::Channel {
                        message: format!("malformed buttons payload: {e}"),
                        source: Some(Box::new(e)),
                    }
                })?;
                json!({
                    "messaging_product": "whatsapp",
                    "to": phone,
                    "type": "interactive",
                    "interactive": {
                        "type": "button",
                        "body": { "text": parsed.body },
                        "action": {
                            "buttons": parsed.buttons.iter().map(|b| json!({
                                "type": "reply",
                                "reply": { "id": b.id, "title": b.title },
                            })).collect::<Vec<_>>(),
                        },
                    },
                })
            }
            other => {
                return Err(WaitlineError::Channel {
                    message: format!("unknown message kind: {other}"),
                    source: None,
                })
            }
        };
        Ok(payload)
    }
}

#[async_trait]
impl MessageProvider for HttpProvider {
    async fn send(&self, phone: &str, body: &str, kind: &str) -> Result<(), WaitlineError> {
        let payload = self.payload(phone, body, kind)?;
        let url = format!("{}/{}/messages", self.base_url, self.sender_id);

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| WaitlineError::Transient {
                message: format!("provider request failed: {e}"),
                source: Some(Box::new(e)),
            })?;

        let status = response.status();
        if status.is_success() {
            debug!(kind, %status, "message delivered");
            return Ok(());
        }

        let detail = response.text().await.unwrap_or_default();
        if status.is_server_error() || status.as_u16() == 429 {
            Err(WaitlineError::Transient {
                message: format!("provider returned {status}: {detail}"),
                source: None,
            })
        } else {
            Err(WaitlineError::Channel {
                message: format!("provider rejected message ({status}): {detail}"),
                source: None,
            })
        }
    }
}
