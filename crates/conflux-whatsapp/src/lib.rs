// SPDX-FileCopyrightText: 2026 Conflux Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! WhatsApp Cloud API adapter.
//!
//! Channel credentials: `token` is the system-user access token,
//! `account_id` the phone number id, `secret` the app secret. The secret
//! signs every inbound delivery (`X-Hub-Signature-256`, HMAC-SHA256 over the
//! raw body) and doubles as the verify token for the GET subscription
//! handshake.
//!
//! Webhook URL configuration lives at the Meta app level; registration here
//! subscribes the app to the business account so events start flowing, and
//! a URL change is re-verified through the GET handshake rather than an API
//! call.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::Sha256;
use tracing::{debug, warn};

use conflux_core::{
    Channel, Inbound, InvalidEvent, NormalizedEvent, ProviderAdapter, ProviderCapabilities,
    ProviderKind, ProviderSendOk, RateLimiter, RawWebhook, SendError, SubscriptionHandle,
};

const DEFAULT_BASE_URL: &str = "https://graph.facebook.com/v19.0";
const SIGNATURE_HEADER: &str = "x-hub-signature-256";

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Deserialize)]
struct Notification {
    entry: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
struct Entry {
    changes: Vec<Change>,
}

#[derive(Debug, Deserialize)]
struct Change {
    value: ChangeValue,
}

#[derive(Debug, Deserialize)]
struct ChangeValue {
    #[serde(default)]
    messages: Vec<WaMessage>,
    #[serde(default)]
    contacts: Vec<WaContact>,
}

#[derive(Debug, Deserialize)]
struct WaMessage {
    id: String,
    from: String,
    timestamp: String,
    #[serde(rename = "type")]
    kind: String,
    text: Option<WaText>,
}

#[derive(Debug, Deserialize)]
struct WaText {
    body: String,
}

#[derive(Debug, Deserialize)]
struct WaContact {
    profile: Option<WaProfile>,
    wa_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WaProfile {
    name: Option<String>,
}

/// Adapter for [`ProviderKind::Whatsapp`].
pub struct WhatsappAdapter {
    http: reqwest::Client,
    base_url: String,
    limiter: RateLimiter,
}

impl WhatsappAdapter {
    pub fn new(burst: u32, per_second: f64) -> Self {
        Self::with_base_url(DEFAULT_BASE_URL, burst, per_second)
    }

    /// Point the adapter at a different Graph API host (tests).
    pub fn with_base_url(base_url: impl Into<String>, burst: u32, per_second: f64) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            limiter: RateLimiter::new(burst, per_second),
        }
    }

    fn access_token<'a>(&self, channel: &'a Channel) -> Result<&'a str, SendError> {
        channel
            .credentials
            .token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or(SendError::AuthExpired)
    }

    fn phone_number_id<'a>(&self, channel: &'a Channel) -> Result<&'a str, SendError> {
        channel.credentials.account_id.as_deref().ok_or_else(|| {
            SendError::PermanentRejection("whatsapp channel has no phone number id".into())
        })
    }
}

fn verify_signature(secret: &str, body: &str, header: Option<&str>) -> bool {
    let Some(signature) = header.and_then(|h| h.strip_prefix("sha256=")) else {
        return false;
    };
    let Ok(expected) = hex::decode(signature) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body.as_bytes());
    mac.verify_slice(&expected).is_ok()
}

fn map_graph_error(status: reqwest::StatusCode, body: &Value) -> SendError {
    let code = body
        .pointer("/error/code")
        .and_then(Value::as_i64)
        .unwrap_or(0);
    let message = body
        .pointer("/error/message")
        .and_then(Value::as_str)
        .unwrap_or("unknown graph error")
        .to_string();
    match code {
        190 => SendError::AuthExpired,
        4 | 80007 | 130429 => SendError::RateLimited { retry_after: None },
        131026 | 131047 => SendError::RecipientUnreachable,
        _ if status.is_server_error() => {
            SendError::TransientNetwork(format!("graph returned {status}: {message}"))
        }
        _ => SendError::PermanentRejection(format!("graph error {code}: {message}")),
    }
}

#[async_trait]
impl ProviderAdapter for WhatsappAdapter {
    fn provider(&self) -> ProviderKind {
        ProviderKind::Whatsapp
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            supports_url_update: true,
            needs_remote_subscription: true,
        }
    }

    async fn normalize_inbound(
        &self,
        channel: &Channel,
        raw: &RawWebhook,
    ) -> Result<Inbound, InvalidEvent> {
        // The app secret is mandatory for WhatsApp; deliveries without a
        // valid signature are rejected outright.
        let Some(secret) = channel.credentials.secret.as_deref() else {
            return Err(InvalidEvent::BadSignature);
        };
        if !verify_signature(secret, &raw.body, raw.header(SIGNATURE_HEADER)) {
            return Err(InvalidEvent::BadSignature);
        }

        let notification: Notification = serde_json::from_str(&raw.body)
            .map_err(|e| InvalidEvent::Malformed(e.to_string()))?;

        // One delivery carries at most one user message in practice; status
        // updates arrive as separate notifications with no messages array.
        for entry in notification.entry {
            for change in entry.changes {
                let display_name = change
                    .value
                    .contacts
                    .first()
                    .and_then(|c| c.profile.as_ref())
                    .and_then(|p| p.name.clone());
                let contact_wa_id = change
                    .value
                    .contacts
                    .first()
                    .and_then(|c| c.wa_id.clone());

                for message in change.value.messages {
                    if message.kind != "text" {
                        debug!(kind = %message.kind, "non-text whatsapp message ignored");
                        continue;
                    }
                    let Some(text) = message.text else {
                        continue;
                    };
                    let timestamp = message
                        .timestamp
                        .parse::<i64>()
                        .ok()
                        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
                        .unwrap_or_else(Utc::now);
                    return Ok(Inbound::Event(NormalizedEvent {
                        conversation_key: message.from.clone(),
                        contact_id: contact_wa_id.unwrap_or_else(|| message.from.clone()),
                        display_name,
                        content: text.body,
                        provider_message_id: message.id,
                        timestamp,
                    }));
                }
            }
        }
        Ok(Inbound::Ignored)
    }

    fn verify_challenge(
        &self,
        channel: &Channel,
        query: &HashMap<String, String>,
    ) -> Option<String> {
        if query.get("hub.mode").map(String::as_str) != Some("subscribe") {
            return None;
        }
        let expected = channel.credentials.secret.as_deref()?;
        if query.get("hub.verify_token").map(String::as_str) != Some(expected) {
            return None;
        }
        query.get("hub.challenge").cloned()
    }

    async fn send_message(
        &self,
        channel: &Channel,
        conversation_key: &str,
        content: &str,
    ) -> Result<ProviderSendOk, SendError> {
        let token = self.access_token(channel)?;
        let phone_number_id = self.phone_number_id(channel)?;

        self.limiter.acquire(&channel.id.0).await;
        let response = self
            .http
            .post(format!("{}/{phone_number_id}/messages", self.base_url))
            .bearer_auth(token)
            .json(&json!({
                "messaging_product": "whatsapp",
                "to": conversation_key,
                "type": "text",
                "text": {"body": content},
            }))
            .send()
            .await
            .map_err(|e| SendError::TransientNetwork(e.to_string()))?;

        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);
        if !status.is_success() {
            return Err(map_graph_error(status, &body));
        }

        Ok(ProviderSendOk {
            provider_message_id: body
                .pointer("/messages/0/id")
                .and_then(Value::as_str)
                .map(String::from),
        })
    }

    async fn register_webhook(
        &self,
        channel: &Channel,
        callback_url: &str,
    ) -> Result<SubscriptionHandle, SendError> {
        let token = self.access_token(channel)?;
        let phone_number_id = self.phone_number_id(channel)?;

        // Subscribes the app on the number's business account; the callback
        // URL itself is confirmed through the GET handshake.
        let response = self
            .http
            .post(format!(
                "{}/{phone_number_id}/subscribed_apps",
                self.base_url
            ))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| SendError::TransientNetwork(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body: Value = response.json().await.unwrap_or(Value::Null);
            return Err(map_graph_error(status, &body));
        }

        Ok(SubscriptionHandle {
            external_id: Some(phone_number_id.to_string()),
            callback_url: callback_url.to_string(),
            title: None,
        })
    }

    async fn unregister_webhook(
        &self,
        channel: &Channel,
        handle: &SubscriptionHandle,
    ) -> Result<(), SendError> {
        let token = self.access_token(channel)?;
        let phone_number_id = self.phone_number_id(channel)?;

        let response = self
            .http
            .delete(format!(
                "{}/{phone_number_id}/subscribed_apps",
                self.base_url
            ))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| SendError::TransientNetwork(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            warn!(url = %handle.callback_url, "whatsapp subscription already gone");
            return Ok(());
        }
        if !status.is_success() {
            let body: Value = response.json().await.unwrap_or(Value::Null);
            return Err(map_graph_error(status, &body));
        }
        Ok(())
    }
}
