// SPDX-FileCopyrightText: 2026 Conflux Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! VK community messages adapter (Callback API + messages.send).
//!
//! Channel credentials: `token` is the community access token, `account_id`
//! the group id, `secret` the callback secret VK echoes in every event.
//!
//! VK's endpoint probe (`type: "confirmation"`) must be answered with a
//! per-group confirmation code. The code is fetched via
//! `groups.getCallbackConfirmationCode` during webhook registration and
//! cached; a probe arriving after a restart refetches it on demand.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use conflux_core::{
    Channel, Inbound, InvalidEvent, NormalizedEvent, ProviderAdapter, ProviderCapabilities,
    ProviderKind, ProviderSendOk, RateLimiter, RawWebhook, SendError, SubscriptionHandle,
};

const API_VERSION: &str = "5.199";
const DEFAULT_BASE_URL: &str = "https://api.vk.com/method";

#[derive(Debug, Deserialize)]
struct CallbackEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    secret: Option<String>,
    #[serde(default)]
    object: Option<CallbackObject>,
}

#[derive(Debug, Deserialize)]
struct CallbackObject {
    message: Option<VkMessage>,
}

#[derive(Debug, Deserialize)]
struct VkMessage {
    id: i64,
    from_id: i64,
    peer_id: i64,
    date: i64,
    #[serde(default)]
    text: String,
}

/// Adapter for [`ProviderKind::Vk`].
pub struct VkAdapter {
    http: reqwest::Client,
    base_url: String,
    limiter: RateLimiter,
    confirmation_codes: DashMap<String, String>,
}

impl VkAdapter {
    pub fn new(burst: u32, per_second: f64) -> Self {
        Self::with_base_url(DEFAULT_BASE_URL, burst, per_second)
    }

    /// Point the adapter at a different API host (tests).
    pub fn with_base_url(base_url: impl Into<String>, burst: u32, per_second: f64) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            limiter: RateLimiter::new(burst, per_second),
            confirmation_codes: DashMap::new(),
        }
    }

    fn credentials<'a>(&self, channel: &'a Channel) -> Result<(&'a str, &'a str), SendError> {
        let token = channel
            .credentials
            .token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or(SendError::AuthExpired)?;
        let group_id = channel.credentials.account_id.as_deref().ok_or_else(|| {
            SendError::PermanentRejection("vk channel has no group id configured".into())
        })?;
        Ok((token, group_id))
    }

    /// One VK API method call; unwraps the `response`/`error` envelope.
    async fn call(
        &self,
        method: &str,
        token: &str,
        params: &[(&str, String)],
    ) -> Result<Value, SendError> {
        let mut form: Vec<(&str, String)> = params.to_vec();
        form.push(("access_token", token.to_string()));
        form.push(("v", API_VERSION.to_string()));

        let response = self
            .http
            .post(format!("{}/{method}", self.base_url))
            .form(&form)
            .send()
            .await
            .map_err(|e| SendError::TransientNetwork(e.to_string()))?;

        if response.status().is_server_error() {
            return Err(SendError::TransientNetwork(format!(
                "vk returned {}",
                response.status()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| SendError::TransientNetwork(e.to_string()))?;

        if let Some(error) = body.get("error") {
            let code = error.get("error_code").and_then(Value::as_i64).unwrap_or(0);
            let msg = error
                .get("error_msg")
                .and_then(Value::as_str)
                .unwrap_or("unknown vk error")
                .to_string();
            return Err(map_vk_error(code, msg));
        }

        body.get("response")
            .cloned()
            .ok_or_else(|| SendError::TransientNetwork("vk response missing payload".into()))
    }

    async fn confirmation_code(&self, channel: &Channel) -> Result<String, SendError> {
        if let Some(code) = self.confirmation_codes.get(&channel.id.0) {
            return Ok(code.clone());
        }
        let (token, group_id) = self.credentials(channel)?;
        let response = self
            .call(
                "groups.getCallbackConfirmationCode",
                token,
                &[("group_id", group_id.to_string())],
            )
            .await?;
        let code = response
            .get("code")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                SendError::TransientNetwork("vk confirmation response missing code".into())
            })?
            .to_string();
        self.confirmation_codes
            .insert(channel.id.0.clone(), code.clone());
        Ok(code)
    }
}

fn map_vk_error(code: i64, msg: String) -> SendError {
    match code {
        5 => SendError::AuthExpired,
        6 | 9 | 29 => SendError::RateLimited { retry_after: None },
        900 | 901 | 902 => SendError::RecipientUnreachable,
        _ => SendError::PermanentRejection(format!("vk error {code}: {msg}")),
    }
}

#[async_trait]
impl ProviderAdapter for VkAdapter {
    fn provider(&self) -> ProviderKind {
        ProviderKind::Vk
    }

    fn capabilities(&self) -> ProviderCapabilities {
        // Callback servers are immutable; a URL change is delete + add.
        ProviderCapabilities {
            supports_url_update: false,
            needs_remote_subscription: true,
        }
    }

    async fn normalize_inbound(
        &self,
        channel: &Channel,
        raw: &RawWebhook,
    ) -> Result<Inbound, InvalidEvent> {
        let envelope: CallbackEnvelope = serde_json::from_str(&raw.body)
            .map_err(|e| InvalidEvent::Malformed(e.to_string()))?;

        if let Some(expected) = channel.credentials.secret.as_deref() {
            if envelope.secret.as_deref() != Some(expected) {
                return Err(InvalidEvent::BadSignature);
            }
        }

        match envelope.kind.as_str() {
            "confirmation" => {
                let code = self.confirmation_code(channel).await.map_err(|e| {
                    InvalidEvent::Malformed(format!("confirmation code unavailable: {e}"))
                })?;
                Ok(Inbound::Challenge(code))
            }
            "message_new" => {
                let Some(message) = envelope.object.and_then(|o| o.message) else {
                    return Err(InvalidEvent::Malformed(
                        "message_new without message object".into(),
                    ));
                };
                // Negative from_id is the community itself (our own reply
                // echoed back).
                if message.from_id < 0 {
                    return Ok(Inbound::Ignored);
                }
                if message.text.is_empty() {
                    debug!(peer = message.peer_id, "empty vk message ignored");
                    return Ok(Inbound::Ignored);
                }
                Ok(Inbound::Event(NormalizedEvent {
                    conversation_key: message.peer_id.to_string(),
                    contact_id: message.from_id.to_string(),
                    display_name: None,
                    content: message.text,
                    provider_message_id: message.id.to_string(),
                    timestamp: DateTime::<Utc>::from_timestamp(message.date, 0)
                        .unwrap_or_else(Utc::now),
                }))
            }
            other => {
                debug!(kind = other, "vk event type ignored");
                Ok(Inbound::Ignored)
            }
        }
    }

    async fn send_message(
        &self,
        channel: &Channel,
        conversation_key: &str,
        content: &str,
    ) -> Result<ProviderSendOk, SendError> {
        let (token, _) = self.credentials(channel)?;
        // messages.send deduplicates on random_id per peer.
        let random_id = (Uuid::new_v4().as_u128() as i64) & i64::MAX;

        self.limiter.acquire(&channel.id.0).await;
        let response = self
            .call(
                "messages.send",
                token,
                &[
                    ("peer_id", conversation_key.to_string()),
                    ("message", content.to_string()),
                    ("random_id", random_id.to_string()),
                ],
            )
            .await?;

        Ok(ProviderSendOk {
            provider_message_id: response.as_i64().map(|id| id.to_string()),
        })
    }

    async fn register_webhook(
        &self,
        channel: &Channel,
        callback_url: &str,
    ) -> Result<SubscriptionHandle, SendError> {
        let (token, group_id) = self.credentials(channel)?;

        let mut params = vec![
            ("group_id", group_id.to_string()),
            ("url", callback_url.to_string()),
            ("title", "conflux".to_string()),
        ];
        if let Some(secret) = channel.credentials.secret.as_deref() {
            params.push(("secret_key", secret.to_string()));
        }
        let added = self.call("groups.addCallbackServer", token, &params).await?;
        let server_id = added
            .get("server_id")
            .and_then(Value::as_i64)
            .ok_or_else(|| {
                SendError::TransientNetwork("vk addCallbackServer missing server_id".into())
            })?;

        // Only message_new events are of interest.
        self.call(
            "groups.setCallbackSettings",
            token,
            &[
                ("group_id", group_id.to_string()),
                ("server_id", server_id.to_string()),
                ("api_version", API_VERSION.to_string()),
                ("message_new", "1".to_string()),
            ],
        )
        .await?;

        // Warm the confirmation cache so the probe VK fires right after
        // registration is answered without an extra API call.
        let _ = self.confirmation_code(channel).await;

        Ok(SubscriptionHandle {
            external_id: Some(server_id.to_string()),
            callback_url: callback_url.to_string(),
            title: Some("conflux".into()),
        })
    }

    async fn unregister_webhook(
        &self,
        channel: &Channel,
        handle: &SubscriptionHandle,
    ) -> Result<(), SendError> {
        let Some(server_id) = handle.external_id.as_deref() else {
            return Ok(());
        };
        let (token, group_id) = self.credentials(channel)?;
        match self
            .call(
                "groups.deleteCallbackServer",
                token,
                &[
                    ("group_id", group_id.to_string()),
                    ("server_id", server_id.to_string()),
                ],
            )
            .await
        {
            Ok(_) => Ok(()),
            // A server VK no longer knows about is already unregistered.
            Err(SendError::PermanentRejection(msg)) => {
                warn!(server_id, %msg, "vk deleteCallbackServer rejected, treating as removed");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
