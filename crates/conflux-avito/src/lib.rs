// SPDX-FileCopyrightText: 2026 Conflux Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Avito messenger adapter.
//!
//! Channel credentials: `token` is the OAuth client id, `secret` the client
//! secret, `account_id` the Avito user id. Access tokens come from the
//! client-credentials flow and are cached per channel until shortly before
//! expiry; a 401 invalidates the cache and the request is retried once with
//! a fresh token before giving up as expired authorization.
//!
//! Avito does not sign webhook deliveries. The webhook path embeds the
//! unguessable channel id, and own-author echoes are dropped by comparing
//! the event's author against the channel's account id.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use conflux_core::{
    Channel, Inbound, InvalidEvent, NormalizedEvent, ProviderAdapter, ProviderCapabilities,
    ProviderKind, ProviderSendOk, RateLimiter, RawWebhook, SendError, SubscriptionHandle,
};

const DEFAULT_BASE_URL: &str = "https://api.avito.ru";
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct WebhookEnvelope {
    payload: WebhookPayload,
}

#[derive(Debug, Deserialize)]
struct WebhookPayload {
    #[serde(rename = "type")]
    kind: String,
    value: Option<WebhookMessage>,
}

#[derive(Debug, Deserialize)]
struct WebhookMessage {
    id: String,
    chat_id: String,
    author_id: i64,
    created: i64,
    #[serde(rename = "type")]
    kind: String,
    content: Option<MessageContent>,
}

#[derive(Debug, Deserialize)]
struct MessageContent {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Clone)]
struct CachedToken {
    token: String,
    expires_at: Instant,
}

/// Adapter for [`ProviderKind::Avito`].
pub struct AvitoAdapter {
    http: reqwest::Client,
    base_url: String,
    limiter: RateLimiter,
    tokens: DashMap<String, CachedToken>,
}

impl AvitoAdapter {
    pub fn new(burst: u32, per_second: f64) -> Self {
        Self::with_base_url(DEFAULT_BASE_URL, burst, per_second)
    }

    /// Point the adapter at a different API host (tests).
    pub fn with_base_url(base_url: impl Into<String>, burst: u32, per_second: f64) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            limiter: RateLimiter::new(burst, per_second),
            tokens: DashMap::new(),
        }
    }

    fn client_credentials<'a>(&self, channel: &'a Channel) -> Result<(&'a str, &'a str), SendError> {
        let client_id = channel
            .credentials
            .token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or(SendError::AuthExpired)?;
        let client_secret = channel
            .credentials
            .secret
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or(SendError::AuthExpired)?;
        Ok((client_id, client_secret))
    }

    fn account_id<'a>(&self, channel: &'a Channel) -> Result<&'a str, SendError> {
        channel.credentials.account_id.as_deref().ok_or_else(|| {
            SendError::PermanentRejection("avito channel has no account id configured".into())
        })
    }

    async fn access_token(&self, channel: &Channel) -> Result<String, SendError> {
        if let Some(cached) = self.tokens.get(&channel.id.0) {
            if cached.expires_at > Instant::now() {
                return Ok(cached.token.clone());
            }
        }
        let (client_id, client_secret) = self.client_credentials(channel)?;

        let response = self
            .http
            .post(format!("{}/token", self.base_url))
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", client_id),
                ("client_secret", client_secret),
            ])
            .send()
            .await
            .map_err(|e| SendError::TransientNetwork(e.to_string()))?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED
            || response.status() == reqwest::StatusCode::FORBIDDEN
        {
            return Err(SendError::AuthExpired);
        }
        if !response.status().is_success() {
            return Err(SendError::TransientNetwork(format!(
                "avito token endpoint returned {}",
                response.status()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| SendError::TransientNetwork(e.to_string()))?;
        let token = body
            .get("access_token")
            .and_then(Value::as_str)
            .ok_or_else(|| SendError::TransientNetwork("avito token response malformed".into()))?
            .to_string();
        let expires_in = body
            .get("expires_in")
            .and_then(Value::as_u64)
            .unwrap_or(3600);

        self.tokens.insert(
            channel.id.0.clone(),
            CachedToken {
                token: token.clone(),
                expires_at: Instant::now() + Duration::from_secs(expires_in)
                    - TOKEN_EXPIRY_MARGIN.min(Duration::from_secs(expires_in)),
            },
        );
        Ok(token)
    }

    /// Authenticated POST with one token-refresh retry on 401.
    async fn authed_post(
        &self,
        channel: &Channel,
        path: &str,
        body: &Value,
    ) -> Result<Value, SendError> {
        let mut refreshed = false;
        loop {
            let token = self.access_token(channel).await?;
            let response = self
                .http
                .post(format!("{}{path}", self.base_url))
                .bearer_auth(&token)
                .json(body)
                .send()
                .await
                .map_err(|e| SendError::TransientNetwork(e.to_string()))?;

            let status = response.status();
            if status == reqwest::StatusCode::UNAUTHORIZED && !refreshed {
                // Token may have been revoked server-side; retry once fresh.
                debug!(channel = %channel.id.0, "avito 401, refreshing access token");
                self.tokens.remove(&channel.id.0);
                refreshed = true;
                continue;
            }
            return handle_response(status, response).await;
        }
    }
}

async fn handle_response(
    status: reqwest::StatusCode,
    response: reqwest::Response,
) -> Result<Value, SendError> {
    if status.is_success() {
        return response
            .json()
            .await
            .or_else(|_| Ok(Value::Null));
    }
    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs);
    let body = response.text().await.unwrap_or_default();
    Err(match status.as_u16() {
        401 | 403 => SendError::AuthExpired,
        404 => SendError::RecipientUnreachable,
        429 => SendError::RateLimited { retry_after },
        500..=599 => SendError::TransientNetwork(format!("avito returned {status}")),
        _ => SendError::PermanentRejection(format!("avito returned {status}: {body}")),
    })
}

#[async_trait]
impl ProviderAdapter for AvitoAdapter {
    fn provider(&self) -> ProviderKind {
        ProviderKind::Avito
    }

    fn capabilities(&self) -> ProviderCapabilities {
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
        let envelope: WebhookEnvelope = serde_json::from_str(&raw.body)
            .map_err(|e| InvalidEvent::Malformed(e.to_string()))?;

        if envelope.payload.kind != "message" {
            debug!(kind = %envelope.payload.kind, "avito webhook type ignored");
            return Ok(Inbound::Ignored);
        }
        let Some(message) = envelope.payload.value else {
            return Err(InvalidEvent::Malformed("message payload without value".into()));
        };

        // Our own outbound messages come back through the webhook too.
        let own_account = channel
            .credentials
            .account_id
            .as_deref()
            .and_then(|id| id.parse::<i64>().ok());
        if own_account == Some(message.author_id) {
            return Ok(Inbound::Ignored);
        }
        if message.kind != "text" {
            return Ok(Inbound::Ignored);
        }
        let Some(text) = message.content.and_then(|c| c.text).filter(|t| !t.is_empty()) else {
            return Ok(Inbound::Ignored);
        };

        Ok(Inbound::Event(NormalizedEvent {
            conversation_key: message.chat_id,
            contact_id: message.author_id.to_string(),
            display_name: None,
            content: text,
            provider_message_id: message.id,
            timestamp: DateTime::<Utc>::from_timestamp(message.created, 0)
                .unwrap_or_else(Utc::now),
        }))
    }

    async fn send_message(
        &self,
        channel: &Channel,
        conversation_key: &str,
        content: &str,
    ) -> Result<ProviderSendOk, SendError> {
        let account_id = self.account_id(channel)?;
        let path = format!("/messenger/v1/accounts/{account_id}/chats/{conversation_key}/messages");
        let body = json!({
            "message": {"text": content},
            "type": "text",
        });

        self.limiter.acquire(&channel.id.0).await;
        let response = self.authed_post(channel, &path, &body).await?;
        Ok(ProviderSendOk {
            provider_message_id: response
                .get("id")
                .and_then(Value::as_str)
                .map(String::from),
        })
    }

    async fn register_webhook(
        &self,
        channel: &Channel,
        callback_url: &str,
    ) -> Result<SubscriptionHandle, SendError> {
        self.authed_post(channel, "/messenger/v3/webhook", &json!({"url": callback_url}))
            .await?;
        Ok(SubscriptionHandle {
            external_id: None,
            callback_url: callback_url.to_string(),
            title: None,
        })
    }

    async fn unregister_webhook(
        &self,
        channel: &Channel,
        handle: &SubscriptionHandle,
    ) -> Result<(), SendError> {
        match self
            .authed_post(
                channel,
                "/messenger/v1/webhook/unsubscribe",
                &json!({"url": handle.callback_url}),
            )
            .await
        {
            Ok(_) => Ok(()),
            // An unknown URL is already unsubscribed.
            Err(SendError::RecipientUnreachable) => {
                warn!(url = %handle.callback_url, "avito reported webhook unknown on unsubscribe");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conflux_core::{ChannelCredentials, ChannelId, ChannelStatus};
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn channel() -> Channel {
        Channel {
            id: ChannelId("ch-av".into()),
            provider: ProviderKind::Avito,
            status: ChannelStatus::Active,
            credentials: ChannelCredentials {
                token: Some("client-id".into()),
                account_id: Some("987654".into()),
                secret: Some("client-secret".into()),
            },
            created_at: "2026-01-01T00:00:00.000Z".into(),
        }
    }

    fn webhook_body(author_id: i64) -> String {
        format!(
            r#"{{
                "id": "wh-1",
                "version": "v3.0.0",
                "timestamp": 1767268800,
                "payload": {{
                    "type": "message",
                    "value": {{
                        "id": "am-1",
                        "chat_id": "chat-55",
                        "user_id": 987654,
                        "author_id": {author_id},
                        "created": 1767268800,
                        "type": "text",
                        "content": {{"text": "zdravstvuyte"}}
                    }}
                }}
            }}"#
        )
    }

    fn token_mock() -> Mock {
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "at-1", "expires_in": 86400, "token_type": "Bearer"
            })))
    }

    #[tokio::test]
    async fn contact_message_normalizes_and_own_echo_is_ignored() {
        let adapter = AvitoAdapter::new(5, 10.0);

        let inbound = adapter
            .normalize_inbound(&channel(), &RawWebhook::from_body(webhook_body(111)))
            .await
            .unwrap();
        let Inbound::Event(event) = inbound else {
            panic!("expected an event");
        };
        assert_eq!(event.conversation_key, "chat-55");
        assert_eq!(event.contact_id, "111");
        assert_eq!(event.provider_message_id, "am-1");

        // author_id matching the channel's own account id is our echo.
        let echo = adapter
            .normalize_inbound(&channel(), &RawWebhook::from_body(webhook_body(987654)))
            .await
            .unwrap();
        assert_eq!(echo, Inbound::Ignored);
    }

    #[tokio::test]
    async fn non_message_payloads_are_ignored() {
        let adapter = AvitoAdapter::new(5, 10.0);
        let body = r#"{"payload": {"type": "chat_read", "value": null}}"#;
        let inbound = adapter
            .normalize_inbound(&channel(), &RawWebhook::from_body(body))
            .await
            .unwrap();
        assert_eq!(inbound, Inbound::Ignored);
    }

    #[tokio::test]
    async fn send_fetches_token_once_and_reuses_it() {
        let server = MockServer::start().await;
        token_mock().expect(1).mount(&server).await;
        Mock::given(method("POST"))
            .and(path("/messenger/v1/accounts/987654/chats/chat-55/messages"))
            .and(header("authorization", "Bearer at-1"))
            .and(body_string_contains("zdravstvuyte"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "am-9"
            })))
            .expect(2)
            .mount(&server)
            .await;

        let adapter = AvitoAdapter::with_base_url(server.uri(), 5, 10.0);
        for _ in 0..2 {
            let ok = adapter
                .send_message(&channel(), "chat-55", "zdravstvuyte")
                .await
                .unwrap();
            assert_eq!(ok.provider_message_id.as_deref(), Some("am-9"));
        }
    }

    #[tokio::test]
    async fn expired_token_is_refreshed_once_on_401() {
        let server = MockServer::start().await;
        // Token endpoint serves a fresh token each time it is asked.
        token_mock().expect(2).mount(&server).await;
        // First send is rejected as unauthorized, the retry succeeds.
        Mock::given(method("POST"))
            .and(path("/messenger/v1/accounts/987654/chats/chat-55/messages"))
            .respond_with(ResponseTemplate::new(401))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/messenger/v1/accounts/987654/chats/chat-55/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "am-10"
            })))
            .mount(&server)
            .await;

        let adapter = AvitoAdapter::with_base_url(server.uri(), 5, 10.0);
        let ok = adapter
            .send_message(&channel(), "chat-55", "hello")
            .await
            .unwrap();
        assert_eq!(ok.provider_message_id.as_deref(), Some("am-10"));
    }

    #[tokio::test]
    async fn persistent_401_is_auth_expired() {
        let server = MockServer::start().await;
        token_mock().mount(&server).await;
        Mock::given(method("POST"))
            .and(path("/messenger/v1/accounts/987654/chats/chat-55/messages"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let adapter = AvitoAdapter::with_base_url(server.uri(), 5, 10.0);
        let err = adapter
            .send_message(&channel(), "chat-55", "hello")
            .await
            .unwrap_err();
        assert!(matches!(err, SendError::AuthExpired));
    }

    #[tokio::test]
    async fn rate_limit_carries_retry_after() {
        let server = MockServer::start().await;
        token_mock().mount(&server).await;
        Mock::given(method("POST"))
            .and(path("/messenger/v1/accounts/987654/chats/chat-55/messages"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "17"))
            .mount(&server)
            .await;

        let adapter = AvitoAdapter::with_base_url(server.uri(), 5, 10.0);
        let err = adapter
            .send_message(&channel(), "chat-55", "hello")
            .await
            .unwrap_err();
        let SendError::RateLimited { retry_after } = err else {
            panic!("expected rate limit, got {err:?}");
        };
        assert_eq!(retry_after, Some(Duration::from_secs(17)));
    }

    #[tokio::test]
    async fn webhook_subscribe_and_idempotent_unsubscribe() {
        let server = MockServer::start().await;
        token_mock().mount(&server).await;
        Mock::given(method("POST"))
            .and(path("/messenger/v3/webhook"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/messenger/v1/webhook/unsubscribe"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let adapter = AvitoAdapter::with_base_url(server.uri(), 5, 10.0);
        let handle = adapter
            .register_webhook(&channel(), "https://chat.example.com/channels/avito/webhook/ch-av")
            .await
            .unwrap();
        assert!(handle.external_id.is_none());

        // Provider no longer knows the URL; goal state already reached.
        adapter.unregister_webhook(&channel(), &handle).await.unwrap();
    }
}
