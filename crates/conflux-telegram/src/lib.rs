// SPDX-FileCopyrightText: 2026 Conflux Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Telegram Bot API adapter.
//!
//! Outbound calls and webhook management go through teloxide; inbound
//! updates are parsed from the raw webhook body directly, since only a small
//! slice of the update shape matters here.
//!
//! Channel credentials: `token` is the bot token, `secret` is the webhook
//! secret passed to `setWebhook` and checked against
//! `X-Telegram-Bot-Api-Secret-Token` on every inbound update.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use teloxide::payloads::SetWebhookSetters;
use teloxide::prelude::*;
use teloxide::{ApiError, RequestError};
use tracing::{debug, warn};
use url::Url;

use conflux_core::{
    Channel, Inbound, InvalidEvent, NormalizedEvent, ProviderAdapter, ProviderCapabilities,
    ProviderKind, ProviderSendOk, RateLimiter, RawWebhook, SendError, SubscriptionHandle,
};

const SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

#[derive(Debug, Deserialize)]
struct TgUpdate {
    #[allow(dead_code)]
    update_id: i64,
    message: Option<TgMessage>,
}

#[derive(Debug, Deserialize)]
struct TgMessage {
    message_id: i64,
    from: Option<TgUser>,
    chat: TgChat,
    date: i64,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TgUser {
    id: i64,
    #[serde(default)]
    is_bot: bool,
    first_name: String,
    #[serde(default)]
    last_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TgChat {
    id: i64,
}

/// Adapter for [`ProviderKind::Telegram`].
pub struct TelegramAdapter {
    limiter: RateLimiter,
}

impl TelegramAdapter {
    /// `burst` and `per_second` bound outbound calls per channel; Telegram
    /// allows roughly one message per second per chat.
    pub fn new(burst: u32, per_second: f64) -> Self {
        Self {
            limiter: RateLimiter::new(burst, per_second),
        }
    }

    fn bot_for(&self, channel: &Channel) -> Result<Bot, SendError> {
        let token = channel
            .credentials
            .token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or(SendError::AuthExpired)?;
        Ok(Bot::new(token))
    }
}

fn map_request_error(e: RequestError) -> SendError {
    match e {
        RequestError::RetryAfter(secs) => SendError::RateLimited {
            retry_after: Some(std::time::Duration::from_secs(u64::from(secs.seconds()))),
        },
        RequestError::Network(e) => SendError::TransientNetwork(e.to_string()),
        RequestError::Api(api) => match api {
            ApiError::BotBlocked
            | ApiError::ChatNotFound
            | ApiError::UserNotFound
            | ApiError::UserDeactivated
            | ApiError::CantInitiateConversation => SendError::RecipientUnreachable,
            other => {
                let text = other.to_string();
                if text.contains("Unauthorized") {
                    SendError::AuthExpired
                } else {
                    SendError::PermanentRejection(text)
                }
            }
        },
        other => SendError::TransientNetwork(other.to_string()),
    }
}

#[async_trait]
impl ProviderAdapter for TelegramAdapter {
    fn provider(&self) -> ProviderKind {
        ProviderKind::Telegram
    }

    fn capabilities(&self) -> ProviderCapabilities {
        // setWebhook overwrites the previous registration in place.
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
        if let Some(expected) = channel.credentials.secret.as_deref() {
            if raw.header(SECRET_HEADER) != Some(expected) {
                return Err(InvalidEvent::BadSignature);
            }
        }

        let update: TgUpdate = serde_json::from_str(&raw.body)
            .map_err(|e| InvalidEvent::Malformed(e.to_string()))?;

        // Edited messages, channel posts, member updates: all irrelevant.
        let Some(message) = update.message else {
            return Ok(Inbound::Ignored);
        };
        let Some(text) = message.text.filter(|t| !t.is_empty()) else {
            debug!(chat = message.chat.id, "non-text telegram message ignored");
            return Ok(Inbound::Ignored);
        };
        let Some(from) = message.from else {
            return Ok(Inbound::Ignored);
        };
        if from.is_bot {
            return Ok(Inbound::Ignored);
        }

        let display_name = match &from.last_name {
            Some(last) => format!("{} {last}", from.first_name),
            None => from.first_name.clone(),
        };

        Ok(Inbound::Event(NormalizedEvent {
            conversation_key: message.chat.id.to_string(),
            contact_id: from.id.to_string(),
            display_name: Some(display_name),
            content: text,
            provider_message_id: message.message_id.to_string(),
            timestamp: DateTime::<Utc>::from_timestamp(message.date, 0).unwrap_or_else(Utc::now),
        }))
    }

    async fn send_message(
        &self,
        channel: &Channel,
        conversation_key: &str,
        content: &str,
    ) -> Result<ProviderSendOk, SendError> {
        let chat_id: i64 = conversation_key
            .parse()
            .map_err(|_| SendError::PermanentRejection(format!(
                "invalid telegram chat id: {conversation_key}"
            )))?;
        let bot = self.bot_for(channel)?;

        self.limiter.acquire(&channel.id.0).await;
        let sent = bot
            .send_message(ChatId(chat_id), content)
            .await
            .map_err(map_request_error)?;
        Ok(ProviderSendOk {
            provider_message_id: Some(sent.id.0.to_string()),
        })
    }

    async fn register_webhook(
        &self,
        channel: &Channel,
        callback_url: &str,
    ) -> Result<SubscriptionHandle, SendError> {
        let url = Url::parse(callback_url).map_err(|e| {
            SendError::PermanentRejection(format!("invalid callback url: {e}"))
        })?;
        let bot = self.bot_for(channel)?;

        let request = bot.set_webhook(url);
        let request = match channel.credentials.secret.as_deref() {
            Some(secret) => request.secret_token(secret),
            None => request,
        };
        request.await.map_err(map_request_error)?;

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
        let bot = self.bot_for(channel)?;
        match bot.delete_webhook().await {
            Ok(_) => Ok(()),
            // No webhook set means the goal state is already reached.
            Err(RequestError::Api(e)) => {
                warn!(url = %handle.callback_url, error = %e, "deleteWebhook reported an API error");
                Ok(())
            }
            Err(e) => Err(map_request_error(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conflux_core::{ChannelCredentials, ChannelId, ChannelStatus};

    fn channel(secret: Option<&str>) -> Channel {
        Channel {
            id: ChannelId("ch-tg".into()),
            provider: ProviderKind::Telegram,
            status: ChannelStatus::Active,
            credentials: ChannelCredentials {
                token: Some("12345:token".into()),
                account_id: None,
                secret: secret.map(String::from),
            },
            created_at: "2026-01-01T00:00:00.000Z".into(),
        }
    }

    fn update_body() -> &'static str {
        r#"{
            "update_id": 10,
            "message": {
                "message_id": 42,
                "from": {"id": 777, "is_bot": false, "first_name": "Ada", "last_name": "L"},
                "chat": {"id": -100123, "type": "supergroup"},
                "date": 1767268800,
                "text": "hello bot"
            }
        }"#
    }

    fn signed(secret: &str, body: &str) -> RawWebhook {
        let mut raw = RawWebhook::from_body(body);
        raw.headers.insert(SECRET_HEADER.into(), secret.into());
        raw
    }

    #[tokio::test]
    async fn text_update_normalizes() {
        let adapter = TelegramAdapter::new(5, 1.0);
        let inbound = adapter
            .normalize_inbound(&channel(Some("s3cret")), &signed("s3cret", update_body()))
            .await
            .unwrap();
        let Inbound::Event(event) = inbound else {
            panic!("expected an event");
        };
        assert_eq!(event.conversation_key, "-100123");
        assert_eq!(event.contact_id, "777");
        assert_eq!(event.provider_message_id, "42");
        assert_eq!(event.display_name.as_deref(), Some("Ada L"));
        assert_eq!(event.content, "hello bot");
    }

    #[tokio::test]
    async fn secret_token_mismatch_is_rejected() {
        let adapter = TelegramAdapter::new(5, 1.0);
        let err = adapter
            .normalize_inbound(&channel(Some("s3cret")), &signed("other", update_body()))
            .await
            .unwrap_err();
        assert!(matches!(err, InvalidEvent::BadSignature));

        // Missing header entirely.
        let err = adapter
            .normalize_inbound(
                &channel(Some("s3cret")),
                &RawWebhook::from_body(update_body()),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, InvalidEvent::BadSignature));
    }

    #[tokio::test]
    async fn non_message_updates_are_ignored() {
        let adapter = TelegramAdapter::new(5, 1.0);
        for body in [
            r#"{"update_id": 11}"#,
            r#"{"update_id": 12, "message": {"message_id": 1, "chat": {"id": 5}, "date": 0}}"#,
            r#"{"update_id": 13, "message": {"message_id": 1,
                "from": {"id": 9, "is_bot": true, "first_name": "OtherBot"},
                "chat": {"id": 5}, "date": 0, "text": "beep"}}"#,
        ] {
            let inbound = adapter
                .normalize_inbound(&channel(None), &RawWebhook::from_body(body))
                .await
                .unwrap();
            assert_eq!(inbound, Inbound::Ignored, "body: {body}");
        }
    }

    #[tokio::test]
    async fn garbage_body_is_malformed() {
        let adapter = TelegramAdapter::new(5, 1.0);
        let err = adapter
            .normalize_inbound(&channel(None), &RawWebhook::from_body("not json"))
            .await
            .unwrap_err();
        assert!(matches!(err, InvalidEvent::Malformed(_)));
    }

    #[tokio::test]
    async fn missing_token_is_auth_failure() {
        let adapter = TelegramAdapter::new(5, 1.0);
        let mut ch = channel(None);
        ch.credentials.token = None;
        let err = adapter.send_message(&ch, "123", "hi").await.unwrap_err();
        assert!(matches!(err, SendError::AuthExpired));
    }

    #[test]
    fn network_errors_map_to_transient() {
        let e = map_request_error(RequestError::Api(ApiError::BotBlocked));
        assert!(matches!(e, SendError::RecipientUnreachable));

        let e = map_request_error(RequestError::Api(ApiError::MessageIsTooLong));
        assert!(matches!(e, SendError::PermanentRejection(_)));
    }
}
