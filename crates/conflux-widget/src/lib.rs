// SPDX-FileCopyrightText: 2026 Conflux Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! First-party web chat widget adapter.
//!
//! The widget is the one provider with no external platform behind it:
//! visitors post into our own webhook endpoint, and replies are picked up by
//! the widget polling conversation history. Sending is therefore a local
//! no-op that reports success, and there is nothing to register remotely.
//!
//! Inbound requests carry the channel's shared token in `X-Widget-Token`;
//! a channel with no secret configured accepts unauthenticated posts (public
//! site embed).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use conflux_core::{
    Channel, Inbound, InvalidEvent, NormalizedEvent, ProviderAdapter, ProviderCapabilities,
    ProviderKind, ProviderSendOk, RawWebhook, SendError, SubscriptionHandle,
};

const TOKEN_HEADER: &str = "x-widget-token";

#[derive(Debug, Deserialize)]
struct WidgetPost {
    /// Anonymous visitor id minted by the embed script; the conversation key.
    visitor_id: String,
    /// Client-generated id, the de-duplication key for retried posts.
    message_id: String,
    text: String,
    #[serde(default)]
    name: Option<String>,
    /// Unix seconds; defaults to arrival time.
    #[serde(default)]
    timestamp: Option<i64>,
}

/// Adapter for [`ProviderKind::Web`].
#[derive(Debug, Default)]
pub struct WidgetAdapter;

impl WidgetAdapter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProviderAdapter for WidgetAdapter {
    fn provider(&self) -> ProviderKind {
        ProviderKind::Web
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            supports_url_update: true,
            needs_remote_subscription: false,
        }
    }

    async fn normalize_inbound(
        &self,
        channel: &Channel,
        raw: &RawWebhook,
    ) -> Result<Inbound, InvalidEvent> {
        if let Some(expected) = channel.credentials.secret.as_deref() {
            if raw.header(TOKEN_HEADER) != Some(expected) {
                return Err(InvalidEvent::BadSignature);
            }
        }

        let post: WidgetPost = serde_json::from_str(&raw.body)
            .map_err(|e| InvalidEvent::Malformed(e.to_string()))?;
        if post.text.trim().is_empty() {
            return Err(InvalidEvent::Malformed("empty message text".into()));
        }

        let timestamp = post
            .timestamp
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
            .unwrap_or_else(Utc::now);

        Ok(Inbound::Event(NormalizedEvent {
            conversation_key: post.visitor_id.clone(),
            contact_id: post.visitor_id,
            display_name: post.name,
            content: post.text,
            provider_message_id: post.message_id,
            timestamp,
        }))
    }

    async fn send_message(
        &self,
        channel: &Channel,
        conversation_key: &str,
        _content: &str,
    ) -> Result<ProviderSendOk, SendError> {
        // Replies are delivered by the widget polling history; the message
        // is already persisted by the time we get here.
        debug!(
            channel = %channel.id.0,
            visitor = conversation_key,
            "widget reply stored for pickup"
        );
        Ok(ProviderSendOk {
            provider_message_id: None,
        })
    }

    async fn register_webhook(
        &self,
        _channel: &Channel,
        callback_url: &str,
    ) -> Result<SubscriptionHandle, SendError> {
        Ok(SubscriptionHandle {
            external_id: None,
            callback_url: callback_url.to_string(),
            title: None,
        })
    }

    async fn unregister_webhook(
        &self,
        _channel: &Channel,
        _handle: &SubscriptionHandle,
    ) -> Result<(), SendError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conflux_core::{ChannelCredentials, ChannelId, ChannelStatus};

    fn channel(secret: Option<&str>) -> Channel {
        Channel {
            id: ChannelId("ch-web".into()),
            provider: ProviderKind::Web,
            status: ChannelStatus::Active,
            credentials: ChannelCredentials {
                token: None,
                account_id: None,
                secret: secret.map(String::from),
            },
            created_at: "2026-01-01T00:00:00.000Z".into(),
        }
    }

    fn post(token: Option<&str>, body: &str) -> RawWebhook {
        let mut raw = RawWebhook::from_body(body);
        if let Some(token) = token {
            raw.headers.insert(TOKEN_HEADER.into(), token.into());
        }
        raw
    }

    #[tokio::test]
    async fn valid_post_normalizes() {
        let adapter = WidgetAdapter::new();
        let raw = post(
            Some("tok"),
            r#"{"visitor_id":"v-1","message_id":"c-1","text":"hi","name":"Visitor","timestamp":1767268800}"#,
        );
        let inbound = adapter
            .normalize_inbound(&channel(Some("tok")), &raw)
            .await
            .unwrap();
        let Inbound::Event(event) = inbound else {
            panic!("expected an event");
        };
        assert_eq!(event.conversation_key, "v-1");
        assert_eq!(event.provider_message_id, "c-1");
        assert_eq!(event.display_name.as_deref(), Some("Visitor"));
        assert_eq!(event.timestamp.timestamp(), 1767268800);
    }

    #[tokio::test]
    async fn wrong_or_missing_token_is_rejected() {
        let adapter = WidgetAdapter::new();
        let body = r#"{"visitor_id":"v-1","message_id":"c-1","text":"hi"}"#;

        for raw in [post(Some("wrong"), body), post(None, body)] {
            let err = adapter
                .normalize_inbound(&channel(Some("tok")), &raw)
                .await
                .unwrap_err();
            assert!(matches!(err, InvalidEvent::BadSignature));
        }
    }

    #[tokio::test]
    async fn secretless_channel_accepts_unauthenticated_posts() {
        let adapter = WidgetAdapter::new();
        let raw = post(None, r#"{"visitor_id":"v-1","message_id":"c-1","text":"hi"}"#);
        assert!(adapter.normalize_inbound(&channel(None), &raw).await.is_ok());
    }

    #[tokio::test]
    async fn malformed_body_is_rejected() {
        let adapter = WidgetAdapter::new();
        for body in ["not json", r#"{"visitor_id":"v-1"}"#, r#"{"visitor_id":"v","message_id":"m","text":"  "}"#] {
            let err = adapter
                .normalize_inbound(&channel(None), &RawWebhook::from_body(body))
                .await
                .unwrap_err();
            assert!(matches!(err, InvalidEvent::Malformed(_)), "body: {body}");
        }
    }

    #[tokio::test]
    async fn send_succeeds_locally() {
        let adapter = WidgetAdapter::new();
        let ok = adapter
            .send_message(&channel(None), "v-1", "welcome")
            .await
            .unwrap();
        assert!(ok.provider_message_id.is_none());
    }
}
