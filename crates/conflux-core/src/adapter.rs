// SPDX-FileCopyrightText: 2026 Conflux Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The provider adapter trait every messaging platform integration implements.
//!
//! Adapters translate between one provider's wire format and the unified
//! model. The rest of the core never branches on provider identity; it
//! resolves an adapter from the registry once, at the boundary, and speaks
//! this trait from then on.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::{InvalidEvent, SendError};
use crate::types::{
    Channel, NormalizedEvent, ProviderKind, ProviderSendOk, SubscriptionHandle,
};

/// A raw inbound webhook request as the HTTP layer received it.
///
/// Header names are lowercased by the gateway before the adapter sees them.
#[derive(Debug, Clone, Default)]
pub struct RawWebhook {
    pub body: String,
    pub headers: HashMap<String, String>,
    pub query: HashMap<String, String>,
}

impl RawWebhook {
    pub fn from_body(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            ..Default::default()
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(|v| v.as_str())
    }
}

/// What an adapter made of a verified inbound webhook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A user message, normalized into the unified shape.
    Event(NormalizedEvent),
    /// The provider is probing the endpoint and expects this exact string as
    /// the response body (VK confirmation).
    Challenge(String),
    /// A valid but irrelevant event (delivery receipt, service notice).
    /// Acknowledged with no side effects.
    Ignored,
}

/// Static capabilities of a provider integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderCapabilities {
    /// Whether the provider can update a registration's callback URL in
    /// place. When false, refresh must delete and recreate the subscription.
    pub supports_url_update: bool,
    /// Whether a server-side registration call is needed at all. The web
    /// widget posts to us directly and has nothing to register.
    pub needs_remote_subscription: bool,
}

/// Bidirectional translation between one provider's wire format and the
/// unified conversation/message model.
///
/// Adapters own provider-specific authentication (webhook signatures, API
/// tokens) and rate limiting; callers never see provider error codes, only
/// the shared [`SendError`] taxonomy.
#[async_trait]
pub trait ProviderAdapter: Send + Sync + 'static {
    /// The platform this adapter speaks for.
    fn provider(&self) -> ProviderKind;

    /// Static capabilities of this integration.
    fn capabilities(&self) -> ProviderCapabilities;

    /// Verifies and parses a raw webhook body into the unified event shape.
    ///
    /// Verification failures and malformed payloads are rejected with
    /// [`InvalidEvent`]; the gateway answers 4xx and nothing is persisted.
    /// De-duplication is not the adapter's concern -- it happens at the
    /// storage uniqueness key. Async because some providers need a metadata
    /// lookup to answer an endpoint probe (VK's confirmation code).
    async fn normalize_inbound(
        &self,
        channel: &Channel,
        raw: &RawWebhook,
    ) -> Result<Inbound, InvalidEvent>;

    /// Answers a GET verification handshake on the webhook path, if this
    /// provider performs one (WhatsApp's `hub.challenge`). Returns the body
    /// to echo back, or `None` to reject the handshake.
    fn verify_challenge(
        &self,
        _channel: &Channel,
        _query: &HashMap<String, String>,
    ) -> Option<String> {
        None
    }

    /// Sends a message to the conversation identified by the provider-native
    /// `conversation_key`. Applies this provider's per-channel rate limit
    /// before calling out.
    async fn send_message(
        &self,
        channel: &Channel,
        conversation_key: &str,
        content: &str,
    ) -> Result<ProviderSendOk, SendError>;

    /// Registers a webhook/callback subscription pointing at `callback_url`.
    async fn register_webhook(
        &self,
        channel: &Channel,
        callback_url: &str,
    ) -> Result<SubscriptionHandle, SendError>;

    /// Removes a provider-side registration. A subscription the provider no
    /// longer knows about counts as success: the goal state is "not
    /// registered", and it has been reached.
    async fn unregister_webhook(
        &self,
        channel: &Channel,
        handle: &SubscriptionHandle,
    ) -> Result<(), SendError>;
}
