// SPDX-FileCopyrightText: 2026 Conflux Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Domain types shared across the Conflux workspace.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Unique identifier for a configured channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub String);

/// Unique identifier for a conversation thread.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

/// Unique identifier for a message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

/// The external messaging platform a channel connects to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// First-party web chat widget.
    Web,
    Telegram,
    Vk,
    Avito,
    Whatsapp,
}

/// Channel lifecycle status.
///
/// Channels are soft-deactivated, never deleted, while conversations still
/// reference them.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ChannelStatus {
    Active,
    Inactive,
}

/// Provider credentials for one channel.
///
/// The fields are interpreted per provider: `token` is the bot/API token,
/// `account_id` is the VK group id, Avito user id, or WhatsApp phone-number
/// id, and `secret` is the webhook verification secret where the provider
/// supports one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelCredentials {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default)]
    pub secret: Option<String>,
}

/// A tenant's configured connection to one external messaging provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub id: ChannelId,
    pub provider: ProviderKind,
    pub status: ChannelStatus,
    pub credentials: ChannelCredentials,
    /// ISO 8601 creation timestamp.
    pub created_at: String,
}

impl Channel {
    pub fn is_active(&self) -> bool {
        self.status == ChannelStatus::Active
    }
}

/// Who authored a message.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SenderRole {
    /// The external contact on the other end of the conversation.
    Contact,
    /// The AI assistant.
    Assistant,
    /// A human operator replying from the dashboard.
    Operator,
    /// Service notices.
    System,
}

/// Delivery lifecycle of one outbound message.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DeliveryState {
    Queued,
    Retrying,
    Sent,
    Delivered,
    Failed,
}

impl DeliveryState {
    /// Whether this state admits no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeliveryState::Delivered | DeliveryState::Failed)
    }

    /// Legal transitions of the delivery ledger.
    ///
    /// queued -> retrying | sent | delivered | failed
    /// retrying -> retrying | sent | delivered | failed
    /// sent -> delivered | failed
    /// delivered, failed -> (terminal)
    pub fn can_transition_to(&self, next: DeliveryState) -> bool {
        use DeliveryState::*;
        match (self, next) {
            (Queued, Retrying | Sent | Delivered | Failed) => true,
            (Retrying, Retrying | Sent | Delivered | Failed) => true,
            (Sent, Delivered | Failed) => true,
            _ => false,
        }
    }
}

/// The provider-agnostic shape every adapter normalizes inbound events into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedEvent {
    /// Provider-native conversation address (chat id, peer id, phone number,
    /// visitor id). Unique per channel.
    pub conversation_key: String,
    /// Provider-native identifier of the external contact.
    pub contact_id: String,
    /// Display name of the contact, when the provider reports one.
    pub display_name: Option<String>,
    /// Message text.
    pub content: String,
    /// Provider-native message id, the de-duplication key together with the
    /// conversation.
    pub provider_message_id: String,
    /// Provider-reported timestamp. Retained for display only; ordering is
    /// decided by the per-conversation sequence assigned at normalization.
    pub timestamp: DateTime<Utc>,
}

/// A provider-side webhook registration owned by exactly one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionHandle {
    /// Provider-assigned subscription id, when the provider issues one.
    pub external_id: Option<String>,
    /// The callback URL the provider was registered with.
    pub callback_url: String,
    /// Human-readable label shown in the provider's settings UI.
    pub title: Option<String>,
}

/// Successful provider send call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderSendOk {
    /// Provider-native id of the message just sent, when reported.
    pub provider_message_id: Option<String>,
}
