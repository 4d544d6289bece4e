// SPDX-FileCopyrightText: 2026 Conflux Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Row types for storage entities.
//!
//! Enum-valued columns (provider, status, sender, delivery state) are stored
//! as their lowercase string form; the enums in `conflux-core` parse them
//! back at the boundaries that care.

use serde::Serialize;

/// One conversation thread, scoped to a channel.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationRecord {
    pub id: String,
    pub channel_id: String,
    /// Provider-native conversation address.
    pub conversation_key: String,
    pub contact_id: String,
    pub display_name: Option<String>,
    /// Text of the most recent message, for list rendering.
    pub preview: Option<String>,
    pub unread: i64,
    pub last_activity_at: String,
    pub archived: bool,
}

/// One message row.
#[derive(Debug, Clone, Serialize)]
pub struct MessageRecord {
    pub id: String,
    pub conversation_id: String,
    /// Per-conversation monotonic sequence; the authoritative order.
    pub seq: i64,
    pub sender: String,
    pub content: String,
    pub provider_message_id: Option<String>,
    /// Provider-reported timestamp, display only.
    pub provider_timestamp: Option<String>,
    pub created_at: String,
}

/// Delivery ledger row for one outbound message.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryRecord {
    pub message_id: String,
    pub state: String,
    pub attempts: i64,
    pub last_error: Option<String>,
    pub provider_message_id: Option<String>,
    pub updated_at: String,
}

/// Stored provider-side webhook registration.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionRecord {
    pub channel_id: String,
    pub external_id: Option<String>,
    pub callback_url: String,
    pub title: Option<String>,
    pub created_at: String,
}

/// Result of the transactional inbound record path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundRecord {
    /// The event was new and is now persisted.
    Persisted {
        conversation_id: String,
        message_id: String,
        seq: i64,
    },
    /// The de-duplication key already existed; nothing changed.
    Duplicate,
}
