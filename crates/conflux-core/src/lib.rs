// SPDX-FileCopyrightText: 2026 Conflux Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the Conflux multi-channel messaging core.
//!
//! This crate provides the domain types, the `ProviderAdapter` trait that
//! every messaging platform integration implements, the shared error
//! taxonomy, the adapter registry, and the per-channel rate limiter.
//! Everything else in the workspace builds on these definitions.

pub mod adapter;
pub mod error;
pub mod ratelimit;
pub mod registry;
pub mod types;

// Re-export key items at crate root for ergonomic imports.
pub use adapter::{Inbound, ProviderAdapter, ProviderCapabilities, RawWebhook};
pub use error::{ConfluxError, InvalidEvent, SendError};
pub use ratelimit::RateLimiter;
pub use registry::AdapterRegistry;
pub use types::{
    Channel, ChannelCredentials, ChannelId, ChannelStatus, ConversationId, DeliveryState,
    MessageId, NormalizedEvent, ProviderKind, ProviderSendOk, SenderRole, SubscriptionHandle,
};
