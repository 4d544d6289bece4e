// SPDX-FileCopyrightText: 2026 Conflux Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP gateway: provider webhook ingress plus the authenticated operator
//! API over channels, conversations, and sends.
//!
//! Webhook routes are unauthenticated at the HTTP layer -- each provider
//! adapter verifies its own signature or shared secret. Everything under
//! `/v1` requires the configured bearer token and fails closed when none is
//! configured.

pub mod auth;
pub mod error;
pub mod handlers;
pub mod server;

use std::sync::Arc;

use conflux_core::AdapterRegistry;
use conflux_directory::ConversationDirectory;
use conflux_dispatch::OutboundDispatcher;
use conflux_ingest::IngestPipeline;
use conflux_storage::Database;
use conflux_subscriptions::SubscriptionManager;

use crate::auth::AuthConfig;

/// Shared state behind every gateway route.
#[derive(Clone)]
pub struct GatewayState {
    pub db: Arc<Database>,
    pub registry: Arc<AdapterRegistry>,
    pub ingest: Arc<IngestPipeline>,
    pub directory: Arc<ConversationDirectory>,
    pub dispatcher: Arc<OutboundDispatcher>,
    pub subscriptions: Arc<SubscriptionManager>,
    pub auth: AuthConfig,
}
