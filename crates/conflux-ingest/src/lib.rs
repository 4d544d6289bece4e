// SPDX-FileCopyrightText: 2026 Conflux Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Inbound webhook pipeline.
//!
//! One path for every provider: resolve the channel, let its adapter verify
//! and normalize the raw request, persist the normalized event. Provider
//! redelivery is absorbed here -- the storage de-duplication key makes the
//! second arrival a no-op, and both arrivals get the same acknowledgement,
//! so providers that retry on non-2xx eventually go quiet.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use conflux_core::{
    AdapterRegistry, ConfluxError, Inbound, InvalidEvent, ProviderKind, RawWebhook,
};
use conflux_storage::queries::{channels, messages};
use conflux_storage::{Database, InboundRecord};

/// What the pipeline did with an inbound webhook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundOutcome {
    /// New event, now persisted.
    Persisted {
        conversation_id: String,
        message_id: String,
        seq: i64,
    },
    /// Redelivery of an already-persisted event. Acknowledged, no changes.
    Duplicate,
    /// Valid but irrelevant event (receipt, service notice). Acknowledged.
    Ignored,
    /// Endpoint probe; the body must be echoed back verbatim.
    Challenge(String),
}

/// Why an inbound webhook was rejected.
///
/// The gateway maps these onto status codes; everything that is not listed
/// here is acknowledged with a 2xx.
#[derive(Debug, Error)]
pub enum IngestError {
    /// No channel with this id and provider. Deliberately indistinguishable
    /// from a deactivated channel at the HTTP surface.
    #[error("unknown channel: {0}")]
    UnknownChannel(String),

    /// The channel exists but is deactivated; events are not accepted.
    #[error("channel is inactive: {0}")]
    InactiveChannel(String),

    /// Signature failure or malformed payload.
    #[error(transparent)]
    Invalid(#[from] InvalidEvent),

    /// Storage or wiring failure; the provider should redeliver later.
    #[error(transparent)]
    Internal(#[from] ConfluxError),
}

/// The inbound half of the messaging core.
pub struct IngestPipeline {
    db: Arc<Database>,
    registry: Arc<AdapterRegistry>,
}

impl IngestPipeline {
    pub fn new(db: Arc<Database>, registry: Arc<AdapterRegistry>) -> Self {
        Self { db, registry }
    }

    /// Process one raw webhook addressed to `channel_id` on `provider`'s
    /// webhook path.
    pub async fn handle_webhook(
        &self,
        provider: ProviderKind,
        channel_id: &str,
        raw: &RawWebhook,
    ) -> Result<InboundOutcome, IngestError> {
        let channel = channels::get_channel(&self.db, channel_id)
            .await?
            .ok_or_else(|| IngestError::UnknownChannel(channel_id.to_string()))?;
        // A webhook posted to the wrong provider path is treated as an
        // unknown channel, not as a hint that the id exists elsewhere.
        if channel.provider != provider {
            return Err(IngestError::UnknownChannel(channel_id.to_string()));
        }
        if !channel.is_active() {
            debug!(channel = channel_id, "webhook for inactive channel dropped");
            return Err(IngestError::InactiveChannel(channel_id.to_string()));
        }

        let adapter = self.registry.get(channel.provider)?;
        let inbound = adapter
            .normalize_inbound(&channel, raw)
            .await
            .inspect_err(|e| {
                warn!(channel = channel_id, provider = %provider, error = %e, "webhook rejected");
            })?;

        match inbound {
            Inbound::Challenge(body) => {
                info!(channel = channel_id, provider = %provider, "answering endpoint probe");
                Ok(InboundOutcome::Challenge(body))
            }
            Inbound::Ignored => Ok(InboundOutcome::Ignored),
            Inbound::Event(event) => {
                let conversation_id = Uuid::new_v4().to_string();
                let message_id = Uuid::new_v4().to_string();
                let record = messages::record_inbound(
                    &self.db,
                    channel_id,
                    &event,
                    &conversation_id,
                    &message_id,
                )
                .await?;
                match record {
                    InboundRecord::Persisted {
                        conversation_id,
                        message_id,
                        seq,
                    } => {
                        info!(
                            channel = channel_id,
                            provider = %provider,
                            conversation = %conversation_id,
                            seq,
                            "inbound message persisted"
                        );
                        Ok(InboundOutcome::Persisted {
                            conversation_id,
                            message_id,
                            seq,
                        })
                    }
                    InboundRecord::Duplicate => {
                        debug!(
                            channel = channel_id,
                            provider = %provider,
                            provider_message_id = %event.provider_message_id,
                            "duplicate delivery absorbed"
                        );
                        Ok(InboundOutcome::Duplicate)
                    }
                }
            }
        }
    }

    /// Answer a GET verification handshake on the webhook path (WhatsApp's
    /// `hub.challenge` flow). Returns the body to echo, or an error when the
    /// channel is unknown or the adapter rejects the handshake.
    pub async fn handle_verification(
        &self,
        provider: ProviderKind,
        channel_id: &str,
        query: &std::collections::HashMap<String, String>,
    ) -> Result<String, IngestError> {
        let channel = channels::get_channel(&self.db, channel_id)
            .await?
            .ok_or_else(|| IngestError::UnknownChannel(channel_id.to_string()))?;
        if channel.provider != provider || !channel.is_active() {
            return Err(IngestError::UnknownChannel(channel_id.to_string()));
        }
        let adapter = self.registry.get(channel.provider)?;
        adapter
            .verify_challenge(&channel, query)
            .ok_or(IngestError::Invalid(InvalidEvent::BadSignature))
    }
}
