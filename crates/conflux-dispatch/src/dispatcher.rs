// SPDX-FileCopyrightText: 2026 Conflux Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The outbound send path.
//!
//! A send is persisted before the first provider call, so the message is
//! visible in history (and survives a crash) no matter what the provider
//! does. The retry loop then walks the delivery ledger through
//! queued -> retrying* -> delivered | failed, never exceeding the attempt
//! budget. Retries stay inside this one call; there is no background
//! requeueing.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use uuid::Uuid;

use conflux_core::{
    AdapterRegistry, Channel, ConfluxError, DeliveryState, SendError, SenderRole,
};
use conflux_storage::queries::{channels, conversations, deliveries, messages};
use conflux_storage::Database;

use crate::backoff::BackoffPolicy;

/// Outcome of one dispatched send, terminal either way.
#[derive(Debug, Clone)]
pub struct SendReport {
    pub message_id: String,
    pub conversation_id: String,
    pub seq: i64,
    /// `Delivered` or `Failed`.
    pub state: DeliveryState,
    /// Provider calls actually made.
    pub attempts: u32,
    /// Last provider error, present when `state` is `Failed`.
    pub error: Option<String>,
}

/// Sends operator/assistant messages out through provider adapters.
pub struct OutboundDispatcher {
    db: Arc<Database>,
    registry: Arc<AdapterRegistry>,
    policy: BackoffPolicy,
    send_timeout: Duration,
}

impl OutboundDispatcher {
    pub fn new(
        db: Arc<Database>,
        registry: Arc<AdapterRegistry>,
        policy: BackoffPolicy,
        send_timeout: Duration,
    ) -> Self {
        Self {
            db,
            registry,
            policy,
            send_timeout,
        }
    }

    /// Send `content` into an existing conversation.
    ///
    /// Persists the message first, then attempts delivery with bounded
    /// backoff. Returns a terminal [`SendReport`]; an `Err` means the send
    /// never got as far as the provider (unknown conversation, inactive
    /// channel, storage failure).
    pub async fn send(
        &self,
        conversation_id: &str,
        sender: SenderRole,
        content: &str,
    ) -> Result<SendReport, ConfluxError> {
        if content.trim().is_empty() {
            return Err(ConfluxError::InvalidArgument(
                "message content is empty".into(),
            ));
        }

        let conversation = conversations::get_conversation(&self.db, conversation_id)
            .await?
            .ok_or_else(|| ConfluxError::not_found("conversation", conversation_id))?;
        let channel = channels::get_channel(&self.db, &conversation.channel_id)
            .await?
            .ok_or_else(|| ConfluxError::not_found("channel", &conversation.channel_id))?;
        if !channel.is_active() {
            return Err(ConfluxError::InvalidArgument(format!(
                "channel {} is inactive",
                channel.id.0
            )));
        }
        let adapter = self.registry.get(channel.provider)?;

        let message_id = Uuid::new_v4().to_string();
        let seq = messages::insert_outbound(
            &self.db,
            conversation_id,
            &message_id,
            &sender.to_string(),
            content,
        )
        .await?
        .ok_or_else(|| ConfluxError::not_found("conversation", conversation_id))?;

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let result = tokio::time::timeout(
                self.send_timeout,
                adapter.send_message(&channel, &conversation.conversation_key, content),
            )
            .await
            .unwrap_or_else(|_| {
                Err(SendError::TransientNetwork(format!(
                    "send timed out after {:?}",
                    self.send_timeout
                )))
            });

            match result {
                Ok(ok) => {
                    deliveries::record_attempt(
                        &self.db,
                        &message_id,
                        DeliveryState::Delivered,
                        None,
                        ok.provider_message_id.clone(),
                    )
                    .await?;
                    info!(
                        conversation = conversation_id,
                        message = %message_id,
                        provider = %channel.provider,
                        attempts = attempt,
                        "message delivered"
                    );
                    return Ok(SendReport {
                        message_id,
                        conversation_id: conversation_id.to_string(),
                        seq,
                        state: DeliveryState::Delivered,
                        attempts: attempt,
                        error: None,
                    });
                }
                Err(e) if e.is_retryable() && attempt < self.policy.max_attempts => {
                    let retry_after = match &e {
                        SendError::RateLimited { retry_after } => *retry_after,
                        _ => None,
                    };
                    deliveries::record_attempt(
                        &self.db,
                        &message_id,
                        DeliveryState::Retrying,
                        Some(e.to_string()),
                        None,
                    )
                    .await?;
                    let delay = self.policy.delay_with_hint(attempt, retry_after);
                    warn!(
                        conversation = conversation_id,
                        message = %message_id,
                        provider = %channel.provider,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "send attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    // Non-retryable, or the attempt budget is spent.
                    deliveries::record_attempt(
                        &self.db,
                        &message_id,
                        DeliveryState::Failed,
                        Some(e.to_string()),
                        None,
                    )
                    .await?;
                    warn!(
                        conversation = conversation_id,
                        message = %message_id,
                        provider = %channel.provider,
                        attempts = attempt,
                        error = %e,
                        "message delivery failed"
                    );
                    return Ok(SendReport {
                        message_id,
                        conversation_id: conversation_id.to_string(),
                        seq,
                        state: DeliveryState::Failed,
                        attempts: attempt,
                        error: Some(e.to_string()),
                    });
                }
            }
        }
    }

    /// The channel a conversation sends through. Exposed for callers that
    /// want to pre-validate before accepting a send.
    pub async fn channel_for(&self, conversation_id: &str) -> Result<Channel, ConfluxError> {
        let conversation = conversations::get_conversation(&self.db, conversation_id)
            .await?
            .ok_or_else(|| ConfluxError::not_found("conversation", conversation_id))?;
        channels::get_channel(&self.db, &conversation.channel_id)
            .await?
            .ok_or_else(|| ConfluxError::not_found("channel", &conversation.channel_id))
    }
}
