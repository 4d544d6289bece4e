// SPDX-FileCopyrightText: 2026 Conflux Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Conflux messaging core.

use thiserror::Error;

/// The primary error type used across core operations and the storage layer.
#[derive(Debug, Error)]
pub enum ConfluxError {
    /// Configuration errors (invalid TOML, missing required fields, type mismatches).
    #[error("configuration error: {0}")]
    Config(String),

    /// Storage backend errors (database connection, query failure, serialization).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Provider adapter errors outside the send taxonomy (setup, wiring).
    #[error("provider error: {message}")]
    Provider {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// No adapter is registered for the requested provider.
    #[error("no adapter registered for provider: {provider}")]
    AdapterNotFound { provider: String },

    /// A referenced entity (channel, conversation, message) does not exist.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// A caller-supplied argument is unusable (bad cursor, empty content).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation timed out.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: std::time::Duration },

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ConfluxError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        ConfluxError::NotFound {
            kind,
            id: id.into(),
        }
    }
}

/// Provider send/subscription error taxonomy.
///
/// Every adapter maps its platform's error codes onto these five classes.
/// The dispatcher retries only the retryable ones; everything else is
/// terminal for the affected operation.
#[derive(Debug, Error)]
pub enum SendError {
    /// Credentials are no longer valid. The owning tenant must reconnect the
    /// channel; retrying cannot help.
    #[error("provider authorization expired")]
    AuthExpired,

    /// The provider throttled the call. `retry_after` is the provider's own
    /// hint when it gave one.
    #[error("provider rate limit hit")]
    RateLimited {
        retry_after: Option<std::time::Duration>,
    },

    /// The target contact cannot receive messages (blocked the account,
    /// deleted the chat, left the platform).
    #[error("recipient unreachable")]
    RecipientUnreachable,

    /// Network-level failure or provider 5xx. Worth retrying with backoff.
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    /// The provider rejected the request and will keep rejecting it
    /// (malformed content, unsupported operation, policy violation).
    #[error("permanently rejected: {0}")]
    PermanentRejection(String),
}

impl SendError {
    /// Whether the dispatcher's bounded backoff loop should retry this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SendError::RateLimited { .. } | SendError::TransientNetwork(_)
        )
    }
}

/// Rejection of an inbound webhook at the boundary.
///
/// Invalid events are answered with a 4xx and produce no side effects;
/// redelivery is the provider's own concern.
#[derive(Debug, Error)]
pub enum InvalidEvent {
    /// Signature or shared-secret check failed.
    #[error("webhook signature verification failed")]
    BadSignature,

    /// The payload does not match the provider's documented shape.
    #[error("malformed webhook payload: {0}")]
    Malformed(String),
}
