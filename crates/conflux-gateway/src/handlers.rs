// SPDX-FileCopyrightText: 2026 Conflux Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Request handlers for webhook ingress and the operator API.

use std::collections::HashMap;
use std::str::FromStr;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use conflux_core::{
    Channel, ChannelCredentials, ChannelId, ChannelStatus, ConfluxError, ProviderKind, RawWebhook,
    SenderRole,
};
use conflux_ingest::InboundOutcome;
use conflux_storage::queries::{channels, deliveries};

use crate::error::ApiError;
use crate::GatewayState;

fn raw_webhook(headers: &HeaderMap, query: HashMap<String, String>, body: String) -> RawWebhook {
    let headers = headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
        })
        .collect();
    RawWebhook {
        body,
        headers,
        query,
    }
}

fn parse_provider(provider: &str) -> Result<ProviderKind, ApiError> {
    ProviderKind::from_str(provider)
        .map_err(|_| ApiError(StatusCode::NOT_FOUND, "channel not found".into()))
}

/// POST /channels/{provider}/webhook/{channel_id}
pub async fn post_webhook(
    State(state): State<GatewayState>,
    Path((provider, channel_id)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: String,
) -> Result<Response, ApiError> {
    let provider = parse_provider(&provider)?;
    let raw = raw_webhook(&headers, query, body);
    let outcome = state.ingest.handle_webhook(provider, &channel_id, &raw).await?;
    Ok(match outcome {
        // The provider only needs to know the event was accepted; duplicates
        // acknowledge identically so redelivery stops.
        InboundOutcome::Persisted { .. }
        | InboundOutcome::Duplicate
        | InboundOutcome::Ignored => (StatusCode::OK, "ok").into_response(),
        InboundOutcome::Challenge(text) => (StatusCode::OK, text).into_response(),
    })
}

/// GET /channels/{provider}/webhook/{channel_id} -- verification handshake.
pub async fn get_webhook(
    State(state): State<GatewayState>,
    Path((provider, channel_id)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    let provider = parse_provider(&provider)?;
    let echo = state
        .ingest
        .handle_verification(provider, &channel_id, &query)
        .await?;
    Ok((StatusCode::OK, echo).into_response())
}

/// GET /health
pub async fn get_health() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

#[derive(Debug, Serialize)]
pub struct ChannelView {
    pub id: String,
    pub provider: ProviderKind,
    pub status: ChannelStatus,
    pub created_at: String,
}

impl From<Channel> for ChannelView {
    fn from(c: Channel) -> Self {
        Self {
            id: c.id.0,
            provider: c.provider,
            status: c.status,
            created_at: c.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateChannelBody {
    pub provider: ProviderKind,
    #[serde(default)]
    pub credentials: ChannelCredentials,
}

/// POST /v1/channels -- connect a channel and register its webhook.
pub async fn post_channels(
    State(state): State<GatewayState>,
    Json(body): Json<CreateChannelBody>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    // Fails fast when no adapter is compiled in for the provider.
    state.registry.get(body.provider)?;

    let channel = Channel {
        id: ChannelId(Uuid::new_v4().to_string()),
        provider: body.provider,
        status: ChannelStatus::Active,
        credentials: body.credentials,
        created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    };
    channels::create_channel(&state.db, &channel).await?;

    // The channel stays connected even when registration fails; the
    // operator retries via POST /v1/channels/{id}/subscription.
    let subscription = match state.subscriptions.ensure(&channel.id.0).await {
        Ok(outcome) => json!({"state": "active", "outcome": format!("{outcome:?}")}),
        Err(e) => {
            tracing::warn!(channel = %channel.id.0, error = %e, "initial webhook registration failed");
            json!({"state": "pending", "error": e.to_string()})
        }
    };

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "channel": ChannelView::from(channel),
            "subscription": subscription,
        })),
    ))
}

#[derive(Debug, Deserialize)]
pub struct ListChannelsQuery {
    pub status: Option<ChannelStatus>,
}

/// GET /v1/channels
pub async fn get_channels(
    State(state): State<GatewayState>,
    Query(query): Query<ListChannelsQuery>,
) -> Result<Json<Vec<ChannelView>>, ApiError> {
    let listed = channels::list_channels(&state.db, query.status).await?;
    Ok(Json(listed.into_iter().map(ChannelView::from).collect()))
}

/// GET /v1/channels/{id}
pub async fn get_channel(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> Result<Json<ChannelView>, ApiError> {
    let channel = channels::get_channel(&state.db, &id)
        .await?
        .ok_or_else(|| ConfluxError::not_found("channel", &id))?;
    Ok(Json(channel.into()))
}

/// POST /v1/channels/{id}/activate
pub async fn post_channel_activate(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    channels::get_channel(&state.db, &id)
        .await?
        .ok_or_else(|| ConfluxError::not_found("channel", &id))?;
    channels::set_channel_status(&state.db, &id, ChannelStatus::Active).await?;
    let outcome = state.subscriptions.ensure(&id).await?;
    Ok(Json(json!({"status": "active", "subscription": format!("{outcome:?}")})))
}

/// POST /v1/channels/{id}/deactivate -- stop accepting and sending events.
pub async fn post_channel_deactivate(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    channels::get_channel(&state.db, &id)
        .await?
        .ok_or_else(|| ConfluxError::not_found("channel", &id))?;
    state.subscriptions.teardown(&id).await?;
    channels::set_channel_status(&state.db, &id, ChannelStatus::Inactive).await?;
    Ok(Json(json!({"status": "inactive"})))
}

/// POST /v1/channels/{id}/subscription -- reconcile the webhook registration.
pub async fn post_channel_subscription(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let outcome = state.subscriptions.ensure(&id).await?;
    Ok(Json(json!({"subscription": format!("{outcome:?}")})))
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub channel_id: Option<String>,
    pub cursor: Option<String>,
    pub limit: Option<i64>,
}

/// GET /v1/conversations
pub async fn get_conversations(
    State(state): State<GatewayState>,
    Query(query): Query<PageQuery>,
) -> Result<Json<conflux_directory::ConversationPage>, ApiError> {
    let page = state
        .directory
        .list(query.channel_id, query.cursor.as_deref(), query.limit)
        .await?;
    Ok(Json(page))
}

/// GET /v1/conversations/{id}
pub async fn get_conversation(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> Result<Json<conflux_storage::ConversationRecord>, ApiError> {
    Ok(Json(state.directory.get(&id).await?))
}

/// GET /v1/conversations/{id}/messages
pub async fn get_conversation_messages(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<Json<conflux_directory::HistoryPage>, ApiError> {
    let page = state
        .directory
        .history(&id, query.cursor.as_deref(), query.limit)
        .await?;
    Ok(Json(page))
}

/// POST /v1/conversations/{id}/read
pub async fn post_conversation_read(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.directory.mark_read(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct ArchiveBody {
    pub archived: bool,
}

/// POST /v1/conversations/{id}/archive
pub async fn post_conversation_archive(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
    Json(body): Json<ArchiveBody>,
) -> Result<StatusCode, ApiError> {
    state.directory.set_archived(&id, body.archived).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct SendBody {
    pub content: String,
    #[serde(default)]
    pub sender: Option<SenderRole>,
}

/// POST /v1/conversations/{id}/messages -- send a reply.
pub async fn post_conversation_messages(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
    Json(body): Json<SendBody>,
) -> Result<Response, ApiError> {
    let sender = body.sender.unwrap_or(SenderRole::Operator);
    let report = state.dispatcher.send(&id, sender, &body.content).await?;

    let payload = json!({
        "message_id": report.message_id,
        "conversation_id": report.conversation_id,
        "seq": report.seq,
        "state": report.state,
        "attempts": report.attempts,
        "error": report.error,
    });
    // The message is persisted either way; the status code reports whether
    // the provider took it.
    let status = if report.state == conflux_core::DeliveryState::Delivered {
        StatusCode::OK
    } else {
        StatusCode::BAD_GATEWAY
    };
    Ok((status, Json(payload)).into_response())
}

/// GET /v1/messages/{id}/delivery -- the delivery ledger entry.
pub async fn get_message_delivery(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> Result<Json<conflux_storage::DeliveryRecord>, ApiError> {
    let record = deliveries::get_delivery(&state.db, &id)
        .await?
        .ok_or_else(|| ConfluxError::not_found("delivery", &id))?;
    Ok(Json(record))
}
