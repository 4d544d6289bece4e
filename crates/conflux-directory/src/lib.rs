// SPDX-FileCopyrightText: 2026 Conflux Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Read-side directory over conversations and message history.
//!
//! The directory serves the operator dashboard: recency-ordered conversation
//! listing with unread counts, reverse-chronological history, read marking,
//! and archival. Pagination cursors are opaque to callers; what is inside
//! them (activity timestamp + id for listings, sequence number for history)
//! is free to change.

use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Serialize;
use tracing::debug;

use conflux_core::ConfluxError;
use conflux_storage::queries::{conversations, messages};
use conflux_storage::{ConversationRecord, Database, MessageRecord};

const DEFAULT_PAGE: i64 = 50;
const MAX_PAGE: i64 = 200;

/// One page of conversations, newest activity first.
#[derive(Debug, Serialize)]
pub struct ConversationPage {
    pub conversations: Vec<ConversationRecord>,
    /// Present when more rows may follow; feed back as `cursor`.
    pub next_cursor: Option<String>,
}

/// One page of messages, newest first.
#[derive(Debug, Serialize)]
pub struct HistoryPage {
    pub messages: Vec<MessageRecord>,
    pub next_cursor: Option<String>,
}

/// Read access to conversations and their history.
pub struct ConversationDirectory {
    db: Arc<Database>,
}

impl ConversationDirectory {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Non-archived conversations, most recently active first, optionally
    /// scoped to one channel.
    pub async fn list(
        &self,
        channel_id: Option<String>,
        cursor: Option<&str>,
        limit: Option<i64>,
    ) -> Result<ConversationPage, ConfluxError> {
        let limit = clamp_limit(limit);
        let cursor = cursor.map(decode_list_cursor).transpose()?;
        let rows = conversations::list_conversations(&self.db, channel_id, cursor, limit).await?;
        let next_cursor = (rows.len() as i64 == limit)
            .then(|| rows.last())
            .flatten()
            .map(|last| encode_list_cursor(&last.last_activity_at, &last.id));
        debug!(returned = rows.len(), "conversation page served");
        Ok(ConversationPage {
            conversations: rows,
            next_cursor,
        })
    }

    /// Fetch one conversation.
    pub async fn get(&self, conversation_id: &str) -> Result<ConversationRecord, ConfluxError> {
        conversations::get_conversation(&self.db, conversation_id)
            .await?
            .ok_or_else(|| ConfluxError::not_found("conversation", conversation_id))
    }

    /// Reverse-chronological message history for a conversation.
    pub async fn history(
        &self,
        conversation_id: &str,
        cursor: Option<&str>,
        limit: Option<i64>,
    ) -> Result<HistoryPage, ConfluxError> {
        // Distinguish "no messages" from "no such conversation".
        self.get(conversation_id).await?;

        let limit = clamp_limit(limit);
        let before_seq = cursor.map(decode_history_cursor).transpose()?;
        let rows = messages::get_history(&self.db, conversation_id, before_seq, limit).await?;
        let next_cursor = (rows.len() as i64 == limit)
            .then(|| rows.last())
            .flatten()
            .map(|last| encode_history_cursor(last.seq));
        Ok(HistoryPage {
            messages: rows,
            next_cursor,
        })
    }

    /// Reset the unread counter after an operator viewed the thread.
    pub async fn mark_read(&self, conversation_id: &str) -> Result<(), ConfluxError> {
        if !conversations::mark_read(&self.db, conversation_id).await? {
            return Err(ConfluxError::not_found("conversation", conversation_id));
        }
        Ok(())
    }

    /// Archive or unarchive a conversation. Archived threads leave the
    /// listing but keep their history readable.
    pub async fn set_archived(
        &self,
        conversation_id: &str,
        archived: bool,
    ) -> Result<(), ConfluxError> {
        if !conversations::set_archived(&self.db, conversation_id, archived).await? {
            return Err(ConfluxError::not_found("conversation", conversation_id));
        }
        Ok(())
    }
}

fn clamp_limit(limit: Option<i64>) -> i64 {
    limit.unwrap_or(DEFAULT_PAGE).clamp(1, MAX_PAGE)
}

fn encode_list_cursor(last_activity_at: &str, id: &str) -> String {
    URL_SAFE_NO_PAD.encode(format!("{last_activity_at}\n{id}"))
}

fn decode_list_cursor(cursor: &str) -> Result<(String, String), ConfluxError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(cursor)
        .map_err(|_| ConfluxError::InvalidArgument("malformed cursor".into()))?;
    let text = String::from_utf8(bytes)
        .map_err(|_| ConfluxError::InvalidArgument("malformed cursor".into()))?;
    let (activity, id) = text
        .split_once('\n')
        .ok_or_else(|| ConfluxError::InvalidArgument("malformed cursor".into()))?;
    Ok((activity.to_string(), id.to_string()))
}

fn encode_history_cursor(seq: i64) -> String {
    URL_SAFE_NO_PAD.encode(seq.to_string())
}

fn decode_history_cursor(cursor: &str) -> Result<i64, ConfluxError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(cursor)
        .map_err(|_| ConfluxError::InvalidArgument("malformed cursor".into()))?;
    String::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ConfluxError::InvalidArgument("malformed cursor".into()))
}
