// SPDX-FileCopyrightText: 2026 Conflux Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Message persistence: the transactional inbound record path, outbound
//! inserts, and history reads.

use chrono::SecondsFormat;
use conflux_core::{ConfluxError, NormalizedEvent};
use rusqlite::{params, OptionalExtension};

use crate::database::Database;
use crate::models::{InboundRecord, MessageRecord};

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRecord> {
    Ok(MessageRecord {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        seq: row.get(2)?,
        sender: row.get(3)?,
        content: row.get(4)?,
        provider_message_id: row.get(5)?,
        provider_timestamp: row.get(6)?,
        created_at: row.get(7)?,
    })
}

const SELECT_MESSAGE: &str = "SELECT id, conversation_id, seq, sender, content,
        provider_message_id, provider_timestamp, created_at FROM messages";

/// Record one normalized inbound event.
///
/// Runs as a single transaction on the writer thread:
/// 1. resolve or create the conversation for `(channel_id, conversation_key)`
///    (`new_conversation_id` is used only when the thread does not exist yet);
/// 2. `INSERT OR IGNORE` the message against the
///    `(conversation_id, provider_message_id)` uniqueness key -- a redelivered
///    event changes nothing and reports [`InboundRecord::Duplicate`];
/// 3. assign the next per-conversation sequence number;
/// 4. bump the conversation's unread count, preview, and last activity.
///
/// Because every event goes through this one path on one writer thread,
/// normalization order is sequence order.
pub async fn record_inbound(
    db: &Database,
    channel_id: &str,
    event: &NormalizedEvent,
    new_conversation_id: &str,
    new_message_id: &str,
) -> Result<InboundRecord, ConfluxError> {
    let channel_id = channel_id.to_string();
    let event = event.clone();
    let new_conversation_id = new_conversation_id.to_string();
    let new_message_id = new_message_id.to_string();
    let activity_at = event
        .timestamp
        .to_rfc3339_opts(SecondsFormat::Millis, true);

    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;

            let conversation_id: String = {
                let existing: Option<String> = tx
                    .query_row(
                        "SELECT id FROM conversations
                         WHERE channel_id = ?1 AND conversation_key = ?2",
                        params![channel_id, event.conversation_key],
                        |row| row.get(0),
                    )
                    .optional()?;
                match existing {
                    Some(id) => id,
                    None => {
                        tx.execute(
                            "INSERT INTO conversations
                               (id, channel_id, conversation_key, contact_id,
                                display_name, last_activity_at)
                             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                            params![
                                new_conversation_id,
                                channel_id,
                                event.conversation_key,
                                event.contact_id,
                                event.display_name,
                                activity_at,
                            ],
                        )?;
                        new_conversation_id.clone()
                    }
                }
            };

            tx.execute(
                "INSERT OR IGNORE INTO messages
                   (id, conversation_id, seq, sender, content,
                    provider_message_id, provider_timestamp)
                 SELECT ?1, ?2, COALESCE(MAX(seq), 0) + 1, 'contact', ?3, ?4, ?5
                 FROM messages WHERE conversation_id = ?2",
                params![
                    new_message_id,
                    conversation_id,
                    event.content,
                    event.provider_message_id,
                    activity_at,
                ],
            )?;

            if tx.changes() == 0 {
                // The de-duplication key already existed; the provider
                // redelivered. Commit keeps the (pre-existing) conversation
                // untouched.
                tx.commit()?;
                return Ok(InboundRecord::Duplicate);
            }

            let seq: i64 = tx.query_row(
                "SELECT seq FROM messages WHERE id = ?1",
                params![new_message_id],
                |row| row.get(0),
            )?;

            tx.execute(
                "UPDATE conversations SET
                   unread = unread + 1,
                   preview = ?1,
                   last_activity_at = ?2,
                   display_name = COALESCE(?3, display_name)
                 WHERE id = ?4",
                params![event.content, activity_at, event.display_name, conversation_id],
            )?;

            tx.commit()?;
            Ok(InboundRecord::Persisted {
                conversation_id,
                message_id: new_message_id,
                seq,
            })
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Insert an outbound message in `queued` delivery state.
///
/// Creates the message row, its delivery ledger row, and touches the
/// conversation's preview/last-activity in one transaction, so the message is
/// visible in history before the provider call happens. Returns the assigned
/// sequence, or `None` when the conversation does not exist.
pub async fn insert_outbound(
    db: &Database,
    conversation_id: &str,
    message_id: &str,
    sender: &str,
    content: &str,
) -> Result<Option<i64>, ConfluxError> {
    let conversation_id = conversation_id.to_string();
    let message_id = message_id.to_string();
    let sender = sender.to_string();
    let content = content.to_string();

    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;

            let exists: Option<String> = tx
                .query_row(
                    "SELECT id FROM conversations WHERE id = ?1",
                    params![conversation_id],
                    |row| row.get(0),
                )
                .optional()?;
            if exists.is_none() {
                return Ok(None);
            }

            tx.execute(
                "INSERT INTO messages (id, conversation_id, seq, sender, content)
                 SELECT ?1, ?2, COALESCE(MAX(seq), 0) + 1, ?3, ?4
                 FROM messages WHERE conversation_id = ?2",
                params![message_id, conversation_id, sender, content],
            )?;

            tx.execute(
                "INSERT INTO deliveries (message_id) VALUES (?1)",
                params![message_id],
            )?;

            tx.execute(
                "UPDATE conversations SET
                   preview = ?1,
                   last_activity_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE id = ?2",
                params![content, conversation_id],
            )?;

            let seq: i64 = tx.query_row(
                "SELECT seq FROM messages WHERE id = ?1",
                params![message_id],
                |row| row.get(0),
            )?;

            tx.commit()?;
            Ok(Some(seq))
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Attach the provider-native id to a sent message.
///
/// The only mutation messages admit after insert, besides delivery-state
/// transitions in the ledger.
pub async fn set_provider_message_id(
    db: &Database,
    message_id: &str,
    provider_message_id: &str,
) -> Result<(), ConfluxError> {
    let message_id = message_id.to_string();
    let provider_message_id = provider_message_id.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE messages SET provider_message_id = ?1 WHERE id = ?2",
                params![provider_message_id, message_id],
            )?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Fetch one message by id.
pub async fn get_message(
    db: &Database,
    message_id: &str,
) -> Result<Option<MessageRecord>, ConfluxError> {
    let message_id = message_id.to_string();
    db.connection()
        .call(move |conn| {
            let message = conn
                .query_row(
                    &format!("{SELECT_MESSAGE} WHERE id = ?1"),
                    params![message_id],
                    row_to_message,
                )
                .optional()?;
            Ok(message)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Reverse-chronological page of a conversation's history.
///
/// `before_seq` is the restartable cursor: pass the lowest `seq` of the
/// previous page to continue, `None` to start from the newest message.
pub async fn get_history(
    db: &Database,
    conversation_id: &str,
    before_seq: Option<i64>,
    limit: i64,
) -> Result<Vec<MessageRecord>, ConfluxError> {
    let conversation_id = conversation_id.to_string();
    db.connection()
        .call(move |conn| {
            let mut messages = Vec::new();
            match before_seq {
                Some(before) => {
                    let mut stmt = conn.prepare(&format!(
                        "{SELECT_MESSAGE} WHERE conversation_id = ?1 AND seq < ?2
                         ORDER BY seq DESC LIMIT ?3"
                    ))?;
                    let rows =
                        stmt.query_map(params![conversation_id, before, limit], row_to_message)?;
                    for row in rows {
                        messages.push(row?);
                    }
                }
                None => {
                    let mut stmt = conn.prepare(&format!(
                        "{SELECT_MESSAGE} WHERE conversation_id = ?1
                         ORDER BY seq DESC LIMIT ?2"
                    ))?;
                    let rows = stmt.query_map(params![conversation_id, limit], row_to_message)?;
                    for row in rows {
                        messages.push(row?);
                    }
                }
            }
            Ok(messages)
        })
        .await
        .map_err(crate::database::map_tr_err)
}
