// SPDX-FileCopyrightText: 2026 Conflux Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Conversation directory queries: recency-ordered listing with keyset
//! pagination, read/unread accounting, and archival.

use conflux_core::ConfluxError;
use rusqlite::{params, params_from_iter, types::ToSql, OptionalExtension};

use crate::database::Database;
use crate::models::ConversationRecord;

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationRecord> {
    Ok(ConversationRecord {
        id: row.get(0)?,
        channel_id: row.get(1)?,
        conversation_key: row.get(2)?,
        contact_id: row.get(3)?,
        display_name: row.get(4)?,
        preview: row.get(5)?,
        unread: row.get(6)?,
        last_activity_at: row.get(7)?,
        archived: row.get(8)?,
    })
}

const SELECT_CONVERSATION: &str = "SELECT id, channel_id, conversation_key, contact_id,
        display_name, preview, unread, last_activity_at, archived FROM conversations";

/// Fetch one conversation by id.
pub async fn get_conversation(
    db: &Database,
    id: &str,
) -> Result<Option<ConversationRecord>, ConfluxError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| {
            let record = conn
                .query_row(
                    &format!("{SELECT_CONVERSATION} WHERE id = ?1"),
                    params![id],
                    row_to_record,
                )
                .optional()?;
            Ok(record)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Non-archived conversations, most recently active first.
///
/// The cursor is the `(last_activity_at, id)` pair of the last row of the
/// previous page; ties on activity time break on id so the walk is stable
/// while new messages land.
pub async fn list_conversations(
    db: &Database,
    channel_id: Option<String>,
    cursor: Option<(String, String)>,
    limit: i64,
) -> Result<Vec<ConversationRecord>, ConfluxError> {
    db.connection()
        .call(move |conn| {
            let mut sql = format!("{SELECT_CONVERSATION} WHERE archived = 0");
            let mut bindings: Vec<Box<dyn ToSql>> = Vec::new();

            if let Some(channel_id) = channel_id {
                bindings.push(Box::new(channel_id));
                sql.push_str(&format!(" AND channel_id = ?{}", bindings.len()));
            }
            if let Some((activity, id)) = cursor {
                bindings.push(Box::new(activity));
                bindings.push(Box::new(id));
                sql.push_str(&format!(
                    " AND (last_activity_at, id) < (?{}, ?{})",
                    bindings.len() - 1,
                    bindings.len()
                ));
            }
            bindings.push(Box::new(limit));
            sql.push_str(&format!(
                " ORDER BY last_activity_at DESC, id DESC LIMIT ?{}",
                bindings.len()
            ));

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(bindings.iter()), row_to_record)?;
            let mut conversations = Vec::new();
            for row in rows {
                conversations.push(row?);
            }
            Ok(conversations)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Reset the unread counter. Returns false when the conversation is unknown.
pub async fn mark_read(db: &Database, id: &str) -> Result<bool, ConfluxError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                "UPDATE conversations SET unread = 0 WHERE id = ?1",
                params![id],
            )?;
            Ok(changed > 0)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Hide a conversation from the directory listing. History stays readable.
pub async fn set_archived(db: &Database, id: &str, archived: bool) -> Result<bool, ConfluxError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                "UPDATE conversations SET archived = ?1 WHERE id = ?2",
                params![archived, id],
            )?;
            Ok(changed > 0)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use conflux_core::{
        Channel, ChannelCredentials, ChannelId, ChannelStatus, NormalizedEvent, ProviderKind,
    };
    use tempfile::tempdir;

    async fn setup() -> (Database, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path().join("t.db").to_str().unwrap())
            .await
            .unwrap();
        for (id, provider) in [("ch-1", ProviderKind::Telegram), ("ch-2", ProviderKind::Vk)] {
            let channel = Channel {
                id: ChannelId(id.into()),
                provider,
                status: ChannelStatus::Active,
                credentials: ChannelCredentials::default(),
                created_at: "2026-01-01T00:00:00.000Z".into(),
            };
            crate::queries::channels::create_channel(&db, &channel)
                .await
                .unwrap();
        }
        (db, dir)
    }

    async fn seed_conversation(db: &Database, channel: &str, key: &str, secs: u32) {
        let event = NormalizedEvent {
            conversation_key: key.into(),
            contact_id: format!("contact-{key}"),
            display_name: None,
            content: format!("hello from {key}"),
            provider_message_id: format!("pm-{key}"),
            timestamp: Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, secs).unwrap(),
        };
        crate::queries::messages::record_inbound(
            db,
            channel,
            &event,
            &format!("conv-{key}"),
            &format!("msg-{key}"),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn list_orders_by_recency() {
        let (db, _dir) = setup().await;
        seed_conversation(&db, "ch-1", "a", 10).await;
        seed_conversation(&db, "ch-1", "b", 30).await;
        seed_conversation(&db, "ch-2", "c", 20).await;

        let all = list_conversations(&db, None, None, 50).await.unwrap();
        let ids: Vec<_> = all.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, ["conv-b", "conv-c", "conv-a"]);

        let ch1 = list_conversations(&db, Some("ch-1".into()), None, 50)
            .await
            .unwrap();
        let ids: Vec<_> = ch1.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, ["conv-b", "conv-a"]);

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn keyset_cursor_resumes_without_overlap() {
        let (db, _dir) = setup().await;
        for (key, secs) in [("a", 10), ("b", 20), ("c", 30), ("d", 40)] {
            seed_conversation(&db, "ch-1", key, secs).await;
        }

        let page1 = list_conversations(&db, None, None, 2).await.unwrap();
        assert_eq!(page1.len(), 2);
        let last = page1.last().unwrap();
        let page2 = list_conversations(
            &db,
            None,
            Some((last.last_activity_at.clone(), last.id.clone())),
            2,
        )
        .await
        .unwrap();

        let ids: Vec<_> = page1.iter().chain(&page2).map(|c| c.id.as_str()).collect();
        assert_eq!(ids, ["conv-d", "conv-c", "conv-b", "conv-a"]);

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn mark_read_clears_unread() {
        let (db, _dir) = setup().await;
        seed_conversation(&db, "ch-1", "a", 10).await;

        assert!(mark_read(&db, "conv-a").await.unwrap());
        let conv = get_conversation(&db, "conv-a").await.unwrap().unwrap();
        assert_eq!(conv.unread, 0);

        assert!(!mark_read(&db, "missing").await.unwrap());
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn archived_conversations_leave_the_listing() {
        let (db, _dir) = setup().await;
        seed_conversation(&db, "ch-1", "a", 10).await;
        seed_conversation(&db, "ch-1", "b", 20).await;

        assert!(set_archived(&db, "conv-a", true).await.unwrap());
        let listed = list_conversations(&db, None, None, 50).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, "conv-b");

        // History stays readable after archival.
        let history = crate::queries::messages::get_history(&db, "conv-a", None, 10)
            .await
            .unwrap();
        assert_eq!(history.len(), 1);

        assert!(set_archived(&db, "conv-a", false).await.unwrap());
        assert_eq!(list_conversations(&db, None, None, 50).await.unwrap().len(), 2);
        db.close().await.unwrap();
    }
}
