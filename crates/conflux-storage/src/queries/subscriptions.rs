// SPDX-FileCopyrightText: 2026 Conflux Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Webhook subscription persistence.
//!
//! The `subscriptions` table is keyed by channel id, which enforces the "at
//! most one subscription per channel" invariant at the schema level.

use conflux_core::{ConfluxError, SubscriptionHandle};
use rusqlite::{params, OptionalExtension};

use crate::database::Database;
use crate::models::SubscriptionRecord;

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<SubscriptionRecord> {
    Ok(SubscriptionRecord {
        channel_id: row.get(0)?,
        external_id: row.get(1)?,
        callback_url: row.get(2)?,
        title: row.get(3)?,
        created_at: row.get(4)?,
    })
}

/// Store the handle returned by a provider registration, replacing any
/// previous one for the channel.
pub async fn upsert_subscription(
    db: &Database,
    channel_id: &str,
    handle: &SubscriptionHandle,
) -> Result<(), ConfluxError> {
    let channel_id = channel_id.to_string();
    let handle = handle.clone();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO subscriptions (channel_id, external_id, callback_url, title)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (channel_id) DO UPDATE SET
                   external_id = excluded.external_id,
                   callback_url = excluded.callback_url,
                   title = excluded.title",
                params![
                    channel_id,
                    handle.external_id,
                    handle.callback_url,
                    handle.title,
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Fetch the stored subscription for a channel, if any.
pub async fn get_subscription(
    db: &Database,
    channel_id: &str,
) -> Result<Option<SubscriptionRecord>, ConfluxError> {
    let channel_id = channel_id.to_string();
    db.connection()
        .call(move |conn| {
            let record = conn
                .query_row(
                    "SELECT channel_id, external_id, callback_url, title, created_at
                     FROM subscriptions WHERE channel_id = ?1",
                    params![channel_id],
                    row_to_record,
                )
                .optional()?;
            Ok(record)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Remove the stored subscription for a channel. Missing rows are fine.
pub async fn delete_subscription(db: &Database, channel_id: &str) -> Result<(), ConfluxError> {
    let channel_id = channel_id.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "DELETE FROM subscriptions WHERE channel_id = ?1",
                params![channel_id],
            )?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use conflux_core::{Channel, ChannelCredentials, ChannelId, ChannelStatus, ProviderKind};
    use tempfile::tempdir;

    async fn setup() -> (Database, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path().join("t.db").to_str().unwrap())
            .await
            .unwrap();
        let channel = Channel {
            id: ChannelId("ch-1".into()),
            provider: ProviderKind::Vk,
            status: ChannelStatus::Active,
            credentials: ChannelCredentials::default(),
            created_at: "2026-01-01T00:00:00.000Z".into(),
        };
        crate::queries::channels::create_channel(&db, &channel)
            .await
            .unwrap();
        (db, dir)
    }

    fn handle(url: &str) -> SubscriptionHandle {
        SubscriptionHandle {
            external_id: Some("42".into()),
            callback_url: url.into(),
            title: Some("conflux".into()),
        }
    }

    #[tokio::test]
    async fn upsert_then_get() {
        let (db, _dir) = setup().await;

        upsert_subscription(&db, "ch-1", &handle("https://a.example.com/hook"))
            .await
            .unwrap();
        let got = get_subscription(&db, "ch-1").await.unwrap().unwrap();
        assert_eq!(got.callback_url, "https://a.example.com/hook");
        assert_eq!(got.external_id.as_deref(), Some("42"));

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn upsert_replaces_existing_row() {
        let (db, _dir) = setup().await;

        upsert_subscription(&db, "ch-1", &handle("https://old.example.com/hook"))
            .await
            .unwrap();
        upsert_subscription(
            &db,
            "ch-1",
            &SubscriptionHandle {
                external_id: Some("43".into()),
                callback_url: "https://new.example.com/hook".into(),
                title: None,
            },
        )
        .await
        .unwrap();

        // Still exactly one row per channel.
        let got = get_subscription(&db, "ch-1").await.unwrap().unwrap();
        assert_eq!(got.callback_url, "https://new.example.com/hook");
        assert_eq!(got.external_id.as_deref(), Some("43"));

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let (db, _dir) = setup().await;

        upsert_subscription(&db, "ch-1", &handle("https://a.example.com/hook"))
            .await
            .unwrap();
        delete_subscription(&db, "ch-1").await.unwrap();
        assert!(get_subscription(&db, "ch-1").await.unwrap().is_none());

        // Deleting again is a no-op, not an error.
        delete_subscription(&db, "ch-1").await.unwrap();
        db.close().await.unwrap();
    }
}
