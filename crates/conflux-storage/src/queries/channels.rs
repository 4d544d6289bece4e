// SPDX-FileCopyrightText: 2026 Conflux Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Channel CRUD operations.

use std::str::FromStr;

use conflux_core::{Channel, ChannelCredentials, ChannelId, ChannelStatus, ConfluxError, ProviderKind};
use rusqlite::{params, OptionalExtension};

use crate::database::Database;

fn row_to_channel(row: &rusqlite::Row<'_>) -> rusqlite::Result<Channel> {
    let provider: String = row.get(1)?;
    let status: String = row.get(2)?;
    let credentials: String = row.get(3)?;
    Ok(Channel {
        id: ChannelId(row.get(0)?),
        provider: ProviderKind::from_str(&provider).map_err(|_| {
            rusqlite::Error::FromSqlConversionFailure(
                1,
                rusqlite::types::Type::Text,
                format!("unknown provider: {provider}").into(),
            )
        })?,
        status: ChannelStatus::from_str(&status).map_err(|_| {
            rusqlite::Error::FromSqlConversionFailure(
                2,
                rusqlite::types::Type::Text,
                format!("unknown channel status: {status}").into(),
            )
        })?,
        credentials: serde_json::from_str::<ChannelCredentials>(&credentials).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                3,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })?,
        created_at: row.get(4)?,
    })
}

/// Insert a new channel.
pub async fn create_channel(db: &Database, channel: &Channel) -> Result<(), ConfluxError> {
    let channel = channel.clone();
    let credentials = serde_json::to_string(&channel.credentials)
        .map_err(|e| ConfluxError::Internal(format!("credential serialization: {e}")))?;
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO channels (id, provider, status, credentials, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    channel.id.0,
                    channel.provider.to_string(),
                    channel.status.to_string(),
                    credentials,
                    channel.created_at,
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Fetch a channel by id.
pub async fn get_channel(db: &Database, id: &str) -> Result<Option<Channel>, ConfluxError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| {
            let channel = conn
                .query_row(
                    "SELECT id, provider, status, credentials, created_at
                     FROM channels WHERE id = ?1",
                    params![id],
                    row_to_channel,
                )
                .optional()?;
            Ok(channel)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// List all channels, optionally filtered by status.
pub async fn list_channels(
    db: &Database,
    status: Option<ChannelStatus>,
) -> Result<Vec<Channel>, ConfluxError> {
    let status = status.map(|s| s.to_string());
    db.connection()
        .call(move |conn| {
            let mut channels = Vec::new();
            match status {
                Some(status) => {
                    let mut stmt = conn.prepare(
                        "SELECT id, provider, status, credentials, created_at
                         FROM channels WHERE status = ?1 ORDER BY created_at ASC",
                    )?;
                    let rows = stmt.query_map(params![status], row_to_channel)?;
                    for row in rows {
                        channels.push(row?);
                    }
                }
                None => {
                    let mut stmt = conn.prepare(
                        "SELECT id, provider, status, credentials, created_at
                         FROM channels ORDER BY created_at ASC",
                    )?;
                    let rows = stmt.query_map([], row_to_channel)?;
                    for row in rows {
                        channels.push(row?);
                    }
                }
            }
            Ok(channels)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Update a channel's status (soft activation/deactivation).
pub async fn set_channel_status(
    db: &Database,
    id: &str,
    status: ChannelStatus,
) -> Result<(), ConfluxError> {
    let id = id.to_string();
    let status = status.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE channels SET status = ?1 WHERE id = ?2",
                params![status, id],
            )?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Replace a channel's credentials (token rotation).
pub async fn update_credentials(
    db: &Database,
    id: &str,
    credentials: &ChannelCredentials,
) -> Result<(), ConfluxError> {
    let id = id.to_string();
    let credentials = serde_json::to_string(credentials)
        .map_err(|e| ConfluxError::Internal(format!("credential serialization: {e}")))?;
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE channels SET credentials = ?1 WHERE id = ?2",
                params![credentials, id],
            )?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}
