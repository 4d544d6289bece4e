// SPDX-FileCopyrightText: 2026 Conflux Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Delivery ledger queries.
//!
//! State transitions are validated here, at the last write barrier, so no
//! caller can move a delivery out of a terminal state.

use std::str::FromStr;

use conflux_core::{ConfluxError, DeliveryState};
use rusqlite::{params, OptionalExtension};

use crate::database::Database;
use crate::models::DeliveryRecord;

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<DeliveryRecord> {
    Ok(DeliveryRecord {
        message_id: row.get(0)?,
        state: row.get(1)?,
        attempts: row.get(2)?,
        last_error: row.get(3)?,
        provider_message_id: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

const SELECT_DELIVERY: &str = "SELECT message_id, state, attempts, last_error,
        provider_message_id, updated_at FROM deliveries";

/// Fetch the ledger row for an outbound message.
pub async fn get_delivery(
    db: &Database,
    message_id: &str,
) -> Result<Option<DeliveryRecord>, ConfluxError> {
    let message_id = message_id.to_string();
    db.connection()
        .call(move |conn| {
            let record = conn
                .query_row(
                    &format!("{SELECT_DELIVERY} WHERE message_id = ?1"),
                    params![message_id],
                    row_to_record,
                )
                .optional()?;
            Ok(record)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Record the outcome of one send attempt and move the ledger to `next`.
///
/// Increments the attempt counter, stores the error text (cleared on
/// success states), and stamps the provider-native message id when the
/// provider returned one. Fails with an internal error when the transition
/// is not legal from the current state.
pub async fn record_attempt(
    db: &Database,
    message_id: &str,
    next: DeliveryState,
    error: Option<String>,
    provider_message_id: Option<String>,
) -> Result<DeliveryRecord, ConfluxError> {
    let message_id = message_id.to_string();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;

            let current: String = tx.query_row(
                "SELECT state FROM deliveries WHERE message_id = ?1",
                params![message_id],
                |row| row.get(0),
            )?;
            let current = DeliveryState::from_str(&current).map_err(|_| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Text,
                    format!("unknown delivery state: {current}").into(),
                )
            })?;
            // Surfaced to the caller through the nested result; a plain
            // rusqlite error would read as a storage failure.
            if !current.can_transition_to(next) {
                tx.commit()?;
                return Ok(Err(format!(
                    "illegal delivery transition {current} -> {next} for message {message_id}"
                )));
            }

            // Only moves out of queued/retrying consume an attempt; a receipt
            // confirming a sent message does not.
            let bump: i64 = match current {
                DeliveryState::Queued | DeliveryState::Retrying => 1,
                _ => 0,
            };
            tx.execute(
                "UPDATE deliveries SET
                   state = ?1,
                   attempts = attempts + ?5,
                   last_error = ?2,
                   provider_message_id = COALESCE(?3, provider_message_id),
                   updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE message_id = ?4",
                params![next.to_string(), error, provider_message_id, message_id, bump],
            )?;
            if let Some(pmid) = &provider_message_id {
                tx.execute(
                    "UPDATE messages SET provider_message_id = ?1 WHERE id = ?2",
                    params![pmid, message_id],
                )?;
            }

            let record = tx.query_row(
                &format!("{SELECT_DELIVERY} WHERE message_id = ?1"),
                params![message_id],
                row_to_record,
            )?;
            tx.commit()?;
            Ok(Ok(record))
        })
        .await
        .map_err(crate::database::map_tr_err)?
        .map_err(ConfluxError::Internal)
}
