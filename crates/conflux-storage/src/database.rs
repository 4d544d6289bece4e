// SPDX-FileCopyrightText: 2026 Conflux Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Database connection management with PRAGMA setup, WAL mode, and lifecycle.

use conflux_core::ConfluxError;
use tracing::debug;

/// Handle to the single SQLite connection.
///
/// All access goes through [`Database::connection`] and tokio-rusqlite's
/// `call`, which executes closures on one background thread.
pub struct Database {
    conn: tokio_rusqlite::Connection,
}

impl Database {
    /// Opens (creating if needed) the database at `path`, applies PRAGMAs,
    /// and runs pending migrations.
    pub async fn open(path: &str) -> Result<Self, ConfluxError> {
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| ConfluxError::Storage {
                    source: Box::new(e),
                })?;
            }
        }

        // `open` fails with a plain rusqlite error, not the tokio-rusqlite
        // wrapper the `call` paths produce.
        let conn = tokio_rusqlite::Connection::open(path)
            .await
            .map_err(|e| ConfluxError::Storage {
                source: Box::new(e),
            })?;

        let migration_result = conn
            .call(|conn| {
                conn.execute_batch(
                    "PRAGMA journal_mode = WAL;
                     PRAGMA synchronous = NORMAL;
                     PRAGMA foreign_keys = ON;
                     PRAGMA busy_timeout = 5000;",
                )?;
                Ok(crate::migrations::run_migrations(conn))
            })
            .await
            .map_err(map_tr_err)?;

        migration_result.map_err(|e| ConfluxError::Storage { source: e.into() })?;

        debug!(path, "database opened");
        Ok(Self { conn })
    }

    /// Returns the underlying tokio-rusqlite connection.
    pub fn connection(&self) -> &tokio_rusqlite::Connection {
        &self.conn
    }

    /// Checkpoints the WAL. Call before shutdown.
    pub async fn close(&self) -> Result<(), ConfluxError> {
        self.conn
            .call(|conn| {
                conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)?;
        debug!("WAL checkpoint complete");
        Ok(())
    }
}

/// Maps a tokio-rusqlite error into the workspace error type.
pub(crate) fn map_tr_err(e: tokio_rusqlite::Error) -> ConfluxError {
    ConfluxError::Storage {
        source: Box::new(e),
    }
}
