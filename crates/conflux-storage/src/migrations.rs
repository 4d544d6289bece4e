// SPDX-FileCopyrightText: 2026 Conflux Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Embedded database migrations using refinery.
//!
//! SQL migration files are compiled into the binary at build time via
//! `embed_migrations!`. Migrations run automatically on database open;
//! refinery tracks applied migrations in its own `refinery_schema_history`
//! table, so reopening an up-to-date database is a no-op.

mod embedded {
    use refinery::embed_migrations;
    embed_migrations!("migrations");
}

/// Run all pending migrations against the given connection.
///
/// The error is stringified so it can cross the tokio-rusqlite call boundary.
pub fn run_migrations(conn: &mut rusqlite::Connection) -> Result<(), String> {
    embedded::migrations::runner()
        .run(conn)
        .map(|_| ())
        .map_err(|e| format!("migration failed: {e}"))
}
