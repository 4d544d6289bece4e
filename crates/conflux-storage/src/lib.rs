// SPDX-FileCopyrightText: 2026 Conflux Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite persistence layer for the Conflux messaging core.
//!
//! Provides WAL-mode SQLite storage with embedded migrations, a single-writer
//! concurrency model via `tokio-rusqlite`, and typed query modules for
//! channels, webhook subscriptions, conversations, messages, and the
//! delivery ledger.
//!
//! All writes are serialized through tokio-rusqlite's single background
//! thread: `Database` wraps one connection, query functions accept
//! `&Database` and go through `connection().call()`. Do not create additional
//! connections for writes. This also gives the per-conversation ordering
//! guarantee for free -- an event normalized earlier reaches the writer
//! thread earlier and gets the lower sequence number.

pub mod database;
pub mod migrations;
pub mod models;
pub mod queries;

pub use database::Database;
pub use models::*;
