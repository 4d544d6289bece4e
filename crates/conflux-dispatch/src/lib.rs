// SPDX-FileCopyrightText: 2026 Conflux Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Outbound dispatch: persist-first sends with bounded, deterministic
//! backoff, recorded in the delivery ledger.

pub mod backoff;
pub mod dispatcher;

pub use backoff::BackoffPolicy;
pub use dispatcher::{OutboundDispatcher, SendReport};
