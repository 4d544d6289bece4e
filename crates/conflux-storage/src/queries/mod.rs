// SPDX-FileCopyrightText: 2026 Conflux Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Query modules for CRUD operations on storage entities.

pub mod channels;
pub mod conversations;
pub mod deliveries;
pub mod messages;
pub mod subscriptions;
