// SPDX-FileCopyrightText: 2026 Conflux Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration system for the Conflux messaging core.
//!
//! Layered TOML configuration with environment variable overrides, loaded
//! through Figment. All config structs reject unknown keys at startup.

pub mod loader;
pub mod model;
pub mod validation;

pub use loader::{load_config, load_config_from_path, load_config_from_str};
pub use model::ConfluxConfig;

use conflux_core::ConfluxError;

/// Load configuration from the standard hierarchy and validate it.
///
/// This is the entry point the binary uses: any figment error or validation
/// failure comes back as a single `ConfluxError::Config`.
pub fn load_and_validate() -> Result<ConfluxConfig, ConfluxError> {
    let config = load_config().map_err(|e| ConfluxError::Config(e.to_string()))?;
    validation::validate(&config)?;
    Ok(config)
}
