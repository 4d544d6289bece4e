// SPDX-FileCopyrightText: 2026 Conflux Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Semantic validation of loaded configuration.
//!
//! Figment/serde handle shape and types; this pass catches values that parse
//! but cannot work at runtime.

use conflux_core::ConfluxError;

use crate::model::ConfluxConfig;

/// Validate a loaded configuration, returning the first problem found.
pub fn validate(config: &ConfluxConfig) -> Result<(), ConfluxError> {
    let url = &config.server.public_base_url;
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(ConfluxError::Config(format!(
            "server.public_base_url must start with http:// or https:// (got {url:?})"
        )));
    }
    if url.ends_with('/') {
        return Err(ConfluxError::Config(
            "server.public_base_url must not end with a trailing slash".into(),
        ));
    }

    if config.server.port == 0 {
        return Err(ConfluxError::Config("server.port must be non-zero".into()));
    }

    if config.dispatch.max_attempts == 0 {
        return Err(ConfluxError::Config(
            "dispatch.max_attempts must be at least 1".into(),
        ));
    }
    if config.dispatch.backoff_multiplier < 1.0 {
        return Err(ConfluxError::Config(
            "dispatch.backoff_multiplier must be >= 1.0".into(),
        ));
    }
    if config.dispatch.send_timeout_secs == 0 {
        return Err(ConfluxError::Config(
            "dispatch.send_timeout_secs must be at least 1".into(),
        ));
    }

    if config.ratelimit.per_second <= 0.0 {
        return Err(ConfluxError::Config(
            "ratelimit.per_second must be positive".into(),
        ));
    }

    Ok(())
}
