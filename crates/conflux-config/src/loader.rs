// SPDX-FileCopyrightText: 2026 Conflux Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loader using Figment for layered config merging.
//!
//! Supports the XDG hierarchy: `./conflux.toml` > `~/.config/conflux/conflux.toml`
//! > `/etc/conflux/conflux.toml`, with environment variable overrides via the
//! `CONFLUX_` prefix.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::Path;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};

use crate::model::ConfluxConfig;

/// Load configuration from the standard XDG hierarchy with env var overrides.
///
/// Merge order (later overrides earlier):
/// 1. Compiled defaults
/// 2. `/etc/conflux/conflux.toml` (system-wide)
/// 3. `~/.config/conflux/conflux.toml` (user XDG config)
/// 4. `./conflux.toml` (local directory)
/// 5. `CONFLUX_*` environment variables
pub fn load_config() -> Result<ConfluxConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(ConfluxConfig::default()))
        .merge(Toml::file("/etc/conflux/conflux.toml"))
        .merge(Toml::file(
            dirs::config_dir()
                .map(|d| d.join("conflux/conflux.toml"))
                .unwrap_or_default(),
        ))
        .merge(Toml::file("conflux.toml"))
        .merge(env_provider())
        .extract()
}

/// Load configuration from a TOML string only (no XDG lookup, no env).
///
/// Used for testing and explicit config specification.
pub fn load_config_from_str(toml_content: &str) -> Result<ConfluxConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(ConfluxConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load configuration from a specific file path with env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<ConfluxConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(ConfluxConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// Create the environment variable provider using explicit `map()` for
/// section-to-dot mapping.
///
/// Uses `Env::map()` NOT `Env::split("_")` to avoid ambiguity with
/// underscore-containing key names: `CONFLUX_SERVER_PUBLIC_BASE_URL` must map
/// to `server.public_base_url`, not `server.public.base.url`.
fn env_provider() -> Env {
    Env::prefixed("CONFLUX_").map(|key| {
        let lowered = key.as_str().to_ascii_lowercase();
        for section in ["service", "server", "storage", "dispatch", "ratelimit"] {
            if let Some(rest) = lowered.strip_prefix(section) {
                if let Some(field) = rest.strip_prefix('_') {
                    return format!("{section}.{field}").into();
                }
            }
        }
        lowered.into()
    })
}
