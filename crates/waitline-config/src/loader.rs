// SPDX-FileCopyrightText: 2026 Waitline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loader using Figment for layered config merging.
//!
//! Supports XDG hierarchy: `./waitline.toml` > `~/.config/waitline/waitline.toml`
//! > `/etc/waitline/waitline.toml` with environment variable overrides via
//! the `WAITLINE_` prefix.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::Path;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};

use crate::model::WaitlineConfig;

/// Load configuration from the standard XDG hierarchy with env overrides.
///
/// Merge order (later overrides earlier):
/// 1. Compiled defaults
/// 2. `/etc/waitline/waitline.toml` (system-wide)
/// 3. `~/.config/waitline/waitline.toml` (user XDG config)
/// 4. `./waitline.toml` (local directory)
/// 5. `WAITLINE_*` environment variables
pub fn load_config() -> Result<WaitlineConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(WaitlineConfig::default()))
        .merge(Toml::file("/etc/waitline/waitline.toml"))
        .merge(Toml::file(
            dirs::config_dir()
                .map(|d| d.join("waitline/waitline.toml"))
                .unwrap_or_default(),
        ))
        .merge(Toml::file("waitline.toml"))
        .merge(env_provider())
        .extract()
}

/// Load configuration from a TOML string only (no XDG lookup, no env).
///
/// Used for testing and explicit config specification.
pub fn load_config_from_str(toml_content: &str) -> Result<WaitlineConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(WaitlineConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load configuration from a specific file path with env overrides.
pub fn load_config_from_path(path: &Path) -> Result<WaitlineConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(WaitlineConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// Create the environment variable provider using explicit `map()` for
/// section-to-dot mapping.
///
/// Uses `Env::map()` NOT `Env::split("_")` to avoid ambiguity with
/// underscore-containing key names: `WAITLINE_VAULT_ENCRYPTION_KEY` must map
/// to `vault.encryption_key`, not `vault.encryption.key`.
fn env_provider() -> Env {
    Env::prefixed("WAITLINE_").map(|key| {
        let key_str = key.as_str();
        let mapped = key_str
            .replacen("service_", "service.", 1)
            .replacen("storage_", "storage.", 1)
            .replacen("gateway_", "gateway.", 1)
            .replacen("vault_", "vault.", 1)
            .replacen("provider_", "provider.", 1)
            .replacen("queue_", "queue.", 1)
            .replacen("notify_", "notify.", 1)
            .replacen("sync_", "sync.", 1);
        mapped.into()
    })
}
