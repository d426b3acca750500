// SPDX-FileCopyrightText: 2026 Waitline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Validates semantic constraints that cannot be expressed via serde
//! attributes: key lengths, required secrets, sane timer orderings.

use crate::diagnostic::ConfigError;
use crate::model::WaitlineConfig;

/// Validate a deserialized configuration for semantic correctness.
///
/// Returns `Ok(())` if all validations pass, or `Err(Vec<ConfigError>)` with
/// all collected validation errors (does not fail fast).
pub fn validate_config(config: &WaitlineConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    if config.storage.database_path.trim().is_empty() {
        errors.push(ConfigError::Validation {
            message: "storage.database_path must not be empty".to_string(),
        });
    }

    if let Some(ref key) = config.vault.encryption_key {
        match hex::decode(key) {
            Ok(bytes) if bytes.len() == 32 => {}
            Ok(bytes) => errors.push(ConfigError::Validation {
                message: format!(
                    "vault.encryption_key must decode to 32 bytes, got {}",
                    bytes.len()
                ),
            }),
            Err(_) => errors.push(ConfigError::Validation {
                message: "vault.encryption_key is not valid hex".to_string(),
            }),
        }
    }

    if config.gateway.enabled {
        if config.gateway.host.trim().is_empty() {
            errors.push(ConfigError::Validation {
                message: "gateway.host must not be empty".to_string(),
            });
        }
        if config.gateway.port == 0 {
            errors.push(ConfigError::Validation {
                message: "gateway.port must be non-zero".to_string(),
            });
        }
        if config.gateway.rate_limit_requests == 0 {
            errors.push(ConfigError::Validation {
                message: "gateway.rate_limit_requests must be at least 1".to_string(),
            });
        }
        for (key, value) in [
            ("gateway.clinic_id", &config.gateway.clinic_id),
            ("gateway.verify_token", &config.gateway.verify_token),
            ("gateway.app_secret", &config.gateway.app_secret),
        ] {
            if value.as_deref().is_none_or(|v| v.trim().is_empty()) {
                errors.push(ConfigError::Validation {
                    message: format!("{key} is required while the gateway is enabled"),
                });
            }
        }
    }

    if config.queue.default_daily_limit < 1 {
        errors.push(ConfigError::Validation {
            message: format!(
                "queue.default_daily_limit must be at least 1, got {}",
                config.queue.default_daily_limit
            ),
        });
    }

    if config.notify.max_attempts < 1 {
        errors.push(ConfigError::Validation {
            message: format!(
                "notify.max_attempts must be at least 1, got {}",
                config.notify.max_attempts
            ),
        });
    }

    if config.sync.backoff_base_secs > config.sync.backoff_cap_secs {
        errors.push(ConfigError::Validation {
            message: format!(
                "sync.backoff_base_secs ({}) must not exceed sync.backoff_cap_secs ({})",
                config.sync.backoff_base_secs, config.sync.backoff_cap_secs
            ),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
