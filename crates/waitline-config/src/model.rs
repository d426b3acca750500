// SPDX-FileCopyrightText: 2026 Waitline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the waitline service.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup, providing actionable error messages.

use serde::{Deserialize, Serialize};

/// Top-level waitline configuration.
///
/// Loaded from TOML files following XDG hierarchy, with environment variable
/// overrides. All sections are optional and default to sensible values;
/// secrets have no defaults and must be provided before `serve` will start.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct WaitlineConfig {
    /// Process-level settings.
    #[serde(default)]
    pub service: ServiceConfig,

    /// SQLite storage settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Webhook/HTTP gateway settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Phone vault secrets.
    #[serde(default)]
    pub vault: VaultConfig,

    /// Messaging provider settings.
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Queue policy settings.
    #[serde(default)]
    pub queue: QueueConfig,

    /// Outbound notification retry settings.
    #[serde(default)]
    pub notify: NotifyConfig,

    /// Realtime reconciliation client settings.
    #[serde(default)]
    pub sync: SyncConfig,
}

/// Process-level configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// SQLite storage configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

fn default_database_path() -> String {
    dirs::data_dir()
        .map(|p| p.join("waitline").join("waitline.db"))
        .unwrap_or_else(|| std::path::PathBuf::from("waitline.db"))
        .to_string_lossy()
        .into_owned()
}

/// Webhook/HTTP gateway configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Serve the HTTP gateway.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Host address to bind.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to bind.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Clinic this provider number (and therefore this webhook) is bound to.
    #[serde(default)]
    pub clinic_id: Option<String>,

    /// Secret echoed challenge check for webhook GET verification.
    #[serde(default)]
    pub verify_token: Option<String>,

    /// App secret for webhook POST body HMAC verification.
    #[serde(default)]
    pub app_secret: Option<String>,

    /// Webhook requests allowed per source IP per window.
    #[serde(default = "default_rate_limit_requests")]
    pub rate_limit_requests: u32,

    /// Rate-limit window length in seconds.
    #[serde(default = "default_rate_limit_window_secs")]
    pub rate_limit_window_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            host: default_host(),
            port: default_port(),
            clinic_id: None,
            verify_token: None,
            app_secret: None,
            rate_limit_requests: default_rate_limit_requests(),
            rate_limit_window_secs: default_rate_limit_window_secs(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8340
}

fn default_rate_limit_requests() -> u32 {
    20
}

fn default_rate_limit_window_secs() -> u64 {
    60
}

/// Phone vault secrets.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct VaultConfig {
    /// 32-byte AES-256-GCM key, hex encoded (64 chars).
    #[serde(default)]
    pub encryption_key: Option<String>,

    /// Secret pepper for the phone dedup HMAC.
    #[serde(default)]
    pub pepper: Option<String>,
}

/// Messaging provider configuration (WhatsApp-Cloud-style HTTP API).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    /// Bearer access token for the provider API.
    #[serde(default)]
    pub access_token: Option<String>,

    /// API base URL.
    #[serde(default = "default_provider_base_url")]
    pub base_url: String,

    /// Provider-issued sender (business phone number) id.
    #[serde(default)]
    pub sender_id: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            access_token: None,
            base_url: default_provider_base_url(),
            sender_id: None,
        }
    }
}

fn default_provider_base_url() -> String {
    "https://graph.facebook.com/v19.0".to_string()
}

/// Queue policy configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct QueueConfig {
    /// Daily active-token limit for clinics without an explicit limit.
    #[serde(default = "default_daily_limit")]
    pub default_daily_limit: i64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            default_daily_limit: default_daily_limit(),
        }
    }
}

fn default_daily_limit() -> i64 {
    50
}

/// Outbound notification retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct NotifyConfig {
    /// Fixed backoff between delivery attempts, seconds.
    #[serde(default = "default_retry_backoff_secs")]
    pub retry_backoff_secs: u64,

    /// Attempts before a message is marked FAILED.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i64,

    /// Interval of the retry sweep task, seconds.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            retry_backoff_secs: default_retry_backoff_secs(),
            max_attempts: default_max_attempts(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

fn default_retry_backoff_secs() -> u64 {
    300
}

fn default_max_attempts() -> i64 {
    3
}

fn default_sweep_interval_secs() -> u64 {
    30
}

/// Realtime reconciliation client configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
    /// Debounce applied to change-feed events before refetching, ms.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Debounce between consecutive optimistic user actions, ms.
    #[serde(default = "default_action_debounce_ms")]
    pub action_debounce_ms: u64,

    /// Heartbeat poll while the change feed is connected, seconds.
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,

    /// Initial reconnect backoff while disconnected, seconds.
    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: u64,

    /// Reconnect backoff cap, seconds.
    #[serde(default = "default_backoff_cap_secs")]
    pub backoff_cap_secs: u64,

    /// Post-mutation window during which authoritative snapshots are
    /// ignored, ms.
    #[serde(default = "default_blackout_ms")]
    pub blackout_ms: u64,

    /// Directory for per-clinic offline snapshot caches.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            action_debounce_ms: default_action_debounce_ms(),
            heartbeat_secs: default_heartbeat_secs(),
            backoff_base_secs: default_backoff_base_secs(),
            backoff_cap_secs: default_backoff_cap_secs(),
            blackout_ms: default_blackout_ms(),
            cache_dir: default_cache_dir(),
        }
    }
}

fn default_debounce_ms() -> u64 {
    100
}

fn default_action_debounce_ms() -> u64 {
    500
}

fn default_heartbeat_secs() -> u64 {
    45
}

fn default_backoff_base_secs() -> u64 {
    3
}

fn default_backoff_cap_secs() -> u64 {
    30
}

fn default_blackout_ms() -> u64 {
    2500
}

fn default_cache_dir() -> String {
    dirs::cache_dir()
        .map(|p| p.join("waitline"))
        .unwrap_or_else(|| std::path::PathBuf::from(".waitline-cache"))
        .to_string_lossy()
        .into_owned()
}
