// SPDX-FileCopyrightText: 2026 Waitline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Integration tests for the layered configuration pipeline.

use waitline_config::{load_and_validate_str, ConfigError};

fn secrets_toml() -> &'static str {
    r#"
[gateway]
clinic_id = "c1"
verify_token = "hub-verify"
app_secret = "hub-secret"

[vault]
encryption_key = "00112233445566778899aabbccddeeff00112233445566778899aabbccddeeff"
pepper = "pepper"
"#
}

#[test]
fn minimal_serving_config_loads_and_validates() {
    let config = load_and_validate_str(secrets_toml()).unwrap();
    assert_eq!(config.gateway.verify_token.as_deref(), Some("hub-verify"));
    assert_eq!(config.queue.default_daily_limit, 50);
    assert_eq!(config.notify.retry_backoff_secs, 300);
}

#[test]
fn parse_and_validation_errors_are_distinguished() {
    let parse = load_and_validate_str("[vault]\nencrypton_key = \"x\"\n").unwrap_err();
    assert!(matches!(parse[0], ConfigError::Parse { .. }));

    let validation = load_and_validate_str(
        r#"
[gateway]
verify_token = "vt"
app_secret = "as"

[vault]
encryption_key = "deadbeef"
"#,
    )
    .unwrap_err();
    assert!(validation
        .iter()
        .all(|e| matches!(e, ConfigError::Validation { .. })));
}

#[test]
fn validation_collects_all_errors_not_fail_fast() {
    let errors = load_and_validate_str(
        r#"
[queue]
default_daily_limit = 0

[notify]
max_attempts = 0
"#,
    )
    .unwrap_err();
    // gateway clinic and secrets missing (3) + daily limit + max attempts
    assert!(errors.len() >= 4, "got {} errors", errors.len());
}

#[test]
fn overridden_sync_timings_survive_roundtrip() {
    let mut toml = secrets_toml().to_string();
    toml.push_str("\n[sync]\nheartbeat_secs = 10\nbackoff_cap_secs = 20\n");
    let config = load_and_validate_str(&toml).unwrap();
    assert_eq!(config.sync.heartbeat_secs, 10);
    assert_eq!(config.sync.backoff_cap_secs, 20);
    assert_eq!(config.sync.debounce_ms, 100);
}
