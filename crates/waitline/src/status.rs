// SPDX-FileCopyrightText: 2026 Waitline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `waitline status` command: queries the running gateway's public status
//! endpoint for one token.

use std::time::Duration;

use waitline_config::WaitlineConfig;
use waitline_core::WaitlineError;

pub async fn run_status(
    config: &WaitlineConfig,
    token_id: &str,
    json: bool,
) -> Result<(), WaitlineError> {
    let url = format!(
        "http://{}:{}/status/{token_id}",
        config.gateway.host, config.gateway.port
    );

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(3))
        .build()
        .map_err(|e| WaitlineError::Internal(format!("failed to build HTTP client: {e}")))?;

    let response = client.get(&url).send().await.map_err(|e| {
        WaitlineError::Channel {
            message: format!("gateway not reachable at {url}"),
            source: Some(Box::new(e)),
        }
    })?;

    if response.status() == reqwest::StatusCode::NOT_FOUND {
        println!("unknown token {token_id}");
        return Ok(());
    }
    if !response.status().is_success() {
        return Err(WaitlineError::Channel {
            message: format!("gateway returned {}", response.status()),
            source: None,
        });
    }

    let body: serde_json::Value = response.json().await.map_err(|e| {
        WaitlineError::Channel {
            message: "unparseable status response".into(),
            source: Some(Box::new(e)),
        }
    })?;

    if json {
        println!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
    } else {
        println!("{}", format_status(&body));
    }
    Ok(())
}

fn format_status(body: &serde_json::Value) -> String {
    let label = body["token"]["label"].as_str().unwrap_or("?");
    let status = body["token"]["status"].as_str().unwrap_or("?");
    let ahead = body["tokens_ahead"].as_i64().unwrap_or(0);
    let serving = body["current_serving"].as_i64().unwrap_or(0);
    format!("token {label} is {status}; {ahead} ahead; now serving number {serving}")
}
