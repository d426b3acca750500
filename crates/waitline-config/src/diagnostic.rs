// SPDX-FileCopyrightText: 2026 Waitline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Figment-to-miette error bridge.
//!
//! Converts Figment deserialization errors and validation failures into
//! miette diagnostics so startup failures read like compiler errors rather
//! than raw serde output.

use miette::Diagnostic;
use thiserror::Error;

/// A configuration error with diagnostic metadata.
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    /// The configuration could not be parsed or deserialized.
    #[error("configuration parse error: {message}")]
    #[diagnostic(
        code(waitline::config::parse),
        help("check ./waitline.toml and WAITLINE_* environment variables against the documented keys")
    )]
    Parse {
        /// Figment's rendered error, including the offending key path.
        message: String,
    },

    /// A parsed value failed semantic validation.
    #[error("configuration validation error: {message}")]
    #[diagnostic(code(waitline::config::validation))]
    Validation { message: String },
}

/// Convert a figment error chain into one [`ConfigError::Parse`] per error.
pub fn figment_to_config_errors(err: figment::Error) -> Vec<ConfigError> {
    err.into_iter()
        .map(|e| ConfigError::Parse {
            message: e.to_string(),
        })
        .collect()
}

/// Render all config errors to stderr via miette's fancy reporter.
pub fn render_errors(errors: &[ConfigError]) {
    for error in errors {
        let report = miette::Report::msg(error.to_string());
        eprintln!("{report:?}");
    }
    eprintln!(
        "waitline: {} configuration error{} -- fix the above and retry",
        errors.len(),
        if errors.len() == 1 { "" } else { "s" }
    );
}
