//! API key lookup for hosted language models
//!
//! The variable name comes from `model.api_key_env` so several keys can live
//! side by side in one shell.

use kiln_core::{KilnError, Result};
use std::env;

/// Read the API key from `var`
///
/// Blank values count as missing.
pub fn api_key_from_env(var: &str) -> Result<String> {
    match env::var(var) {
        Ok(key) if !key.trim().is_empty() => {
            tracing::debug!("Using API key from {}", var);
            Ok(key.trim().to_string())
        }
        _ => Err(KilnError::Auth(format!(
            "No API key found. Set {}=... or change model.api_key_env in .kiln/config.toml",
            var
        ))),
    }
}
