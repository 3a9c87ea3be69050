//! Runtime secret resolution.
//!
//! # Contract
//! - Config YAML stores only **env var NAMES** (e.g. `"SNAPSHOT_API_TOKEN"`).
//! - Callers invoke [`resolve_secrets`] once at startup and pass the result into
//!   constructors. No other code reads secret env vars.
//! - `Debug` redacts values. Errors name the env var, never the value.

use crate::Settings;
use anyhow::{bail, Result};

/// Secrets resolved from the environment. **Values are redacted in `Debug` output.**
#[derive(Clone, Default)]
pub struct ResolvedSecrets {
    /// Bearer token for the snapshot source. `None` when no `token_env` is configured.
    pub snapshot_token: Option<String>,
}

impl std::fmt::Debug for ResolvedSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedSecrets")
            .field(
                "snapshot_token",
                &self.snapshot_token.as_ref().map(|_| "<REDACTED>"),
            )
            .finish()
    }
}

/// `None` if the variable is unset or blank.
fn resolve_env(var_name: &str) -> Option<String> {
    match std::env::var(var_name) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}

/// A configured `token_env` whose variable is unset or blank is an error: the
/// operator asked for authentication and would otherwise get silent 401s.
pub fn resolve_secrets(settings: &Settings) -> Result<ResolvedSecrets> {
    let snapshot_token = match settings
        .snapshot
        .token_env
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
    {
        None => None,
        Some(name) => match resolve_env(name) {
            Some(v) => Some(v),
            None => bail!(
                "SECRETS_MISSING: env var '{}' (/snapshot/token_env) is not set or empty",
                name
            ),
        },
    };

    Ok(ResolvedSecrets { snapshot_token })
}
