//! Command-line argument dispatch.
//!
//! Maps validated CLI matches to the action the binary runs.

use crate::cli::actions::{Action, server::Args};
use crate::cli::commands::auth;
use anyhow::{Context, Result, bail};
use secrecy::SecretString;

const MIN_TOKEN_SECRET_BYTES: usize = 32;

fn required<T: Clone + Send + Sync + 'static>(matches: &clap::ArgMatches, name: &str) -> Result<T> {
    matches
        .get_one::<T>(name)
        .cloned()
        .with_context(|| format!("missing required argument: --{name}"))
}

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or too weak.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches.get_one::<String>("dsn").cloned();

    let token_secret: String = required(matches, auth::ARG_TOKEN_SECRET)?;
    if token_secret.len() < MIN_TOKEN_SECRET_BYTES {
        bail!("--{} must be at least {MIN_TOKEN_SECRET_BYTES} bytes", auth::ARG_TOKEN_SECRET);
    }
    let backup_code_pepper: String = required(matches, auth::ARG_BACKUP_CODE_PEPPER)?;
    if backup_code_pepper.is_empty() {
        bail!("--{} must not be empty", auth::ARG_BACKUP_CODE_PEPPER);
    }

    Ok(Action::Server(Args {
        port,
        dsn,
        frontend_base_url: required(matches, auth::ARG_FRONTEND_BASE_URL)?,
        token_secret: SecretString::from(token_secret),
        token_issuer: required(matches, auth::ARG_TOKEN_ISSUER)?,
        token_ttl_seconds: required(matches, auth::ARG_TOKEN_TTL_SECONDS)?,
        two_factor_session_ttl_seconds: required(
            matches,
            auth::ARG_TWO_FACTOR_SESSION_TTL_SECONDS,
        )?,
        two_factor_max_attempts: required(matches, auth::ARG_TWO_FACTOR_MAX_ATTEMPTS)?,
        totp_issuer: required(matches, auth::ARG_TOTP_ISSUER)?,
        backup_code_pepper: SecretString::from(backup_code_pepper),
        max_delegation_minutes: required(matches, auth::ARG_MAX_DELEGATION_MINUTES)?,
    }))
}
