pub mod admin;
pub mod auth;
pub mod delegation;
pub mod health;
pub mod two_factor;

use anyhow::Context;
use axum::http::{HeaderMap, header::SET_COOKIE};

use crate::auth::{
    AuthResult, AuthService,
    guard::transport::{clear_session_cookie, session_cookie},
};

/// `Set-Cookie` for a freshly issued token.
pub(crate) fn cookie_headers(
    auth: &AuthService,
    token: &str,
    max_age_seconds: i64,
) -> AuthResult<HeaderMap> {
    let cookie = session_cookie(
        token,
        max_age_seconds.max(0),
        auth.config().session_cookie_secure(),
    )
    .context("failed to build session cookie")?;
    let mut headers = HeaderMap::new();
    headers.insert(SET_COOKIE, cookie);
    Ok(headers)
}

pub(crate) fn clear_cookie_headers(auth: &AuthService) -> AuthResult<HeaderMap> {
    let cookie = clear_session_cookie(auth.config().session_cookie_secure())
        .context("failed to build session cookie")?;
    let mut headers = HeaderMap::new();
    headers.insert(SET_COOKIE, cookie);
    Ok(headers)
}
