//! Login, second-factor verification, logout and session introspection.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use std::sync::Arc;
use utoipa::ToSchema;

use super::{clear_cookie_headers, cookie_headers};
use crate::auth::{
    AuthError, AuthResult, AuthService, LoginOutcome,
    claims::AuthenticatedPrincipal,
    guard::transport::tenant_hint,
    service::IssuedToken,
    two_factor::methods::TwoFactorMethod,
    utils::extract_client_ip,
};

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    /// Tenant id or subdomain. Falls back to the request's tenant hint.
    #[serde(default)]
    pub tenant: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct VerifyTwoFactorRequest {
    pub session_id: String,
    pub code: String,
    /// `totp` or `backup_code`; inferred from the code when omitted.
    #[serde(default)]
    pub method: Option<String>,
}

#[utoipa::path(
    post,
    path = "/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Token issued, or a second factor is required.", body = LoginOutcome),
        (status = 400, description = "Unknown or inactive tenant."),
        (status = 401, description = "Invalid credentials, or a platform identity on a tenant login."),
    ),
    tag = "auth"
)]
pub async fn login(
    auth: Extension<Arc<AuthService>>,
    headers: HeaderMap,
    Json(request): Json<LoginRequest>,
) -> AuthResult<Response> {
    let reference = request
        .tenant
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .or_else(|| tenant_hint(&headers, auth.config().frontend_host()));
    let tenant = match reference {
        Some(reference) => Some(auth.resolve_tenant(&reference).await?.id),
        None => None,
    };

    let client_ip = extract_client_ip(&headers);
    let outcome = auth
        .login(&request.email, &request.password, tenant, client_ip.as_deref())
        .await?;

    let response_headers = match &outcome {
        LoginOutcome::Authenticated(token) => {
            cookie_headers(&auth, &token.access_token, token.expires_in)?
        }
        LoginOutcome::TwoFactorRequired(_) => HeaderMap::new(),
    };
    Ok((StatusCode::OK, response_headers, Json(outcome)).into_response())
}

#[utoipa::path(
    post,
    path = "/v1/auth/2fa/verify",
    request_body = VerifyTwoFactorRequest,
    responses(
        (status = 200, description = "Second factor accepted; token issued.", body = IssuedToken),
        (status = 401, description = "Invalid code, or an expired, unknown or consumed session."),
        (status = 429, description = "Too many failed attempts."),
    ),
    tag = "auth"
)]
pub async fn verify_two_factor(
    auth: Extension<Arc<AuthService>>,
    Json(request): Json<VerifyTwoFactorRequest>,
) -> AuthResult<Response> {
    let method = match request.method.as_deref() {
        Some(value) => Some(
            TwoFactorMethod::parse(value)
                .ok_or_else(|| AuthError::UnsupportedMethod(value.to_string()))?,
        ),
        None => None,
    };
    let token = auth
        .verify_two_factor(&request.session_id, &request.code, method)
        .await?;
    let response_headers = cookie_headers(&auth, &token.access_token, token.expires_in)?;
    Ok((StatusCode::OK, response_headers, Json(token)).into_response())
}

#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    responses(
        (status = 204, description = "Session cookie cleared."),
    ),
    tag = "auth"
)]
pub async fn logout(auth: Extension<Arc<AuthService>>) -> AuthResult<Response> {
    let headers = clear_cookie_headers(&auth)?;
    Ok((StatusCode::NO_CONTENT, headers).into_response())
}

#[utoipa::path(
    get,
    path = "/v1/auth/session",
    responses(
        (status = 200, description = "The authenticated principal.", body = AuthenticatedPrincipal),
        (status = 401, description = "Missing, invalid or expired token."),
    ),
    tag = "auth"
)]
pub async fn session(
    Extension(principal): Extension<AuthenticatedPrincipal>,
) -> Json<AuthenticatedPrincipal> {
    Json(principal)
}
