//! Second-factor enrollment for the authenticated user.
//!
//! Delegated sessions may not change the factors of the identity they act as.

use axum::{
    Json,
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use std::sync::Arc;
use utoipa::ToSchema;

use crate::auth::{
    AuthError, AuthResult, AuthService,
    claims::AuthenticatedPrincipal,
    two_factor::{
        TwoFactorStatus,
        methods::{MethodSetup, TwoFactorMethod},
    },
};

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct ConfirmRequest {
    pub code: String,
}

fn direct_user(principal: &AuthenticatedPrincipal) -> AuthResult<()> {
    if principal.claims.access_type.is_delegated() {
        return Err(AuthError::Forbidden(
            "two-factor changes require a direct session".to_string(),
        ));
    }
    Ok(())
}

fn parse_method(value: &str) -> AuthResult<TwoFactorMethod> {
    TwoFactorMethod::parse(value).ok_or_else(|| AuthError::UnsupportedMethod(value.to_string()))
}

#[utoipa::path(
    get,
    path = "/v1/auth/2fa/status",
    responses(
        (status = 200, description = "Enrolled second factors.", body = TwoFactorStatus),
        (status = 401, description = "Missing or invalid token."),
    ),
    tag = "two-factor"
)]
pub async fn status(
    auth: Extension<Arc<AuthService>>,
    Extension(principal): Extension<AuthenticatedPrincipal>,
) -> AuthResult<Json<TwoFactorStatus>> {
    Ok(Json(auth.two_factor_status(principal.claims.subject_id).await?))
}

#[utoipa::path(
    post,
    path = "/v1/auth/2fa/{method}/setup",
    params(("method" = String, Path, description = "`totp` or `backup_code`")),
    responses(
        (status = 200, description = "Enrollment material.", body = MethodSetup),
        (status = 400, description = "Unknown method."),
        (status = 403, description = "Delegated session."),
    ),
    tag = "two-factor"
)]
pub async fn setup(
    auth: Extension<Arc<AuthService>>,
    Extension(principal): Extension<AuthenticatedPrincipal>,
    Path(method): Path<String>,
) -> AuthResult<Json<MethodSetup>> {
    direct_user(&principal)?;
    let method = parse_method(&method)?;
    let claims = &principal.claims;
    let setup = auth
        .setup_two_factor(method, claims.subject_id, &claims.email)
        .await?;
    Ok(Json(setup))
}

#[utoipa::path(
    post,
    path = "/v1/auth/2fa/{method}/confirm",
    params(("method" = String, Path, description = "`totp` or `backup_code`")),
    request_body = ConfirmRequest,
    responses(
        (status = 204, description = "Method enabled."),
        (status = 401, description = "Invalid code."),
        (status = 404, description = "Nothing pending confirmation."),
    ),
    tag = "two-factor"
)]
pub async fn confirm(
    auth: Extension<Arc<AuthService>>,
    Extension(principal): Extension<AuthenticatedPrincipal>,
    Path(method): Path<String>,
    Json(request): Json<ConfirmRequest>,
) -> AuthResult<Response> {
    direct_user(&principal)?;
    let method = parse_method(&method)?;
    auth.confirm_two_factor(method, principal.claims.subject_id, &request.code)
        .await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

#[utoipa::path(
    post,
    path = "/v1/auth/2fa/{method}/disable",
    params(("method" = String, Path, description = "`totp` or `backup_code`")),
    responses(
        (status = 204, description = "Method removed."),
        (status = 403, description = "Delegated session."),
    ),
    tag = "two-factor"
)]
pub async fn disable(
    auth: Extension<Arc<AuthService>>,
    Extension(principal): Extension<AuthenticatedPrincipal>,
    Path(method): Path<String>,
) -> AuthResult<Response> {
    direct_user(&principal)?;
    let method = parse_method(&method)?;
    auth.disable_two_factor(method, principal.claims.subject_id)
        .await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}
