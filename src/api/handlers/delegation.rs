//! Secure login and impersonation for platform users.

use axum::{
    Json,
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

use super::{clear_cookie_headers, cookie_headers};
use crate::auth::{
    AuthResult, AuthService, claims::AuthenticatedPrincipal, delegation::DelegationGrant,
};

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SecureLoginRequest {
    pub tenant_id: Uuid,
    pub duration_minutes: i64,
    pub reason: String,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ImpersonationRequest {
    pub tenant_id: Uuid,
    pub target_user_id: Uuid,
    pub reason: String,
    pub duration_minutes: i64,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EndImpersonationRequest {
    /// Defaults to the session carried by the caller's token.
    #[serde(default)]
    pub session_id: Option<Uuid>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RedirectResponse {
    pub redirect_url: String,
}

fn grant_response(auth: &AuthService, grant: DelegationGrant) -> AuthResult<Response> {
    let max_age = (grant.expires_at - Utc::now()).num_seconds();
    let headers = cookie_headers(auth, &grant.access_token, max_age)?;
    Ok((StatusCode::OK, headers, Json(grant)).into_response())
}

#[utoipa::path(
    post,
    path = "/v1/auth/secure-login",
    request_body = SecureLoginRequest,
    responses(
        (status = 200, description = "Delegated token scoped to the tenant.", body = DelegationGrant),
        (status = 400, description = "Bad duration, reason or tenant."),
        (status = 403, description = "No delegation permission for the tenant."),
        (status = 404, description = "Unknown tenant."),
    ),
    tag = "delegation"
)]
pub async fn secure_login(
    auth: Extension<Arc<AuthService>>,
    Extension(principal): Extension<AuthenticatedPrincipal>,
    Json(request): Json<SecureLoginRequest>,
) -> AuthResult<Response> {
    let grant = auth
        .secure_login(
            &principal.claims,
            request.tenant_id,
            request.duration_minutes,
            &request.reason,
        )
        .await?;
    grant_response(&auth, grant)
}

#[utoipa::path(
    post,
    path = "/v1/auth/impersonation",
    request_body = ImpersonationRequest,
    responses(
        (status = 200, description = "Impersonation token for the target user.", body = DelegationGrant),
        (status = 400, description = "Bad duration, reason or tenant."),
        (status = 403, description = "No delegation permission for the tenant."),
        (status = 404, description = "Unknown tenant or target user."),
    ),
    tag = "delegation"
)]
pub async fn start_impersonation(
    auth: Extension<Arc<AuthService>>,
    Extension(principal): Extension<AuthenticatedPrincipal>,
    Json(request): Json<ImpersonationRequest>,
) -> AuthResult<Response> {
    let grant = auth
        .start_impersonation(
            &principal.claims,
            request.tenant_id,
            request.target_user_id,
            &request.reason,
            request.duration_minutes,
        )
        .await?;
    grant_response(&auth, grant)
}

#[utoipa::path(
    post,
    path = "/v1/auth/impersonation/end",
    request_body = EndImpersonationRequest,
    responses(
        (status = 200, description = "Impersonation ended.", body = RedirectResponse),
        (status = 403, description = "Caller did not start the session."),
        (status = 404, description = "Unknown or already ended session."),
    ),
    tag = "delegation"
)]
pub async fn end_impersonation(
    auth: Extension<Arc<AuthService>>,
    Extension(principal): Extension<AuthenticatedPrincipal>,
    request: Option<Json<EndImpersonationRequest>>,
) -> AuthResult<Response> {
    let session_id = request.and_then(|Json(body)| body.session_id);
    let redirect_url = auth
        .end_impersonation(&principal.claims, session_id)
        .await?;
    let headers = clear_cookie_headers(&auth)?;
    Ok((StatusCode::OK, headers, Json(RedirectResponse { redirect_url })).into_response())
}
