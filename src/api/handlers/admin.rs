use axum::{
    Json,
    extract::{Extension, Query},
};
use serde::Deserialize;
use std::sync::Arc;
use utoipa::IntoParams;

use crate::auth::{AuthResult, AuthService, audit::AuditEntry};

const DEFAULT_LIMIT: usize = 100;
const MAX_LIMIT: usize = 1000;

#[derive(Debug, Deserialize, IntoParams)]
pub struct AuditQuery {
    /// Number of entries, newest first (default 100, at most 1000).
    pub limit: Option<usize>,
}

#[utoipa::path(
    get,
    path = "/v1/admin/audit",
    params(AuditQuery),
    responses(
        (status = 200, description = "Most recent audit entries.", body = [AuditEntry]),
        (status = 403, description = "Caller is not a super-admin."),
    ),
    tag = "admin"
)]
pub async fn audit(
    auth: Extension<Arc<AuthService>>,
    Query(query): Query<AuditQuery>,
) -> AuthResult<Json<Vec<AuditEntry>>> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    Ok(Json(auth.audit().recent(limit).await?))
}
