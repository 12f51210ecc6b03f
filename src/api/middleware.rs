//! Request guard middleware.
//!
//! Flow Overview:
//! 1) Look up the route policy by matched route template; exempt routes pass.
//! 2) Validate the token: signature, structure, delegated session.
//! 3) Resolve the tenant the request addresses (`x-tenant` or `Host`) and
//!    fence the token to it.
//! 4) Authorize against the policy and attach the principal to the request.

use axum::{
    body::Body,
    extract::{MatchedPath, State},
    http::{HeaderMap, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, warn};

use crate::auth::{
    AuthError, AuthResult, AuthService,
    audit::{AuditAction, AuditEntry},
    claims::AuthenticatedPrincipal,
    guard::{
        RequestContext,
        policy::{PolicyTable, RoutePolicy, authorize},
        transport::{extract_session_token, tenant_hint},
    },
    utils::{extract_client_ip, token_fingerprint},
};

#[derive(Clone)]
pub(crate) struct GuardState {
    auth: Arc<AuthService>,
    policies: Arc<PolicyTable>,
}

impl GuardState {
    pub(crate) fn new(auth: Arc<AuthService>, policies: PolicyTable) -> Self {
        Self {
            auth,
            policies: Arc::new(policies),
        }
    }
}

pub(crate) async fn guard(
    State(state): State<GuardState>,
    matched: Option<MatchedPath>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    let template = matched.as_ref().map_or(path.as_str(), MatchedPath::as_str);
    let policy = state.policies.policy_for(template);
    if policy.exempt {
        return next.run(request).await;
    }

    match admit(&state, &policy, &path, request.headers()).await {
        Ok(principal) => {
            request.extensions_mut().insert(principal);
            next.run(request).await
        }
        Err(err) => err.into_response(),
    }
}

async fn admit(
    state: &GuardState,
    policy: &RoutePolicy,
    path: &str,
    headers: &HeaderMap,
) -> AuthResult<AuthenticatedPrincipal> {
    let client_ip = extract_client_ip(headers);
    let ip = client_ip.as_deref().unwrap_or("-");
    let now = Utc::now();
    let token = extract_session_token(headers);

    let claims = match state.auth.guard().validate_token(token.as_deref(), now).await {
        Ok(claims) => claims,
        Err(err) => {
            let fingerprint = token.as_deref().map_or_else(|| "-".to_string(), token_fingerprint);
            warn!(path, ip, token = %fingerprint, "token rejected: {err}");
            if !matches!(err, AuthError::Internal(_)) {
                record_denial(
                    state,
                    AuditEntry::new("anonymous", AuditAction::TokenRejected, path)
                        .denied()
                        .reason(format!("{err}; ip {ip}; token {fingerprint}")),
                )
                .await;
            }
            return Err(err);
        }
    };

    // Only authenticated callers learn whether a tenant exists.
    let tenant = match tenant_hint(headers, state.auth.config().frontend_host()) {
        Some(reference) => match state.auth.resolve_tenant(&reference).await {
            Ok(tenant) => Some(tenant.id),
            Err(err) => {
                warn!(
                    user = %claims.acting_user_id(),
                    path,
                    ip,
                    tenant = %reference,
                    "request rejected: {err}"
                );
                return Err(err);
            }
        },
        None => None,
    };

    let context = RequestContext {
        path: path.to_string(),
        client_ip: client_ip.clone(),
        tenant,
    };
    // The guard audits tenant mismatches itself.
    state.auth.guard().check_tenant(&claims, &context).await?;
    let principal = AuthenticatedPrincipal::new(claims, now);

    if let Err(err) = authorize(&principal, policy, path) {
        let claims = &principal.claims;
        warn!(
            user = %claims.acting_user_id(),
            path,
            ip,
            "access denied: {err}"
        );
        record_denial(
            state,
            AuditEntry::new(
                claims.acting_user_id().to_string(),
                AuditAction::AccessDenied,
                path,
            )
            .tenant(claims.tenant_context)
            .denied()
            .reason(format!("{err}; ip {ip}")),
        )
        .await;
        return Err(err);
    }

    Ok(principal)
}

async fn record_denial(state: &GuardState, entry: AuditEntry) {
    if let Err(err) = state.auth.audit().record(entry).await {
        error!("Failed to record denial: {err}");
    }
}
