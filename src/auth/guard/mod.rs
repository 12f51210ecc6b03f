//! Per-request token validation.
//!
//! Every request re-derives trust from the presented token alone, in a fixed
//! order that stops at the first failure:
//!
//! 1. signature, issuer and signature expiry
//! 2. claim structure
//! 3. delegated session checks (`expiresAt`, impersonation shape, revocation)
//! 4. tenant fencing against the tenant the request itself resolved to
//!
//! Route exemption happens before this in the middleware, and authorization
//! (`policy::authorize`) after it.

pub mod policy;
pub mod transport;

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::audit::{AuditAction, AuditEntry, AuditTrail};
use super::claims::{AccessType, AuthenticatedPrincipal, SessionClaims};
use super::delegation::session::ImpersonationStore;
use super::error::{AuthError, AuthResult};
use super::token::TokenIssuer;

/// What the guard knows about the request besides the token.
#[derive(Clone, Debug, Default)]
pub struct RequestContext {
    pub path: String,
    pub client_ip: Option<String>,
    pub tenant: Option<Uuid>,
}

#[derive(Clone)]
pub struct TokenGuard {
    issuer: TokenIssuer,
    audit: AuditTrail,
    revocation: Option<Arc<dyn ImpersonationStore>>,
}

impl TokenGuard {
    #[must_use]
    pub fn new(issuer: TokenIssuer, audit: AuditTrail) -> Self {
        Self {
            issuer,
            audit,
            revocation: None,
        }
    }

    /// Also reject impersonation tokens whose session was ended or removed.
    #[must_use]
    pub fn with_revocation(mut self, sessions: Arc<dyn ImpersonationStore>) -> Self {
        self.revocation = Some(sessions);
        self
    }

    /// Validate a token for a request.
    ///
    /// # Errors
    /// `InvalidToken` or `TokenExpired` for bad tokens, `DelegationSessionExpired`
    /// for ended or expired delegation, `TenantContextMismatch` when a
    /// non-super-admin token is used against another tenant, `Internal` when a
    /// critical audit entry cannot be written.
    pub async fn authenticate(
        &self,
        token: Option<&str>,
        request: &RequestContext,
    ) -> AuthResult<AuthenticatedPrincipal> {
        self.authenticate_at(token, request, Utc::now()).await
    }

    /// [`TokenGuard::authenticate`] with an explicit clock.
    ///
    /// # Errors
    /// See [`TokenGuard::authenticate`].
    pub async fn authenticate_at(
        &self,
        token: Option<&str>,
        request: &RequestContext,
        now: DateTime<Utc>,
    ) -> AuthResult<AuthenticatedPrincipal> {
        let claims = self.validate_token(token, now).await?;
        self.check_tenant(&claims, request).await?;
        Ok(AuthenticatedPrincipal::new(claims, now))
    }

    /// Signature, structure and session checks; no tenant fencing.
    ///
    /// Callers that resolve the request tenant themselves run this first and
    /// [`TokenGuard::check_tenant`] after.
    ///
    /// # Errors
    /// `InvalidToken`, `TokenExpired` or `DelegationSessionExpired`.
    pub async fn validate_token(
        &self,
        token: Option<&str>,
        now: DateTime<Utc>,
    ) -> AuthResult<SessionClaims> {
        let token = token.ok_or(AuthError::InvalidToken("missing"))?;
        let raw = self.issuer.verify(token)?;
        let claims = SessionClaims::try_from(raw)?;
        self.check_session(&claims, now).await?;
        Ok(claims)
    }

    async fn check_session(&self, claims: &SessionClaims, now: DateTime<Utc>) -> AuthResult<()> {
        if claims.access_type == AccessType::Impersonation && claims.impersonated_user_id.is_none()
        {
            return Err(AuthError::InvalidToken("impersonated user"));
        }
        if claims.access_type.is_delegated() && claims.expires_at.is_none() {
            return Err(AuthError::InvalidToken("delegation expiry"));
        }
        if let Some(expires_at) = claims.expires_at {
            if now.timestamp() >= expires_at {
                return Err(AuthError::DelegationSessionExpired);
            }
        }

        if claims.access_type == AccessType::Impersonation {
            if let Some(sessions) = &self.revocation {
                let session_id = claims
                    .impersonation_session_id
                    .ok_or(AuthError::InvalidToken("impersonation session"))?;
                let active = sessions
                    .find(session_id)
                    .await?
                    .is_some_and(|session| session.is_active(now));
                if !active {
                    return Err(AuthError::DelegationSessionExpired);
                }
            }
        }
        Ok(())
    }

    /// Fence validated claims to the tenant the request resolved to.
    ///
    /// # Errors
    /// `TenantContextMismatch` for non-super-admins, `Internal` when the audit
    /// entry cannot be written.
    pub async fn check_tenant(
        &self,
        claims: &SessionClaims,
        request: &RequestContext,
    ) -> AuthResult<()> {
        let Some(request_tenant) = request.tenant else {
            return Ok(());
        };
        if claims.tenant_context == Some(request_tenant) {
            return Ok(());
        }

        let token_tenant = claims
            .tenant_context
            .map_or_else(|| "platform".to_string(), |id| id.to_string());
        if claims.is_super_admin {
            info!(
                user = %claims.acting_user_id(),
                token_tenant,
                request_tenant = %request_tenant,
                path = %request.path,
                "super-admin admitted across tenant boundary"
            );
            self.audit
                .record(
                    AuditEntry::new(
                        claims.acting_user_id().to_string(),
                        AuditAction::TenantMismatchAllowed,
                        request.path.clone(),
                    )
                    .tenant(Some(request_tenant))
                    .reason(format!("token tenant {token_tenant}")),
                )
                .await?;
            return Ok(());
        }

        warn!(
            user = %claims.acting_user_id(),
            token_tenant,
            request_tenant = %request_tenant,
            path = %request.path,
            ip = request.client_ip.as_deref().unwrap_or("-"),
            "tenant context mismatch"
        );
        self.audit
            .record(
                AuditEntry::new(
                    claims.acting_user_id().to_string(),
                    AuditAction::TenantMismatchDenied,
                    request.path.clone(),
                )
                .tenant(Some(request_tenant))
                .denied()
                .reason(format!("token tenant {token_tenant}")),
            )
            .await?;
        Err(AuthError::TenantContextMismatch)
    }
}
