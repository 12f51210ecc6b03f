//! Access delegation: secure login and impersonation.
//!
//! Secure login is stateless. The caller keeps their own identity and the
//! token's `expiresAt` bounds the access. Impersonation swaps the subject for a
//! tenant user and is backed by a persisted session that can be ended early.
//! Both are gated by `isSuperAdmin OR hasGrant(caller, tenant)` and both write a
//! critical audit entry before any token is signed.

pub mod session;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use url::Url;
use utoipa::ToSchema;
use uuid::Uuid;

use super::audit::{AuditAction, AuditEntry, AuditTrail};
use super::claims::{AccessType, IdentityScope, SessionClaims};
use super::error::{AuthError, AuthResult};
use super::stores::{IdentityStore, PermissionStore, Tenant, TenantDirectory, TenantLookup};
use super::token::TokenIssuer;
use super::utils::random_token;
use session::{ImpersonationSession, ImpersonationStatus, ImpersonationStore};

const DEFAULT_MAX_DELEGATION_MINUTES: i64 = 480;
const MAX_REASON_LEN: usize = 500;

#[derive(Clone, Debug)]
pub struct DelegationConfig {
    max_minutes: i64,
    frontend_base_url: Url,
}

impl DelegationConfig {
    #[must_use]
    pub fn new(frontend_base_url: Url) -> Self {
        Self {
            max_minutes: DEFAULT_MAX_DELEGATION_MINUTES,
            frontend_base_url,
        }
    }

    #[must_use]
    pub fn with_max_minutes(mut self, minutes: i64) -> Self {
        self.max_minutes = minutes.max(1);
        self
    }

    #[must_use]
    pub fn max_minutes(&self) -> i64 {
        self.max_minutes
    }

    #[must_use]
    pub fn frontend_base_url(&self) -> &Url {
        &self.frontend_base_url
    }
}

/// A signed delegated token and where the browser should go next.
#[derive(Clone, Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DelegationGrant {
    pub access_token: String,
    pub redirect_url: String,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub impersonation_session_id: Option<Uuid>,
}

#[derive(Clone)]
pub struct DelegationManager {
    config: DelegationConfig,
    identities: Arc<dyn IdentityStore>,
    tenants: Arc<dyn TenantDirectory>,
    permissions: Arc<dyn PermissionStore>,
    sessions: Arc<dyn ImpersonationStore>,
    audit: AuditTrail,
    issuer: TokenIssuer,
}

impl DelegationManager {
    #[must_use]
    pub fn new(
        config: DelegationConfig,
        identities: Arc<dyn IdentityStore>,
        tenants: Arc<dyn TenantDirectory>,
        permissions: Arc<dyn PermissionStore>,
        sessions: Arc<dyn ImpersonationStore>,
        audit: AuditTrail,
        issuer: TokenIssuer,
    ) -> Self {
        Self {
            config,
            identities,
            tenants,
            permissions,
            sessions,
            audit,
            issuer,
        }
    }

    /// Enter a tenant as yourself for a bounded time.
    ///
    /// # Errors
    /// `InvalidRequest` for bad duration or reason, `NotFound`/`InvalidTenant`
    /// for the tenant, `Forbidden` without permission, `Internal` when the audit
    /// entry cannot be written.
    #[instrument(skip(self, caller, reason), fields(caller = %caller.subject_id))]
    pub async fn secure_login(
        &self,
        caller: &SessionClaims,
        tenant_id: Uuid,
        duration_minutes: i64,
        reason: &str,
    ) -> AuthResult<DelegationGrant> {
        let reason = validate_reason(reason)?;
        self.validate_duration(duration_minutes)?;
        let tenant = self.tenant(tenant_id).await?;
        self.ensure_permission(caller, tenant_id).await?;

        let now = Utc::now();
        let expires_at = self.delegation_expiry(now, duration_minutes);

        self.audit
            .record(
                AuditEntry::new(
                    caller.subject_id.to_string(),
                    AuditAction::SecureLoginStarted,
                    format!("tenant:{tenant_id}"),
                )
                .tenant(Some(tenant_id))
                .reason(reason.clone()),
            )
            .await?;

        let claims = SessionClaims {
            subject_id: caller.subject_id,
            email: caller.email.clone(),
            name: caller.name.clone(),
            is_super_admin: caller.is_super_admin,
            tenant_context: Some(tenant_id),
            access_type: AccessType::SecureLogin,
            expires_at: Some(expires_at.timestamp()),
            original_user_id: Some(caller.subject_id),
            impersonated_user_id: None,
            impersonation_session_id: None,
            reason: Some(reason),
            roles: caller.roles.clone(),
            permissions: caller.permissions.clone(),
        };
        let access_token = self.issuer.sign_at(&claims, now)?;
        info!(tenant = %tenant_id, %expires_at, "secure login granted");

        Ok(DelegationGrant {
            access_token,
            redirect_url: self.tenant_url(&tenant)?,
            expires_at,
            impersonation_session_id: None,
        })
    }

    /// Act as a tenant user for a bounded time.
    ///
    /// # Errors
    /// As [`DelegationManager::secure_login`], plus `NotFound` when the target
    /// user does not exist in the tenant.
    #[instrument(skip(self, caller, reason), fields(caller = %caller.subject_id))]
    pub async fn start_impersonation(
        &self,
        caller: &SessionClaims,
        tenant_id: Uuid,
        target_user_id: Uuid,
        reason: &str,
        duration_minutes: i64,
    ) -> AuthResult<DelegationGrant> {
        let reason = validate_reason(reason)?;
        self.validate_duration(duration_minutes)?;
        let tenant = self.tenant(tenant_id).await?;
        self.ensure_permission(caller, tenant_id).await?;

        let target = self
            .identities
            .find_by_id(IdentityScope::Tenant(tenant_id), target_user_id)
            .await?
            .ok_or(AuthError::NotFound("user"))?;

        let now = Utc::now();
        let expires_at = self.delegation_expiry(now, duration_minutes);
        let session = ImpersonationSession {
            id: Uuid::new_v4(),
            original_user_id: caller.subject_id,
            original_tenant_id: caller.tenant_context,
            impersonated_user_id: target.id,
            impersonated_tenant_id: tenant_id,
            started_at: now,
            expires_at,
            reason: reason.clone(),
            status: ImpersonationStatus::Active,
            ended_at: None,
            session_id: random_token(),
        };
        self.sessions.create(&session).await?;

        let audited = self
            .audit
            .record(
                AuditEntry::new(
                    caller.subject_id.to_string(),
                    AuditAction::ImpersonationStarted,
                    format!("user:{}", target.id),
                )
                .tenant(Some(tenant_id))
                .reason(reason.clone()),
            )
            .await;
        if let Err(err) = audited {
            // Without its audit entry the session must not stay usable.
            self.sessions.end_active(session.id, Utc::now()).await?;
            return Err(err);
        }

        let claims = SessionClaims {
            subject_id: target.id,
            email: target.email.clone(),
            name: target.display_name.clone(),
            is_super_admin: false,
            tenant_context: Some(tenant_id),
            access_type: AccessType::Impersonation,
            expires_at: Some(expires_at.timestamp()),
            original_user_id: Some(caller.subject_id),
            impersonated_user_id: Some(target.id),
            impersonation_session_id: Some(session.id),
            reason: Some(reason),
            roles: target.roles.clone(),
            permissions: target.permissions.clone(),
        };
        let access_token = self.issuer.sign_at(&claims, now)?;
        info!(
            tenant = %tenant_id,
            target = %target.id,
            session = %session.id,
            %expires_at,
            "impersonation started"
        );

        Ok(DelegationGrant {
            access_token,
            redirect_url: self.tenant_url(&tenant)?,
            expires_at,
            impersonation_session_id: Some(session.id),
        })
    }

    /// End an impersonation session, returning the platform redirect target.
    ///
    /// # Errors
    /// `NotFound` if the session is absent or already ended, `Forbidden` if the
    /// caller did not start it, `Internal` if the audit entry cannot be written.
    #[instrument(skip(self))]
    pub async fn end_impersonation(&self, session_id: Uuid, caller_id: Uuid) -> AuthResult<String> {
        let session = self
            .sessions
            .find(session_id)
            .await?
            .ok_or(AuthError::NotFound("impersonation session"))?;

        if session.original_user_id != caller_id {
            warn!(session = %session_id, "impersonation end attempted by another user");
            return Err(AuthError::Forbidden(
                "only the user who started the impersonation can end it".to_string(),
            ));
        }

        let Some(ended) = self.sessions.end_active(session_id, Utc::now()).await? else {
            return Err(AuthError::NotFound("impersonation session"));
        };

        let audited = self
            .audit
            .record(
                AuditEntry::new(
                    caller_id.to_string(),
                    AuditAction::ImpersonationEnded,
                    format!("user:{}", ended.impersonated_user_id),
                )
                .tenant(Some(ended.impersonated_tenant_id))
                .reason(ended.reason.clone()),
            )
            .await;
        if let Err(err) = audited {
            // An unaudited end must not stick; the caller can retry.
            if !self.sessions.reopen(session_id).await? {
                error!(session = %session_id, "failed to reopen impersonation session");
            }
            return Err(err);
        }
        info!(session = %session_id, "impersonation ended");

        Ok(self.config.frontend_base_url.to_string())
    }

    /// Whether an impersonation session is still usable.
    ///
    /// # Errors
    /// `Internal` on store failures.
    pub async fn is_session_active(&self, session_id: Uuid) -> AuthResult<bool> {
        Ok(self
            .sessions
            .find(session_id)
            .await?
            .is_some_and(|session| session.is_active(Utc::now())))
    }

    fn validate_duration(&self, minutes: i64) -> AuthResult<()> {
        if (1..=self.config.max_minutes).contains(&minutes) {
            Ok(())
        } else {
            Err(AuthError::InvalidRequest(format!(
                "durationMinutes must be between 1 and {}",
                self.config.max_minutes
            )))
        }
    }

    /// Requested end of delegation, kept strictly before the signature expiry.
    fn delegation_expiry(&self, now: DateTime<Utc>, minutes: i64) -> DateTime<Utc> {
        let requested = now + Duration::minutes(minutes);
        let ceiling = self.issuer.signature_expiry(now) - Duration::seconds(1);
        requested.min(ceiling)
    }

    async fn tenant(&self, tenant_id: Uuid) -> AuthResult<Tenant> {
        let tenant = self
            .tenants
            .find_tenant(TenantLookup::Id(tenant_id))
            .await?
            .ok_or(AuthError::NotFound("tenant"))?;
        if !tenant.is_active {
            return Err(AuthError::InvalidTenant);
        }
        Ok(tenant)
    }

    async fn ensure_permission(&self, caller: &SessionClaims, tenant_id: Uuid) -> AuthResult<()> {
        if caller.access_type.is_delegated() {
            return Err(AuthError::Forbidden(
                "delegated sessions cannot start another delegation".to_string(),
            ));
        }
        if caller.tenant_context.is_some() {
            return Err(AuthError::Forbidden(
                "delegation is reserved for platform users".to_string(),
            ));
        }
        if caller.is_super_admin
            || self
                .permissions
                .has_grant(caller.subject_id, tenant_id)
                .await?
        {
            return Ok(());
        }
        warn!(caller = %caller.subject_id, tenant = %tenant_id, "delegation denied");
        Err(AuthError::Forbidden(
            "no delegation grant for this tenant".to_string(),
        ))
    }

    /// `scheme://{subdomain}.{frontend host}[:port]/`
    fn tenant_url(&self, tenant: &Tenant) -> AuthResult<String> {
        let mut url = self.config.frontend_base_url.clone();
        let host = url
            .host_str()
            .ok_or_else(|| anyhow::anyhow!("frontend base URL has no host"))?
            .to_string();
        url.set_host(Some(&format!("{}.{host}", tenant.subdomain)))
            .map_err(|err| anyhow::anyhow!("invalid tenant host: {err}"))?;
        url.set_path("/");
        url.set_query(None);
        Ok(url.to_string())
    }
}

fn validate_reason(reason: &str) -> AuthResult<String> {
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(AuthError::InvalidRequest("reason is required".to_string()));
    }
    if reason.chars().count() > MAX_REASON_LEN {
        return Err(AuthError::InvalidRequest(format!(
            "reason must be at most {MAX_REASON_LEN} characters"
        )));
    }
    Ok(reason.to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::auth::audit::{AuditRetryConfig, AuditSink, MemoryAuditSink};
    use crate::auth::claims::Principal;
    use crate::auth::stores::{MemoryIdentityStore, MemoryPermissionStore, MemoryTenantDirectory};
    use secrecy::SecretString;
    use session::MemoryImpersonationStore;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Memory sink whose appends fail while `down` is set.
    struct SwitchableSink {
        down: Arc<AtomicBool>,
        inner: Arc<MemoryAuditSink>,
    }

    #[async_trait::async_trait]
    impl AuditSink for SwitchableSink {
        async fn append(&self, entry: &AuditEntry) -> anyhow::Result<()> {
            if self.down.load(Ordering::SeqCst) {
                return Err(anyhow::anyhow!("audit sink unavailable"));
            }
            self.inner.append(entry).await
        }
    }

    struct Harness {
        manager: DelegationManager,
        issuer: TokenIssuer,
        audit: Arc<MemoryAuditSink>,
        audit_down: Arc<AtomicBool>,
        permissions: Arc<MemoryPermissionStore>,
        tenant: Tenant,
        target: Principal,
    }

    fn caller(is_super_admin: bool) -> SessionClaims {
        SessionClaims::direct(
            &Principal {
                id: Uuid::new_v4(),
                email: "ops@platform.test".to_string(),
                display_name: "Ops".to_string(),
                is_super_admin,
                password_hash: String::new(),
                roles: vec!["support".to_string()],
                permissions: Vec::new(),
            },
            None,
        )
    }

    async fn harness() -> Harness {
        let identities = Arc::new(MemoryIdentityStore::new());
        let tenants = Arc::new(MemoryTenantDirectory::new());
        let permissions = Arc::new(MemoryPermissionStore::new());
        let audit = Arc::new(MemoryAuditSink::new());
        let audit_down = Arc::new(AtomicBool::new(false));
        let sink = SwitchableSink {
            down: audit_down.clone(),
            inner: audit.clone(),
        };
        let issuer = TokenIssuer::new(&SecretString::from("s".repeat(32)), "warden", 3600);

        let tenant = Tenant {
            id: Uuid::new_v4(),
            subdomain: "acme".to_string(),
            is_active: true,
        };
        tenants.insert(tenant.clone()).await;
        let target = Principal {
            id: Uuid::new_v4(),
            email: "bob@acme.test".to_string(),
            display_name: "Bob".to_string(),
            is_super_admin: false,
            password_hash: String::new(),
            roles: vec!["member".to_string()],
            permissions: vec!["read".to_string()],
        };
        identities
            .insert(IdentityScope::Tenant(tenant.id), target.clone())
            .await;

        let manager = DelegationManager::new(
            DelegationConfig::new(Url::parse("https://app.example.com:8443").unwrap()),
            identities,
            tenants,
            permissions.clone(),
            Arc::new(MemoryImpersonationStore::new()),
            AuditTrail::new(Arc::new(sink)).with_retry(
                AuditRetryConfig::new()
                    .with_max_attempts(1)
                    .with_backoff_base(std::time::Duration::from_millis(1)),
            ),
            issuer.clone(),
        );
        Harness {
            manager,
            issuer,
            audit,
            audit_down,
            permissions,
            tenant,
            target,
        }
    }

    #[tokio::test]
    async fn secure_login_requires_permission() {
        let h = harness().await;
        let caller = caller(false);
        assert!(matches!(
            h.manager
                .secure_login(&caller, h.tenant.id, 30, "support ticket")
                .await,
            Err(AuthError::Forbidden(_))
        ));

        h.permissions.grant(caller.subject_id, h.tenant.id).await;
        let grant = h
            .manager
            .secure_login(&caller, h.tenant.id, 30, "  support ticket  ")
            .await
            .unwrap();
        assert_eq!(grant.redirect_url, "https://acme.app.example.com:8443/");

        let claims = SessionClaims::try_from(h.issuer.verify(&grant.access_token).unwrap()).unwrap();
        assert_eq!(claims.access_type, AccessType::SecureLogin);
        assert_eq!(claims.tenant_context, Some(h.tenant.id));
        assert_eq!(claims.original_user_id, Some(caller.subject_id));
        assert_eq!(claims.reason.as_deref(), Some("support ticket"));
        assert_eq!(claims.expires_at, Some(grant.expires_at.timestamp()));

        let entries = h.audit.entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, AuditAction::SecureLoginStarted);
    }

    #[tokio::test]
    async fn duration_is_clamped_below_signature_expiry() {
        let h = harness().await;
        // Token TTL is one hour; eight hours of delegation must be clamped.
        let grant = h
            .manager
            .secure_login(&caller(true), h.tenant.id, 480, "incident")
            .await
            .unwrap();
        assert!(grant.expires_at < h.issuer.signature_expiry(Utc::now()));
    }

    #[tokio::test]
    async fn invalid_duration_and_reason_are_rejected() {
        let h = harness().await;
        let caller = caller(true);
        for minutes in [0, -5, 481] {
            assert!(matches!(
                h.manager.secure_login(&caller, h.tenant.id, minutes, "x").await,
                Err(AuthError::InvalidRequest(_))
            ));
        }
        assert!(matches!(
            h.manager.secure_login(&caller, h.tenant.id, 10, "   ").await,
            Err(AuthError::InvalidRequest(_))
        ));
        assert!(matches!(
            h.manager
                .secure_login(&caller, h.tenant.id, 10, &"x".repeat(501))
                .await,
            Err(AuthError::InvalidRequest(_))
        ));
        assert!(h.audit.entries().await.is_empty());
    }

    #[tokio::test]
    async fn unknown_tenant_or_target_is_not_found() {
        let h = harness().await;
        let caller = caller(true);
        assert!(matches!(
            h.manager.secure_login(&caller, Uuid::new_v4(), 10, "x").await,
            Err(AuthError::NotFound("tenant"))
        ));
        assert!(matches!(
            h.manager
                .start_impersonation(&caller, h.tenant.id, Uuid::new_v4(), "x", 10)
                .await,
            Err(AuthError::NotFound("user"))
        ));
    }

    #[tokio::test]
    async fn impersonation_lifecycle() {
        let h = harness().await;
        let admin = caller(true);
        let grant = h
            .manager
            .start_impersonation(&admin, h.tenant.id, h.target.id, "debug order", 15)
            .await
            .unwrap();
        let session_id = grant.impersonation_session_id.unwrap();
        assert!(h.manager.is_session_active(session_id).await.unwrap());

        let claims = SessionClaims::try_from(h.issuer.verify(&grant.access_token).unwrap()).unwrap();
        assert_eq!(claims.subject_id, h.target.id);
        assert_eq!(claims.impersonated_user_id, Some(h.target.id));
        assert_eq!(claims.original_user_id, Some(admin.subject_id));
        assert_eq!(claims.impersonation_session_id, Some(session_id));
        assert_eq!(claims.roles, vec!["member".to_string()]);
        assert!(!claims.is_super_admin);

        assert!(matches!(
            h.manager.end_impersonation(session_id, Uuid::new_v4()).await,
            Err(AuthError::Forbidden(_))
        ));

        let redirect = h
            .manager
            .end_impersonation(session_id, admin.subject_id)
            .await
            .unwrap();
        assert_eq!(redirect, "https://app.example.com:8443/");
        assert!(!h.manager.is_session_active(session_id).await.unwrap());

        assert!(matches!(
            h.manager.end_impersonation(session_id, admin.subject_id).await,
            Err(AuthError::NotFound(_))
        ));

        let ended: Vec<_> = h
            .audit
            .recent(10)
            .await
            .unwrap()
            .into_iter()
            .filter(|e| e.action == AuditAction::ImpersonationEnded)
            .collect();
        assert_eq!(ended.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_end_writes_one_audit_entry() {
        let h = harness().await;
        let admin = caller(true);
        let grant = h
            .manager
            .start_impersonation(&admin, h.tenant.id, h.target.id, "debug", 15)
            .await
            .unwrap();
        let session_id = grant.impersonation_session_id.unwrap();

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let manager = h.manager.clone();
                let admin_id = admin.subject_id;
                tokio::spawn(async move { manager.end_impersonation(session_id, admin_id).await })
            })
            .collect();
        let mut ok = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                ok += 1;
            }
        }
        assert_eq!(ok, 1);
        let ended = h
            .audit
            .entries()
            .await
            .into_iter()
            .filter(|e| e.action == AuditAction::ImpersonationEnded)
            .count();
        assert_eq!(ended, 1);
    }

    #[tokio::test]
    async fn unaudited_end_leaves_session_active() {
        let h = harness().await;
        let admin = caller(true);
        let grant = h
            .manager
            .start_impersonation(&admin, h.tenant.id, h.target.id, "debug", 15)
            .await
            .unwrap();
        let session_id = grant.impersonation_session_id.unwrap();

        h.audit_down.store(true, Ordering::SeqCst);
        assert!(matches!(
            h.manager.end_impersonation(session_id, admin.subject_id).await,
            Err(AuthError::Internal(_))
        ));
        assert!(h.manager.is_session_active(session_id).await.unwrap());

        h.audit_down.store(false, Ordering::SeqCst);
        h.manager
            .end_impersonation(session_id, admin.subject_id)
            .await
            .unwrap();
        assert!(!h.manager.is_session_active(session_id).await.unwrap());
        let ended = h
            .audit
            .entries()
            .await
            .into_iter()
            .filter(|e| e.action == AuditAction::ImpersonationEnded)
            .count();
        assert_eq!(ended, 1);
    }

    #[tokio::test]
    async fn delegated_callers_cannot_delegate() {
        let h = harness().await;
        let mut delegated = caller(true);
        delegated.access_type = AccessType::SecureLogin;
        delegated.tenant_context = Some(h.tenant.id);
        assert!(matches!(
            h.manager.secure_login(&delegated, h.tenant.id, 10, "x").await,
            Err(AuthError::Forbidden(_))
        ));
    }
}
