//! The exposed auth operations, wiring the components together.

use secrecy::SecretString;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use super::AuthConfig;
use super::audit::{AuditAction, AuditEntry, AuditSink, AuditTrail};
use super::claims::SessionClaims;
use super::credentials::CredentialValidator;
use super::delegation::{
    DelegationConfig, DelegationGrant, DelegationManager, session::ImpersonationStore,
};
use super::error::{AuthError, AuthResult};
use super::guard::TokenGuard;
use super::stores::{IdentityStore, PermissionStore, Tenant, TenantDirectory, TenantLookup};
use super::token::TokenIssuer;
use super::two_factor::{
    TwoFactorBroker, TwoFactorStatus,
    backup_codes::BackupCodeProvider,
    factor_store::FactorStore,
    methods::{MethodRegistry, MethodSetup, TwoFactorMethod},
    session_store::{CounterStore, SessionStore},
    totp::TotpProvider,
};

/// Storage the auth core depends on.
#[derive(Clone)]
pub struct AuthBackends {
    pub identities: Arc<dyn IdentityStore>,
    pub tenants: Arc<dyn TenantDirectory>,
    pub permissions: Arc<dyn PermissionStore>,
    pub impersonations: Arc<dyn ImpersonationStore>,
    pub pending_sessions: Arc<dyn SessionStore>,
    pub counters: Arc<dyn CounterStore>,
    pub factors: Arc<dyn FactorStore>,
    pub audit: Arc<dyn AuditSink>,
}

#[derive(Clone, Debug)]
pub struct AuthSecrets {
    pub token_secret: SecretString,
    pub backup_code_pepper: SecretString,
}

#[derive(Clone, Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct IssuedToken {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

#[derive(Clone, Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TwoFactorChallenge {
    pub requires_two_factor: bool,
    pub session_id: String,
    pub available_methods: Vec<TwoFactorMethod>,
}

#[derive(Clone, Debug, Serialize, ToSchema)]
#[serde(untagged)]
pub enum LoginOutcome {
    Authenticated(IssuedToken),
    TwoFactorRequired(TwoFactorChallenge),
}

#[derive(Clone)]
pub struct AuthService {
    config: AuthConfig,
    tenants: Arc<dyn TenantDirectory>,
    validator: CredentialValidator,
    broker: TwoFactorBroker,
    issuer: TokenIssuer,
    delegation: DelegationManager,
    guard: TokenGuard,
    audit: AuditTrail,
}

impl AuthService {
    #[must_use]
    pub fn new(config: AuthConfig, secrets: &AuthSecrets, backends: AuthBackends) -> Self {
        let issuer = TokenIssuer::new(
            &secrets.token_secret,
            config.token_issuer(),
            config.token_ttl_seconds(),
        );
        let audit = AuditTrail::new(backends.audit.clone());

        let registry = MethodRegistry::new()
            .with_provider(Arc::new(TotpProvider::new(
                backends.factors.clone(),
                config.totp_issuer(),
            )))
            .with_provider(Arc::new(
                BackupCodeProvider::new(
                    backends.factors.clone(),
                    secrets.backup_code_pepper.clone(),
                )
                .with_params(config.backup_code_params().clone()),
            ));
        let broker = TwoFactorBroker::new(
            config.two_factor(),
            registry,
            backends.pending_sessions.clone(),
            backends.counters.clone(),
        );

        let delegation = DelegationManager::new(
            DelegationConfig::new(config.frontend_base_url().clone())
                .with_max_minutes(config.max_delegation_minutes()),
            backends.identities.clone(),
            backends.tenants.clone(),
            backends.permissions.clone(),
            backends.impersonations.clone(),
            audit.clone(),
            issuer.clone(),
        );

        let mut guard = TokenGuard::new(issuer.clone(), audit.clone());
        if config.impersonation_revocation() {
            guard = guard.with_revocation(backends.impersonations.clone());
        }

        Self {
            validator: CredentialValidator::new(backends.identities),
            tenants: backends.tenants,
            config,
            broker,
            issuer,
            delegation,
            guard,
            audit,
        }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn guard(&self) -> &TokenGuard {
        &self.guard
    }

    #[must_use]
    pub fn audit(&self) -> &AuditTrail {
        &self.audit
    }

    /// Password login, optionally scoped to a tenant.
    ///
    /// # Errors
    /// Credential errors from the validator; `Internal` on store failures.
    #[instrument(skip(self, password))]
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        tenant_context: Option<Uuid>,
        client_ip: Option<&str>,
    ) -> AuthResult<LoginOutcome> {
        let principal = match self.validator.validate(email, password, tenant_context).await {
            Ok(principal) => principal,
            Err(AuthError::PlatformUserDirectLoginBlocked) => {
                warn!(
                    ip = client_ip.unwrap_or("-"),
                    tenant = ?tenant_context,
                    "platform identity attempted direct tenant login"
                );
                self.audit
                    .record(
                        AuditEntry::new(
                            email.trim().to_lowercase(),
                            AuditAction::DirectLoginBlocked,
                            "/v1/auth/login",
                        )
                        .tenant(tenant_context)
                        .denied()
                        .reason(client_ip.map_or_else(String::new, |ip| format!("ip {ip}"))),
                    )
                    .await?;
                return Err(AuthError::PlatformUserDirectLoginBlocked);
            }
            Err(err) => {
                warn!(ip = client_ip.unwrap_or("-"), tenant = ?tenant_context, "login failed: {err}");
                return Err(err);
            }
        };

        let claims = SessionClaims::direct(&principal, tenant_context);
        let status = self.broker.status(principal.id).await?;
        if status.enabled {
            let session_id = self
                .broker
                .create_session(&principal, claims, tenant_context)
                .await?;
            info!(user = %principal.id, "login awaiting second factor");
            return Ok(LoginOutcome::TwoFactorRequired(TwoFactorChallenge {
                requires_two_factor: true,
                session_id,
                available_methods: status.available_methods,
            }));
        }

        info!(user = %principal.id, "login succeeded");
        Ok(LoginOutcome::Authenticated(self.issue(&claims)?))
    }

    /// Complete a login that required a second factor.
    ///
    /// # Errors
    /// Broker errors, see [`TwoFactorBroker::verify_login_code`].
    pub async fn verify_two_factor(
        &self,
        session_id: &str,
        code: &str,
        method: Option<TwoFactorMethod>,
    ) -> AuthResult<IssuedToken> {
        let claims = self.broker.verify_login_code(session_id, code, method).await?;
        self.issue(&claims)
    }

    /// # Errors
    /// See [`DelegationManager::secure_login`].
    pub async fn secure_login(
        &self,
        caller: &SessionClaims,
        tenant_id: Uuid,
        duration_minutes: i64,
        reason: &str,
    ) -> AuthResult<DelegationGrant> {
        self.delegation
            .secure_login(caller, tenant_id, duration_minutes, reason)
            .await
    }

    /// # Errors
    /// See [`DelegationManager::start_impersonation`].
    pub async fn start_impersonation(
        &self,
        caller: &SessionClaims,
        tenant_id: Uuid,
        target_user_id: Uuid,
        reason: &str,
        duration_minutes: i64,
    ) -> AuthResult<DelegationGrant> {
        self.delegation
            .start_impersonation(caller, tenant_id, target_user_id, reason, duration_minutes)
            .await
    }

    /// End an impersonation. The session defaults to the one carried by the
    /// caller's token.
    ///
    /// # Errors
    /// `NotFound` without a session id, otherwise see
    /// [`DelegationManager::end_impersonation`].
    pub async fn end_impersonation(
        &self,
        caller: &SessionClaims,
        session_id: Option<Uuid>,
    ) -> AuthResult<String> {
        let session_id = session_id
            .or(caller.impersonation_session_id)
            .ok_or(AuthError::NotFound("impersonation session"))?;
        self.delegation
            .end_impersonation(session_id, caller.acting_user_id())
            .await
    }

    /// Resolve a tenant reference (id or subdomain). Unknown and inactive
    /// tenants are both `InvalidTenant`.
    ///
    /// # Errors
    /// `InvalidTenant`, or `Internal` on directory failures.
    pub async fn resolve_tenant(&self, reference: &str) -> AuthResult<Tenant> {
        match self
            .tenants
            .find_tenant(TenantLookup::parse(reference.trim()))
            .await?
        {
            Some(tenant) if tenant.is_active => Ok(tenant),
            _ => Err(AuthError::InvalidTenant),
        }
    }

    /// # Errors
    /// `Internal` on store failures.
    pub async fn two_factor_status(&self, user_id: Uuid) -> AuthResult<TwoFactorStatus> {
        self.broker.status(user_id).await
    }

    /// # Errors
    /// See [`TwoFactorBroker::setup`].
    pub async fn setup_two_factor(
        &self,
        method: TwoFactorMethod,
        user_id: Uuid,
        email: &str,
    ) -> AuthResult<MethodSetup> {
        self.broker.setup(method, user_id, email).await
    }

    /// # Errors
    /// See [`TwoFactorBroker::confirm`].
    pub async fn confirm_two_factor(
        &self,
        method: TwoFactorMethod,
        user_id: Uuid,
        code: &str,
    ) -> AuthResult<()> {
        self.broker.confirm(method, user_id, code).await
    }

    /// # Errors
    /// See [`TwoFactorBroker::disable`].
    pub async fn disable_two_factor(&self, method: TwoFactorMethod, user_id: Uuid) -> AuthResult<()> {
        self.broker.disable(method, user_id).await
    }

    fn issue(&self, claims: &SessionClaims) -> AuthResult<IssuedToken> {
        Ok(IssuedToken {
            access_token: self.issuer.sign(claims)?,
            token_type: "Bearer".to_string(),
            expires_in: self.config.token_ttl_seconds(),
        })
    }
}
