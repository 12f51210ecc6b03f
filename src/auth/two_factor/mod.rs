//! Two-factor session broker.
//!
//! A login that needs a second factor does not get a token. Instead the
//! broker stores a pending session holding the draft claims and hands back
//! its id. Verifying a code against that id releases the claims exactly once.

pub mod backup_codes;
pub mod factor_store;
pub mod methods;
pub mod session_store;
pub mod totp;

use chrono::{Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use super::claims::{Principal, SessionClaims};
use super::error::{AuthError, AuthResult};
use super::utils::random_token;
use methods::{MethodRegistry, MethodSetup, TwoFactorMethod};
use session_store::{CounterDecision, CounterStore, PendingTwoFactorSession, SessionStore};

const DEFAULT_SESSION_TTL_SECONDS: i64 = 5 * 60;
const DEFAULT_MAX_ATTEMPTS: u32 = 5;

#[derive(Clone, Copy, Debug)]
pub struct TwoFactorConfig {
    session_ttl: Duration,
    max_attempts: u32,
}

impl TwoFactorConfig {
    /// Five minute pending sessions, five verification attempts.
    #[must_use]
    pub fn new() -> Self {
        Self {
            session_ttl: Duration::seconds(DEFAULT_SESSION_TTL_SECONDS),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, seconds: i64) -> Self {
        self.session_ttl = Duration::seconds(seconds.max(0));
        self
    }

    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    #[must_use]
    pub fn session_ttl(&self) -> Duration {
        self.session_ttl
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

impl Default for TwoFactorConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TwoFactorStatus {
    pub enabled: bool,
    pub available_methods: Vec<TwoFactorMethod>,
}

#[derive(Clone)]
pub struct TwoFactorBroker {
    config: TwoFactorConfig,
    registry: MethodRegistry,
    sessions: Arc<dyn SessionStore>,
    counters: Arc<dyn CounterStore>,
}

impl TwoFactorBroker {
    #[must_use]
    pub fn new(
        config: TwoFactorConfig,
        registry: MethodRegistry,
        sessions: Arc<dyn SessionStore>,
        counters: Arc<dyn CounterStore>,
    ) -> Self {
        Self {
            config,
            registry,
            sessions,
            counters,
        }
    }

    /// Methods the user has enrolled.
    ///
    /// # Errors
    /// Returns `AuthError::Internal` if a provider cannot reach its store.
    pub async fn status(&self, user_id: Uuid) -> AuthResult<TwoFactorStatus> {
        let mut available_methods = Vec::new();
        for provider in self.registry.providers() {
            if provider.is_enabled(user_id).await? {
                available_methods.push(provider.method());
            }
        }
        Ok(TwoFactorStatus {
            enabled: !available_methods.is_empty(),
            available_methods,
        })
    }

    /// Park draft claims behind a fresh pending session and return its id.
    ///
    /// # Errors
    /// Returns `AuthError::Internal` if the session store fails.
    #[instrument(skip_all, fields(user_id = %principal.id))]
    pub async fn create_session(
        &self,
        principal: &Principal,
        payload: SessionClaims,
        tenant_context: Option<Uuid>,
    ) -> AuthResult<String> {
        let session = PendingTwoFactorSession {
            id: random_token(),
            user_id: principal.id,
            email: principal.email.clone(),
            name: principal.display_name.clone(),
            payload,
            tenant_context,
            created_at: Utc::now(),
        };
        let id = session.id.clone();
        self.sessions.put(session, self.config.session_ttl).await?;
        debug!("pending two-factor session created");
        Ok(id)
    }

    /// Verify a login code and release the draft claims.
    ///
    /// When `method` is absent it is inferred from the shape of the code.
    ///
    /// # Errors
    /// - `SessionNotFound` if the session does not exist or another attempt holds it.
    /// - `TwoFactorSessionExpired` if it outlived its TTL; it is removed.
    /// - `TooManyAttempts` once the attempt budget is spent; it is removed.
    /// - `UnsupportedMethod` if no provider is registered for the method.
    /// - Provider errors such as `InvalidTwoFactorCode` or `BackupCodeAlreadyUsed`.
    #[instrument(skip_all)]
    pub async fn verify_login_code(
        &self,
        session_id: &str,
        code: &str,
        method: Option<TwoFactorMethod>,
    ) -> AuthResult<SessionClaims> {
        let session = self
            .sessions
            .get(session_id)
            .await?
            .ok_or(AuthError::SessionNotFound)?;
        let attempts_key = attempts_key(session_id);

        if session.is_expired(self.config.session_ttl, Utc::now()) {
            self.sessions.take(session_id).await?;
            self.counters.reset(&attempts_key).await?;
            return Err(AuthError::TwoFactorSessionExpired);
        }

        let decision = self
            .counters
            .check_and_increment(&attempts_key, self.config.max_attempts, self.config.session_ttl)
            .await?;
        if decision == CounterDecision::Limited {
            warn!(user_id = %session.user_id, "two-factor attempt budget exhausted");
            self.sessions.take(session_id).await?;
            self.counters.reset(&attempts_key).await?;
            return Err(AuthError::TooManyAttempts);
        }

        let method = method.unwrap_or_else(|| TwoFactorMethod::infer(code));
        let provider = self
            .registry
            .get(method)
            .ok_or_else(|| AuthError::UnsupportedMethod(method.to_string()))?;

        // Claim the session before checking the code so a code is accepted once.
        let Some(session) = self.sessions.take(session_id).await? else {
            return Err(AuthError::SessionNotFound);
        };
        if let Err(err) = provider.verify(session.user_id, code).await {
            debug!(user_id = %session.user_id, %method, "two-factor code rejected: {err}");
            self.sessions.put(session, self.config.session_ttl).await?;
            return Err(err);
        }

        self.counters.reset(&attempts_key).await?;
        info!(user_id = %session.user_id, %method, "two-factor verification succeeded");
        Ok(session.payload)
    }

    /// Start enrolling a method.
    ///
    /// # Errors
    /// `UnsupportedMethod` for unregistered methods, otherwise provider errors.
    pub async fn setup(
        &self,
        method: TwoFactorMethod,
        user_id: Uuid,
        email: &str,
    ) -> AuthResult<MethodSetup> {
        self.provider(method)?.setup(user_id, email).await
    }

    /// # Errors
    /// `UnsupportedMethod` for unregistered methods, otherwise provider errors.
    pub async fn confirm(&self, method: TwoFactorMethod, user_id: Uuid, code: &str) -> AuthResult<()> {
        self.provider(method)?.confirm(user_id, code).await
    }

    /// # Errors
    /// `UnsupportedMethod` for unregistered methods, otherwise provider errors.
    pub async fn disable(&self, method: TwoFactorMethod, user_id: Uuid) -> AuthResult<()> {
        self.provider(method)?.disable(user_id).await
    }

    fn provider(
        &self,
        method: TwoFactorMethod,
    ) -> AuthResult<Arc<dyn methods::MethodProvider>> {
        self.registry
            .get(method)
            .ok_or_else(|| AuthError::UnsupportedMethod(method.to_string()))
    }
}

fn attempts_key(session_id: &str) -> String {
    format!("2fa:attempts:{session_id}")
}
