//! Authentication and delegated-access core.
//!
//! Flow Overview: the credential validator resolves a principal from the
//! platform store or one tenant's store. If the principal has a second factor
//! enrolled, the two-factor broker parks the draft claims in a pending session
//! until a code is verified. Otherwise the token issuer signs them directly.
//! Delegation (secure login, impersonation) also goes through the issuer after
//! a permission check and an audit entry. Every later request is re-validated
//! by the guard from the token alone.

pub mod audit;
pub mod claims;
pub mod credentials;
pub mod delegation;
pub mod error;
pub mod guard;
pub mod inspect;
pub mod postgres;
pub mod service;
pub mod stores;
pub mod token;
pub mod two_factor;
pub(crate) mod utils;

pub use error::{AuthError, AuthResult};
pub use service::{AuthBackends, AuthSecrets, AuthService, LoginOutcome};

use url::Url;

use token::{DEFAULT_ISSUER, DEFAULT_TOKEN_TTL_SECONDS};
use two_factor::TwoFactorConfig;

const DEFAULT_MAX_DELEGATION_MINUTES: i64 = 480;
const DEFAULT_TOTP_ISSUER: &str = "Warden";

#[derive(Clone, Debug)]
pub struct AuthConfig {
    frontend_base_url: Url,
    token_issuer: String,
    token_ttl_seconds: i64,
    two_factor: TwoFactorConfig,
    max_delegation_minutes: i64,
    totp_issuer: String,
    backup_code_params: argon2::Params,
    impersonation_revocation: bool,
}

impl AuthConfig {
    #[must_use]
    pub fn new(frontend_base_url: Url) -> Self {
        Self {
            frontend_base_url,
            token_issuer: DEFAULT_ISSUER.to_string(),
            token_ttl_seconds: DEFAULT_TOKEN_TTL_SECONDS,
            two_factor: TwoFactorConfig::new(),
            max_delegation_minutes: DEFAULT_MAX_DELEGATION_MINUTES,
            totp_issuer: DEFAULT_TOTP_ISSUER.to_string(),
            backup_code_params: argon2::Params::default(),
            impersonation_revocation: true,
        }
    }

    #[must_use]
    pub fn with_token_issuer(mut self, issuer: String) -> Self {
        self.token_issuer = issuer;
        self
    }

    #[must_use]
    pub fn with_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_two_factor(mut self, two_factor: TwoFactorConfig) -> Self {
        self.two_factor = two_factor;
        self
    }

    #[must_use]
    pub fn with_max_delegation_minutes(mut self, minutes: i64) -> Self {
        self.max_delegation_minutes = minutes;
        self
    }

    #[must_use]
    pub fn with_totp_issuer(mut self, issuer: String) -> Self {
        self.totp_issuer = issuer;
        self
    }

    /// Argon2 cost for backup code hashes.
    #[must_use]
    pub fn with_backup_code_params(mut self, params: argon2::Params) -> Self {
        self.backup_code_params = params;
        self
    }

    /// Whether the guard checks impersonation sessions against the store.
    #[must_use]
    pub fn with_impersonation_revocation(mut self, enabled: bool) -> Self {
        self.impersonation_revocation = enabled;
        self
    }

    #[must_use]
    pub fn frontend_base_url(&self) -> &Url {
        &self.frontend_base_url
    }

    /// Host that tenant subdomains hang off.
    #[must_use]
    pub fn frontend_host(&self) -> &str {
        self.frontend_base_url.host_str().unwrap_or("localhost")
    }

    #[must_use]
    pub fn token_issuer(&self) -> &str {
        &self.token_issuer
    }

    #[must_use]
    pub fn token_ttl_seconds(&self) -> i64 {
        self.token_ttl_seconds
    }

    #[must_use]
    pub fn two_factor(&self) -> TwoFactorConfig {
        self.two_factor
    }

    #[must_use]
    pub fn max_delegation_minutes(&self) -> i64 {
        self.max_delegation_minutes
    }

    #[must_use]
    pub fn totp_issuer(&self) -> &str {
        &self.totp_issuer
    }

    #[must_use]
    pub fn backup_code_params(&self) -> &argon2::Params {
        &self.backup_code_params
    }

    #[must_use]
    pub fn impersonation_revocation(&self) -> bool {
        self.impersonation_revocation
    }

    /// Only mark cookies secure when the frontend is served over HTTPS.
    #[must_use]
    pub fn session_cookie_secure(&self) -> bool {
        self.frontend_base_url.scheme() == "https"
    }
}
