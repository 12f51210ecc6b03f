//! Credential validation against the platform or a tenant identity store.

use anyhow::anyhow;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString};
use rand::rngs::OsRng;
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::claims::{IdentityScope, Principal};
use super::error::{AuthError, AuthResult};
use super::stores::IdentityStore;
use super::utils::normalize_email;

#[derive(Clone)]
pub struct CredentialValidator {
    identities: Arc<dyn IdentityStore>,
}

impl CredentialValidator {
    #[must_use]
    pub fn new(identities: Arc<dyn IdentityStore>) -> Self {
        Self { identities }
    }

    /// Resolve the principal for a login.
    ///
    /// With a tenant context only that tenant's store is consulted; a miss there
    /// for an email that exists on the platform is reported as
    /// `PlatformUserDirectLoginBlocked`, whatever the password. Without a tenant
    /// context only the platform store is consulted.
    ///
    /// # Errors
    /// `InvalidCredentials`, `PlatformUserDirectLoginBlocked`, or `Internal` on
    /// store failures.
    #[instrument(skip(self, password))]
    pub async fn validate(
        &self,
        email: &str,
        password: &str,
        tenant_context: Option<Uuid>,
    ) -> AuthResult<Principal> {
        let email = normalize_email(email);
        let scope = tenant_context.map_or(IdentityScope::Platform, IdentityScope::Tenant);

        let Some(principal) = self.identities.find_by_email(scope, &email).await? else {
            if tenant_context.is_some()
                && self
                    .identities
                    .find_by_email(IdentityScope::Platform, &email)
                    .await?
                    .is_some()
            {
                return Err(AuthError::PlatformUserDirectLoginBlocked);
            }
            debug!("no principal for email in selected store");
            return Err(AuthError::InvalidCredentials);
        };

        if verify_password(password, &principal.password_hash) {
            Ok(principal)
        } else {
            Err(AuthError::InvalidCredentials)
        }
    }
}

/// Compare a password with a stored Argon2 PHC string. Unparseable hashes never match.
#[must_use]
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    PasswordHash::new(stored_hash).is_ok_and(|parsed| {
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    })
}

/// Hash a password into an Argon2id PHC string.
///
/// # Errors
/// Returns an error if hashing fails.
pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|_| anyhow!("failed to hash password"))
}
