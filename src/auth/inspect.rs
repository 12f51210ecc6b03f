//! Unverified token decoding for diagnostics.
//!
//! Nothing here checks a signature or an expiry. The request guard never
//! imports this module; use it only to look at a token you already hold for
//! logging or support tooling.

use jsonwebtoken::{DecodingKey, Validation, decode};
use std::collections::HashSet;

use super::claims::RawClaims;
use super::error::{AuthError, AuthResult};
use super::token::Envelope;

/// Decode the claims of a token without verifying it.
///
/// # Errors
/// `InvalidToken` if the token is not a structurally valid JWT.
pub fn decode_unsafe(token: &str) -> AuthResult<RawClaims> {
    let mut validation = Validation::default();
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.required_spec_claims = HashSet::new();

    decode::<Envelope>(token, &DecodingKey::from_secret(&[]), &validation)
        .map(|data| data.claims.claims)
        .map_err(|_| AuthError::InvalidToken("malformed"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::claims::{Principal, SessionClaims};
    use crate::auth::token::TokenIssuer;
    use chrono::{Duration, Utc};
    use secrecy::SecretString;
    use uuid::Uuid;

    #[test]
    fn decodes_expired_and_foreign_tokens() -> Result<(), AuthError> {
        let principal = Principal {
            id: Uuid::new_v4(),
            email: "alice@example.com".to_string(),
            display_name: "Alice".to_string(),
            is_super_admin: false,
            password_hash: String::new(),
            roles: Vec::new(),
            permissions: Vec::new(),
        };
        let issuer = TokenIssuer::new(&SecretString::from("k".repeat(32)), "warden", 60);
        let token = issuer.sign_at(
            &SessionClaims::direct(&principal, None),
            Utc::now() - Duration::hours(1),
        )?;

        let raw = decode_unsafe(&token)?;
        assert_eq!(raw.subject_id, Some(principal.id.to_string()));
        assert!(matches!(issuer.verify(&token), Err(AuthError::TokenExpired)));
        Ok(())
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(decode_unsafe("garbage").is_err());
    }
}
