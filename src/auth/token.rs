//! Token issuance and verification (HS256).
//!
//! The signature carries its own `iat`/`exp`/`iss`. Delegated claims add an
//! `expiresAt` of their own, which must end strictly before the signature does.

use anyhow::anyhow;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use super::claims::{RawClaims, SessionClaims};
use super::error::{AuthError, AuthResult};

pub const DEFAULT_TOKEN_TTL_SECONDS: i64 = 24 * 60 * 60;
pub const DEFAULT_ISSUER: &str = "warden";

/// Signed payload: the claims plus the registered JWT fields.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Envelope {
    #[serde(flatten)]
    pub(crate) claims: RawClaims,
    pub(crate) iat: i64,
    pub(crate) exp: i64,
    pub(crate) iss: String,
}

#[derive(Clone)]
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    ttl: Duration,
}

impl TokenIssuer {
    #[must_use]
    pub fn new(secret: &SecretString, issuer: impl Into<String>, ttl_seconds: i64) -> Self {
        let secret = secret.expose_secret().as_bytes();
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            issuer: issuer.into(),
            ttl: Duration::seconds(ttl_seconds.max(1)),
        }
    }

    /// Signature expiry for a token signed at `now`.
    #[must_use]
    pub fn signature_expiry(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + self.ttl
    }

    /// Sign claims as of now.
    ///
    /// # Errors
    /// Returns `AuthError::Internal` if delegated claims lack an `expiresAt`
    /// before the signature expiry, or if encoding fails.
    pub fn sign(&self, claims: &SessionClaims) -> AuthResult<String> {
        self.sign_at(claims, Utc::now())
    }

    /// Sign claims with an explicit issue time.
    ///
    /// # Errors
    /// See [`TokenIssuer::sign`].
    pub fn sign_at(&self, claims: &SessionClaims, now: DateTime<Utc>) -> AuthResult<String> {
        let exp = self.signature_expiry(now).timestamp();
        if claims.access_type.is_delegated() {
            match claims.expires_at {
                Some(expires_at) if expires_at < exp => {}
                Some(_) => {
                    return Err(anyhow!("delegated expiresAt must precede token expiry").into());
                }
                None => return Err(anyhow!("delegated claims require expiresAt").into()),
            }
        }

        let envelope = Envelope {
            claims: RawClaims::from(claims),
            iat: now.timestamp(),
            exp,
            iss: self.issuer.clone(),
        };
        debug!(subject = %claims.subject_id, access_type = claims.access_type.as_str(), exp, "signing token");
        encode(&Header::new(Algorithm::HS256), &envelope, &self.encoding).map_err(|err| {
            error!("Failed to sign token: {err}");
            AuthError::Internal(anyhow!("token signing failed: {err}"))
        })
    }

    /// Check signature, issuer and signature expiry, returning the raw claims.
    ///
    /// # Errors
    /// `TokenExpired` when the signature expired, `InvalidToken` for anything
    /// else.
    pub fn verify(&self, token: &str) -> AuthResult<RawClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss"]);

        let data = decode::<Envelope>(token, &self.decoding, &validation).map_err(|err| {
            debug!("token rejected: {err}");
            match err.kind() {
                ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                ErrorKind::InvalidIssuer => AuthError::InvalidToken("issuer"),
                ErrorKind::InvalidSignature => AuthError::InvalidToken("signature"),
                ErrorKind::MissingRequiredClaim(_) => AuthError::InvalidToken("missing claim"),
                _ => AuthError::InvalidToken("malformed"),
            }
        })?;
        Ok(data.claims.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::claims::{AccessType, Principal};
    use uuid::Uuid;

    fn issuer() -> TokenIssuer {
        TokenIssuer::new(
            &SecretString::from("test-secret-test-secret-test-secret".to_string()),
            DEFAULT_ISSUER,
            3600,
        )
    }

    fn claims() -> SessionClaims {
        let principal = Principal {
            id: Uuid::new_v4(),
            email: "alice@example.com".to_string(),
            display_name: "Alice".to_string(),
            is_super_admin: false,
            password_hash: String::new(),
            roles: vec!["member".to_string()],
            permissions: Vec::new(),
        };
        SessionClaims::direct(&principal, Some(Uuid::new_v4()))
    }

    #[test]
    fn sign_then_verify_preserves_claims() -> Result<(), AuthError> {
        let issuer = issuer();
        let claims = claims();
        let token = issuer.sign(&claims)?;
        let verified = SessionClaims::try_from(issuer.verify(&token)?)?;
        assert_eq!(verified, claims);
        Ok(())
    }

    #[test]
    fn expired_signature_is_token_expired() -> Result<(), AuthError> {
        let issuer = issuer();
        let token = issuer.sign_at(&claims(), Utc::now() - Duration::hours(2))?;
        assert!(matches!(issuer.verify(&token), Err(AuthError::TokenExpired)));
        Ok(())
    }

    #[test]
    fn foreign_key_or_issuer_is_invalid() -> Result<(), AuthError> {
        let token = issuer().sign(&claims())?;
        let other_key = TokenIssuer::new(
            &SecretString::from("another-secret-another-secret".to_string()),
            DEFAULT_ISSUER,
            3600,
        );
        assert!(matches!(
            other_key.verify(&token),
            Err(AuthError::InvalidToken("signature"))
        ));

        let other_issuer = TokenIssuer::new(
            &SecretString::from("test-secret-test-secret-test-secret".to_string()),
            "someone-else",
            3600,
        );
        assert!(matches!(
            other_issuer.verify(&token),
            Err(AuthError::InvalidToken("issuer"))
        ));
        assert!(matches!(
            issuer().verify("not.a.token"),
            Err(AuthError::InvalidToken(_))
        ));
        Ok(())
    }

    #[test]
    fn delegated_claims_need_expiry_before_signature() {
        let issuer = issuer();
        let now = Utc::now();
        let mut delegated = claims();
        delegated.access_type = AccessType::SecureLogin;

        assert!(issuer.sign_at(&delegated, now).is_err());

        delegated.expires_at = Some(issuer.signature_expiry(now).timestamp());
        assert!(issuer.sign_at(&delegated, now).is_err());

        delegated.expires_at = Some((now + Duration::minutes(30)).timestamp());
        assert!(issuer.sign_at(&delegated, now).is_ok());
    }
}
