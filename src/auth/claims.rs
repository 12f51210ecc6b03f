//! Principals, session claims and the request-scoped authenticated principal.
//!
//! Claims travel in two shapes: `RawClaims` is the loosely typed wire form
//! carried inside the signed token, and `SessionClaims` is the structurally
//! validated form the rest of the crate works with. Conversion between the two
//! is the guard's structural check.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;
use uuid::Uuid;

use super::{error::AuthError, utils::valid_email};

/// Which identity store a principal was resolved from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IdentityScope {
    Platform,
    Tenant(Uuid),
}

/// A resolved identity with its stored password hash.
#[derive(Clone)]
pub struct Principal {
    pub id: Uuid,
    pub email: String,
    pub display_name: String,
    pub is_super_admin: bool,
    pub password_hash: String,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
}

impl fmt::Debug for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Principal")
            .field("id", &self.id)
            .field("email", &self.email)
            .field("display_name", &self.display_name)
            .field("is_super_admin", &self.is_super_admin)
            .field("password_hash", &"[redacted]")
            .field("roles", &self.roles)
            .field("permissions", &self.permissions)
            .finish()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AccessType {
    DirectAccess,
    SecureLogin,
    Impersonation,
}

impl AccessType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DirectAccess => "direct_access",
            Self::SecureLogin => "secure_login",
            Self::Impersonation => "impersonation",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "direct_access" => Some(Self::DirectAccess),
            "secure_login" => Some(Self::SecureLogin),
            "impersonation" => Some(Self::Impersonation),
            _ => None,
        }
    }

    /// Delegated access always carries its own `expiresAt`.
    #[must_use]
    pub fn is_delegated(self) -> bool {
        !matches!(self, Self::DirectAccess)
    }
}

/// Claims as carried on the wire. Every field is optional so a malformed token
/// can still be decoded and then rejected by the structural check.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawClaims {
    #[serde(rename = "sub", skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_super_admin: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_context: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub impersonated_user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub impersonation_session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permissions: Vec<String>,
}

/// Structurally valid claims.
#[derive(Clone, Debug, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionClaims {
    pub subject_id: Uuid,
    pub email: String,
    pub name: String,
    pub is_super_admin: bool,
    pub tenant_context: Option<Uuid>,
    pub access_type: AccessType,
    /// Unix seconds.
    pub expires_at: Option<i64>,
    pub original_user_id: Option<Uuid>,
    pub impersonated_user_id: Option<Uuid>,
    pub impersonation_session_id: Option<Uuid>,
    pub reason: Option<String>,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
}

impl SessionClaims {
    /// Claims for a principal that authenticated with its own credentials.
    #[must_use]
    pub fn direct(principal: &Principal, tenant_context: Option<Uuid>) -> Self {
        Self {
            subject_id: principal.id,
            email: principal.email.clone(),
            name: principal.display_name.clone(),
            is_super_admin: principal.is_super_admin,
            tenant_context,
            access_type: AccessType::DirectAccess,
            expires_at: None,
            original_user_id: None,
            impersonated_user_id: None,
            impersonation_session_id: None,
            reason: None,
            roles: principal.roles.clone(),
            permissions: principal.permissions.clone(),
        }
    }

    /// The identity that is actually holding the token: the admin behind an
    /// impersonation, otherwise the subject.
    #[must_use]
    pub fn acting_user_id(&self) -> Uuid {
        self.original_user_id.unwrap_or(self.subject_id)
    }
}

impl From<&SessionClaims> for RawClaims {
    fn from(claims: &SessionClaims) -> Self {
        Self {
            subject_id: Some(claims.subject_id.to_string()),
            email: Some(claims.email.clone()),
            name: Some(claims.name.clone()),
            is_super_admin: claims.is_super_admin,
            tenant_context: claims.tenant_context.map(|id| id.to_string()),
            access_type: Some(claims.access_type.as_str().to_string()),
            expires_at: claims.expires_at,
            original_user_id: claims.original_user_id.map(|id| id.to_string()),
            impersonated_user_id: claims.impersonated_user_id.map(|id| id.to_string()),
            impersonation_session_id: claims.impersonation_session_id.map(|id| id.to_string()),
            reason: claims.reason.clone(),
            roles: claims.roles.clone(),
            permissions: claims.permissions.clone(),
        }
    }
}

impl TryFrom<RawClaims> for SessionClaims {
    type Error = AuthError;

    fn try_from(raw: RawClaims) -> Result<Self, Self::Error> {
        let subject_id = raw
            .subject_id
            .as_deref()
            .and_then(|value| Uuid::parse_str(value).ok())
            .ok_or(AuthError::InvalidToken("subject"))?;
        let email = raw
            .email
            .filter(|email| valid_email(email))
            .ok_or(AuthError::InvalidToken("email"))?;
        let access_type = match raw.access_type.as_deref() {
            None => AccessType::DirectAccess,
            Some(value) => AccessType::parse(value).ok_or(AuthError::InvalidToken("access type"))?,
        };

        Ok(Self {
            subject_id,
            name: raw.name.unwrap_or_else(|| email.clone()),
            email,
            is_super_admin: raw.is_super_admin,
            tenant_context: optional_uuid(raw.tenant_context, "tenant context")?,
            access_type,
            expires_at: raw.expires_at,
            original_user_id: optional_uuid(raw.original_user_id, "original user")?,
            impersonated_user_id: optional_uuid(raw.impersonated_user_id, "impersonated user")?,
            impersonation_session_id: optional_uuid(
                raw.impersonation_session_id,
                "impersonation session",
            )?,
            reason: raw.reason,
            roles: raw.roles,
            permissions: raw.permissions,
        })
    }
}

fn optional_uuid(value: Option<String>, field: &'static str) -> Result<Option<Uuid>, AuthError> {
    value
        .map(|value| Uuid::parse_str(&value).map_err(|_| AuthError::InvalidToken(field)))
        .transpose()
}

/// Claims plus guard enrichment. Built fresh for every request.
#[derive(Clone, Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatedPrincipal {
    #[serde(flatten)]
    pub claims: SessionClaims,
    pub is_token_valid: bool,
    pub is_session_valid: bool,
    pub last_validated: DateTime<Utc>,
}

impl AuthenticatedPrincipal {
    #[must_use]
    pub fn new(claims: SessionClaims, now: DateTime<Utc>) -> Self {
        Self {
            claims,
            is_token_valid: true,
            is_session_valid: true,
            last_validated: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw() -> RawClaims {
        RawClaims {
            subject_id: Some(Uuid::new_v4().to_string()),
            email: Some("alice@example.com".to_string()),
            name: Some("Alice".to_string()),
            ..RawClaims::default()
        }
    }

    #[test]
    fn missing_access_type_defaults_to_direct_access() -> Result<(), AuthError> {
        let claims = SessionClaims::try_from(raw())?;
        assert_eq!(claims.access_type, AccessType::DirectAccess);
        assert_eq!(claims.name, "Alice");
        Ok(())
    }

    #[test]
    fn unknown_access_type_is_rejected() {
        let mut raw = raw();
        raw.access_type = Some("root".to_string());
        assert!(matches!(
            SessionClaims::try_from(raw),
            Err(AuthError::InvalidToken("access type"))
        ));
    }

    #[test]
    fn malformed_subject_or_email_is_rejected() {
        let mut bad_subject = raw();
        bad_subject.subject_id = Some("42".to_string());
        assert!(matches!(
            SessionClaims::try_from(bad_subject),
            Err(AuthError::InvalidToken("subject"))
        ));

        let mut bad_email = raw();
        bad_email.email = Some("alice".to_string());
        assert!(matches!(
            SessionClaims::try_from(bad_email),
            Err(AuthError::InvalidToken("email"))
        ));

        let mut missing_email = raw();
        missing_email.email = None;
        assert!(SessionClaims::try_from(missing_email).is_err());
    }

    #[test]
    fn wire_form_uses_camel_case_and_sub() -> anyhow::Result<()> {
        let principal = Principal {
            id: Uuid::new_v4(),
            email: "root@platform.test".to_string(),
            display_name: "Root".to_string(),
            is_super_admin: true,
            password_hash: String::new(),
            roles: vec!["admin".to_string()],
            permissions: Vec::new(),
        };
        let claims = SessionClaims::direct(&principal, None);
        let value = serde_json::to_value(RawClaims::from(&claims))?;
        assert_eq!(value["sub"], principal.id.to_string());
        assert_eq!(value["isSuperAdmin"], true);
        assert_eq!(value["accessType"], "direct_access");
        assert!(value.get("tenantContext").is_none());
        assert!(value.get("permissions").is_none());
        Ok(())
    }

    #[test]
    fn principal_debug_redacts_hash() {
        let principal = Principal {
            id: Uuid::nil(),
            email: "a@example.com".to_string(),
            display_name: "A".to_string(),
            is_super_admin: false,
            password_hash: "$argon2id$secret".to_string(),
            roles: Vec::new(),
            permissions: Vec::new(),
        };
        let rendered = format!("{principal:?}");
        assert!(!rendered.contains("argon2id"));
        assert!(rendered.contains("[redacted]"));
    }

    #[test]
    fn acting_user_prefers_original_user() -> Result<(), AuthError> {
        let mut claims = SessionClaims::try_from(raw())?;
        assert_eq!(claims.acting_user_id(), claims.subject_id);
        let admin = Uuid::new_v4();
        claims.original_user_id = Some(admin);
        assert_eq!(claims.acting_user_id(), admin);
        Ok(())
    }
}
