//! Declarative route policy and the authorization checks that evaluate it.

use std::collections::HashMap;
use tracing::warn;

use crate::auth::claims::AuthenticatedPrincipal;
use crate::auth::error::{AuthError, AuthResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchMode {
    Any,
    All,
}

impl MatchMode {
    fn describe(self) -> &'static str {
        match self {
            Self::Any => "any of",
            Self::All => "all of",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Requirement {
    pub values: Vec<String>,
    pub mode: MatchMode,
}

impl Requirement {
    /// Plain role list: any-of.
    #[must_use]
    pub fn roles<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            values: roles.into_iter().map(Into::into).collect(),
            mode: MatchMode::Any,
        }
    }

    /// Permission list: all-of unless relaxed with [`Requirement::any`].
    #[must_use]
    pub fn permissions<I, S>(permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            values: permissions.into_iter().map(Into::into).collect(),
            mode: MatchMode::All,
        }
    }

    #[must_use]
    pub fn require_all(mut self, require_all: bool) -> Self {
        self.mode = if require_all {
            MatchMode::All
        } else {
            MatchMode::Any
        };
        self
    }

    #[must_use]
    pub fn any(self) -> Self {
        self.require_all(false)
    }

    #[must_use]
    pub fn is_satisfied_by(&self, held: &[String]) -> bool {
        if self.values.is_empty() {
            return true;
        }
        let has = |value: &String| held.iter().any(|h| h == value);
        match self.mode {
            MatchMode::Any => self.values.iter().any(has),
            MatchMode::All => self.values.iter().all(has),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RoutePolicy {
    pub exempt: bool,
    pub super_admin: bool,
    pub roles: Option<Requirement>,
    pub permissions: Option<Requirement>,
}

impl RoutePolicy {
    #[must_use]
    pub fn exempt() -> Self {
        Self {
            exempt: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn authenticated() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn super_admin() -> Self {
        Self {
            super_admin: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_roles(mut self, roles: Requirement) -> Self {
        self.roles = Some(roles);
        self
    }

    #[must_use]
    pub fn with_permissions(mut self, permissions: Requirement) -> Self {
        self.permissions = Some(permissions);
        self
    }
}

/// Static table keyed by route template (for example `/v1/auth/2fa/{method}/setup`).
/// Routes without an entry require authentication and nothing else.
#[derive(Clone, Debug, Default)]
pub struct PolicyTable {
    routes: HashMap<String, RoutePolicy>,
}

impl PolicyTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn route(mut self, path: impl Into<String>, policy: RoutePolicy) -> Self {
        self.routes.insert(path.into(), policy);
        self
    }

    #[must_use]
    pub fn policy_for(&self, path: &str) -> RoutePolicy {
        self.routes.get(path).cloned().unwrap_or_default()
    }
}

/// Role, then permission, then super-admin checks.
///
/// # Errors
/// `Forbidden` naming the first unmet requirement.
pub fn authorize(
    principal: &AuthenticatedPrincipal,
    policy: &RoutePolicy,
    path: &str,
) -> AuthResult<()> {
    let claims = &principal.claims;

    if let Some(required) = &policy.roles {
        if !required.is_satisfied_by(&claims.roles) {
            warn!(
                user = %claims.subject_id,
                required = ?required.values,
                actual = ?claims.roles,
                path,
                "role requirement not met"
            );
            return Err(AuthError::Forbidden(format!(
                "requires {} roles: {}",
                required.mode.describe(),
                required.values.join(", ")
            )));
        }
    }

    if let Some(required) = &policy.permissions {
        if !required.is_satisfied_by(&claims.permissions) {
            warn!(
                user = %claims.subject_id,
                required = ?required.values,
                actual = ?claims.permissions,
                path,
                "permission requirement not met"
            );
            return Err(AuthError::Forbidden(format!(
                "requires {} permissions: {}",
                required.mode.describe(),
                required.values.join(", ")
            )));
        }
    }

    if policy.super_admin && !claims.is_super_admin {
        warn!(user = %claims.subject_id, path, "super-admin requirement not met");
        return Err(AuthError::Forbidden("requires super-admin".to_string()));
    }

    Ok(())
}
