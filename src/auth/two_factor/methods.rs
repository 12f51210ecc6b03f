//! Pluggable second-factor methods and the registry that holds them.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::error::AuthResult;

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum TwoFactorMethod {
    Totp,
    BackupCode,
}

impl TwoFactorMethod {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Totp => "totp",
            Self::BackupCode => "backup_code",
        }
    }

    /// Accepts the wire name and the path spelling used by the setup routes.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "totp" => Some(Self::Totp),
            "backup_code" | "backup_codes" | "backup-codes" => Some(Self::BackupCode),
            _ => None,
        }
    }

    /// Guess the method from the shape of a submitted code: six digits is a
    /// TOTP code, anything else is treated as a backup code.
    #[must_use]
    pub fn infer(code: &str) -> Self {
        let code = code.trim();
        if code.len() == 6 && code.chars().all(|c| c.is_ascii_digit()) {
            Self::Totp
        } else {
            Self::BackupCode
        }
    }
}

impl fmt::Display for TwoFactorMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the user needs to finish enrolling a method.
#[derive(Clone, Debug, Default, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MethodSetup {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub otpauth_url: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub backup_codes: Vec<String>,
    pub requires_confirmation: bool,
}

#[async_trait]
pub trait MethodProvider: Send + Sync {
    fn method(&self) -> TwoFactorMethod;

    async fn is_enabled(&self, user_id: Uuid) -> Result<bool>;

    async fn setup(&self, user_id: Uuid, email: &str) -> AuthResult<MethodSetup>;

    async fn confirm(&self, user_id: Uuid, code: &str) -> AuthResult<()>;

    /// Check a login code. Single-use material is consumed here.
    async fn verify(&self, user_id: Uuid, code: &str) -> AuthResult<()>;

    async fn disable(&self, user_id: Uuid) -> AuthResult<()>;
}

/// One provider per method.
#[derive(Clone, Default)]
pub struct MethodRegistry {
    providers: BTreeMap<TwoFactorMethod, Arc<dyn MethodProvider>>,
}

impl MethodRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider, replacing any provider for the same method.
    #[must_use]
    pub fn with_provider(mut self, provider: Arc<dyn MethodProvider>) -> Self {
        self.providers.insert(provider.method(), provider);
        self
    }

    #[must_use]
    pub fn get(&self, method: TwoFactorMethod) -> Option<Arc<dyn MethodProvider>> {
        self.providers.get(&method).cloned()
    }

    pub fn providers(&self) -> impl Iterator<Item = &Arc<dyn MethodProvider>> {
        self.providers.values()
    }
}

#[cfg(test)]
mod tests {
    use super::TwoFactorMethod;

    #[test]
    fn parse_accepts_path_spellings() {
        assert_eq!(TwoFactorMethod::parse("TOTP"), Some(TwoFactorMethod::Totp));
        assert_eq!(
            TwoFactorMethod::parse("backup-codes"),
            Some(TwoFactorMethod::BackupCode)
        );
        assert_eq!(TwoFactorMethod::parse("sms"), None);
    }

    #[test]
    fn infer_uses_code_shape() {
        assert_eq!(TwoFactorMethod::infer(" 123456 "), TwoFactorMethod::Totp);
        assert_eq!(
            TwoFactorMethod::infer("ABCD-EFGH-JKLM"),
            TwoFactorMethod::BackupCode
        );
        assert_eq!(TwoFactorMethod::infer("12345"), TwoFactorMethod::BackupCode);
    }
}
