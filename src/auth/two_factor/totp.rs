//! TOTP method: SHA1, 6 digits, 30 second step, one step of skew.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::sync::Arc;
use totp_rs::{Algorithm, Secret, TOTP};
use tracing::{debug, info};
use uuid::Uuid;

use super::factor_store::FactorStore;
use super::methods::{MethodProvider, MethodSetup, TwoFactorMethod};
use crate::auth::error::{AuthError, AuthResult};

pub struct TotpProvider {
    store: Arc<dyn FactorStore>,
    issuer: String,
}

impl TotpProvider {
    #[must_use]
    pub fn new(store: Arc<dyn FactorStore>, issuer: impl Into<String>) -> Self {
        Self {
            store,
            issuer: issuer.into(),
        }
    }

    fn totp(&self, secret: Vec<u8>, account: &str) -> Result<TOTP> {
        TOTP::new(
            Algorithm::SHA1,
            6,
            1,
            30,
            secret,
            Some(self.issuer.clone()),
            account.to_string(),
        )
        .map_err(|e| anyhow!("TOTP init error: {e}"))
    }

    fn check(&self, secret: Vec<u8>, code: &str) -> Result<bool> {
        // The account label does not take part in the check.
        let totp = self.totp(secret, "user")?;
        Ok(totp.check_current(code.trim()).unwrap_or(false))
    }
}

#[async_trait]
impl MethodProvider for TotpProvider {
    fn method(&self) -> TwoFactorMethod {
        TwoFactorMethod::Totp
    }

    async fn is_enabled(&self, user_id: Uuid) -> Result<bool> {
        Ok(self
            .store
            .totp(user_id)
            .await?
            .is_some_and(|enrollment| enrollment.confirmed))
    }

    async fn setup(&self, user_id: Uuid, email: &str) -> AuthResult<MethodSetup> {
        let secret = Secret::generate_secret()
            .to_bytes()
            .map_err(|e| anyhow!("Secret gen error: {e}"))?;
        let totp = self.totp(secret.clone(), email)?;
        self.store.save_totp(user_id, &secret).await?;
        info!(%user_id, "totp enrollment started");
        Ok(MethodSetup {
            secret: Some(totp.get_secret_base32()),
            otpauth_url: Some(totp.get_url()),
            backup_codes: Vec::new(),
            requires_confirmation: true,
        })
    }

    async fn confirm(&self, user_id: Uuid, code: &str) -> AuthResult<()> {
        let enrollment = self
            .store
            .totp(user_id)
            .await?
            .ok_or(AuthError::NotFound("totp enrollment"))?;
        if enrollment.confirmed {
            return Ok(());
        }
        if !self.check(enrollment.secret, code)? {
            debug!(%user_id, "totp confirmation code rejected");
            return Err(AuthError::InvalidTwoFactorCode);
        }
        self.store.confirm_totp(user_id).await?;
        info!(%user_id, "totp enrollment confirmed");
        Ok(())
    }

    async fn verify(&self, user_id: Uuid, code: &str) -> AuthResult<()> {
        let Some(enrollment) = self
            .store
            .totp(user_id)
            .await?
            .filter(|enrollment| enrollment.confirmed)
        else {
            return Err(AuthError::InvalidTwoFactorCode);
        };
        if self.check(enrollment.secret, code)? {
            Ok(())
        } else {
            Err(AuthError::InvalidTwoFactorCode)
        }
    }

    async fn disable(&self, user_id: Uuid) -> AuthResult<()> {
        self.store.delete_totp(user_id).await?;
        info!(%user_id, "totp disabled");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::auth::two_factor::factor_store::MemoryFactorStore;

    async fn current_code(store: &MemoryFactorStore, user: Uuid) -> String {
        let secret = store.totp(user).await.unwrap().unwrap().secret;
        TOTP::new(Algorithm::SHA1, 6, 1, 30, secret, None, "user".to_string())
            .unwrap()
            .generate_current()
            .unwrap()
    }

    #[tokio::test]
    async fn setup_confirm_verify_disable() {
        let store = Arc::new(MemoryFactorStore::new());
        let provider = TotpProvider::new(store.clone(), "Warden");
        let user = Uuid::new_v4();

        let setup = provider.setup(user, "alice@example.com").await.unwrap();
        assert!(setup.requires_confirmation);
        assert!(setup.otpauth_url.unwrap().starts_with("otpauth://totp/"));
        assert!(!provider.is_enabled(user).await.unwrap());

        let code = current_code(&store, user).await;
        assert!(matches!(
            provider.verify(user, &code).await,
            Err(AuthError::InvalidTwoFactorCode)
        ));

        provider.confirm(user, &code).await.unwrap();
        assert!(provider.is_enabled(user).await.unwrap());
        provider.verify(user, &code).await.unwrap();

        provider.disable(user).await.unwrap();
        assert!(!provider.is_enabled(user).await.unwrap());
    }

    #[tokio::test]
    async fn wrong_code_is_rejected() {
        let store = Arc::new(MemoryFactorStore::new());
        let provider = TotpProvider::new(store.clone(), "Warden");
        let user = Uuid::new_v4();
        provider.setup(user, "alice@example.com").await.unwrap();
        let code = current_code(&store, user).await;
        provider.confirm(user, &code).await.unwrap();

        let wrong = if code == "000000" { "111111" } else { "000000" };
        assert!(matches!(
            provider.verify(user, wrong).await,
            Err(AuthError::InvalidTwoFactorCode)
        ));
    }

    #[tokio::test]
    async fn confirm_without_setup_is_not_found() {
        let provider = TotpProvider::new(Arc::new(MemoryFactorStore::new()), "Warden");
        assert!(matches!(
            provider.confirm(Uuid::new_v4(), "123456").await,
            Err(AuthError::NotFound(_))
        ));
    }
}
