//! Backup code method.
//!
//! Codes are 12 characters from an unambiguous alphabet, shown as
//! `XXXX-XXXX-XXXX`, and stored as Argon2id hashes keyed with a server-side
//! pepper. Each code works once.

use anyhow::{Context, Result, anyhow};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString};
use async_trait::async_trait;
use rand::{RngCore, rngs::OsRng};
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::factor_store::FactorStore;
use super::methods::{MethodProvider, MethodSetup, TwoFactorMethod};
use crate::auth::error::{AuthError, AuthResult};

const BACKUP_CODE_COUNT: usize = 10;
const BACKUP_CODE_LEN: usize = 12;
const BACKUP_CODE_GROUP_SIZE: usize = 4;
const BACKUP_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

pub struct BackupCodeProvider {
    store: Arc<dyn FactorStore>,
    pepper: SecretString,
    params: argon2::Params,
}

impl BackupCodeProvider {
    #[must_use]
    pub fn new(store: Arc<dyn FactorStore>, pepper: SecretString) -> Self {
        Self {
            store,
            pepper,
            params: argon2::Params::default(),
        }
    }

    /// Override the Argon2 cost parameters.
    #[must_use]
    pub fn with_params(mut self, params: argon2::Params) -> Self {
        self.params = params;
        self
    }

    fn hasher(&self) -> Result<Argon2<'_>> {
        Argon2::new_with_secret(
            self.pepper.expose_secret().as_bytes(),
            argon2::Algorithm::Argon2id,
            argon2::Version::V0x13,
            self.params.clone(),
        )
        .map_err(|_| anyhow!("failed to initialize Argon2id"))
    }

    fn hash_code(&self, normalized: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .hasher()?
            .hash_password(normalized.as_bytes(), &salt)
            .map_err(|_| anyhow!("failed to hash backup code"))?
            .to_string();
        Ok(hash)
    }

    fn matches(&self, normalized: &str, stored_hash: &str) -> Result<bool> {
        let parsed =
            PasswordHash::new(stored_hash).map_err(|_| anyhow!("invalid backup code hash"))?;
        Ok(self
            .hasher()?
            .verify_password(normalized.as_bytes(), &parsed)
            .is_ok())
    }
}

#[async_trait]
impl MethodProvider for BackupCodeProvider {
    fn method(&self) -> TwoFactorMethod {
        TwoFactorMethod::BackupCode
    }

    async fn is_enabled(&self, user_id: Uuid) -> Result<bool> {
        Ok(self
            .store
            .backup_codes(user_id)
            .await?
            .iter()
            .any(|record| !record.used))
    }

    /// Generates a fresh batch, invalidating every previous code.
    async fn setup(&self, user_id: Uuid, _email: &str) -> AuthResult<MethodSetup> {
        let mut codes = Vec::with_capacity(BACKUP_CODE_COUNT);
        let mut hashes = Vec::with_capacity(BACKUP_CODE_COUNT);
        for _ in 0..BACKUP_CODE_COUNT {
            let normalized = generate_code(&mut OsRng);
            hashes.push(self.hash_code(&normalized)?);
            codes.push(format_code(&normalized)?);
        }
        self.store.replace_backup_codes(user_id, &hashes).await?;
        info!(%user_id, count = codes.len(), "backup codes regenerated");
        Ok(MethodSetup {
            backup_codes: codes,
            ..MethodSetup::default()
        })
    }

    async fn confirm(&self, _user_id: Uuid, _code: &str) -> AuthResult<()> {
        Ok(())
    }

    async fn verify(&self, user_id: Uuid, code: &str) -> AuthResult<()> {
        let normalized = normalize_code(code).map_err(|_| AuthError::InvalidTwoFactorCode)?;
        for record in self.store.backup_codes(user_id).await? {
            if !self.matches(&normalized, &record.hash)? {
                continue;
            }
            if record.used {
                warn!(%user_id, "backup code reuse attempt");
                return Err(AuthError::BackupCodeAlreadyUsed);
            }
            if self.store.consume_backup_code(user_id, &record.hash).await? {
                info!(%user_id, "backup code consumed");
                return Ok(());
            }
            return Err(AuthError::BackupCodeAlreadyUsed);
        }
        Err(AuthError::InvalidTwoFactorCode)
    }

    async fn disable(&self, user_id: Uuid) -> AuthResult<()> {
        self.store.delete_backup_codes(user_id).await?;
        info!(%user_id, "backup codes removed");
        Ok(())
    }
}

/// Strip separators and uppercase. Fails on wrong length or characters.
pub fn normalize_code(input: &str) -> Result<String> {
    let normalized: String = input
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|ch| ch.to_ascii_uppercase())
        .collect();

    if normalized.len() != BACKUP_CODE_LEN {
        return Err(anyhow!("invalid backup code length"));
    }
    if !normalized
        .as_bytes()
        .iter()
        .all(|ch| BACKUP_CODE_ALPHABET.contains(ch))
    {
        return Err(anyhow!("invalid backup code characters"));
    }
    Ok(normalized)
}

/// Group a normalized code for display.
pub fn format_code(normalized: &str) -> Result<String> {
    if normalized.len() != BACKUP_CODE_LEN {
        return Err(anyhow!("invalid backup code length"));
    }
    let groups = normalized
        .as_bytes()
        .chunks(BACKUP_CODE_GROUP_SIZE)
        .map(|chunk| std::str::from_utf8(chunk).context("invalid backup code chunk"))
        .collect::<Result<Vec<_>>>()?;
    Ok(groups.join("-"))
}

fn generate_code<R: RngCore + ?Sized>(rng: &mut R) -> String {
    let mut raw = [0u8; BACKUP_CODE_LEN];
    rng.fill_bytes(&mut raw);
    raw.iter()
        .map(|byte| {
            let idx = usize::from(*byte) % BACKUP_CODE_ALPHABET.len();
            char::from(BACKUP_CODE_ALPHABET[idx])
        })
        .collect()
}
