//! Enrolled second-factor material per user.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TotpEnrollment {
    pub secret: Vec<u8>,
    pub confirmed: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackupCodeRecord {
    pub hash: String,
    pub used: bool,
}

#[async_trait]
pub trait FactorStore: Send + Sync {
    async fn totp(&self, user_id: Uuid) -> Result<Option<TotpEnrollment>>;

    /// Store a new, unconfirmed secret, replacing any previous enrollment.
    async fn save_totp(&self, user_id: Uuid, secret: &[u8]) -> Result<()>;

    async fn confirm_totp(&self, user_id: Uuid) -> Result<()>;

    async fn delete_totp(&self, user_id: Uuid) -> Result<()>;

    async fn backup_codes(&self, user_id: Uuid) -> Result<Vec<BackupCodeRecord>>;

    /// Replace the user's whole batch of backup code hashes.
    async fn replace_backup_codes(&self, user_id: Uuid, hashes: &[String]) -> Result<()>;

    /// Mark a code used. Returns `false` if it was already used or is unknown,
    /// so concurrent consumers of the same code see exactly one `true`.
    async fn consume_backup_code(&self, user_id: Uuid, hash: &str) -> Result<bool>;

    async fn delete_backup_codes(&self, user_id: Uuid) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryFactorStore {
    totp: Mutex<HashMap<Uuid, TotpEnrollment>>,
    backup_codes: Mutex<HashMap<Uuid, Vec<BackupCodeRecord>>>,
}

impl MemoryFactorStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FactorStore for MemoryFactorStore {
    async fn totp(&self, user_id: Uuid) -> Result<Option<TotpEnrollment>> {
        Ok(self.totp.lock().await.get(&user_id).cloned())
    }

    async fn save_totp(&self, user_id: Uuid, secret: &[u8]) -> Result<()> {
        self.totp.lock().await.insert(
            user_id,
            TotpEnrollment {
                secret: secret.to_vec(),
                confirmed: false,
            },
        );
        Ok(())
    }

    async fn confirm_totp(&self, user_id: Uuid) -> Result<()> {
        if let Some(enrollment) = self.totp.lock().await.get_mut(&user_id) {
            enrollment.confirmed = true;
        }
        Ok(())
    }

    async fn delete_totp(&self, user_id: Uuid) -> Result<()> {
        self.totp.lock().await.remove(&user_id);
        Ok(())
    }

    async fn backup_codes(&self, user_id: Uuid) -> Result<Vec<BackupCodeRecord>> {
        Ok(self
            .backup_codes
            .lock()
            .await
            .get(&user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn replace_backup_codes(&self, user_id: Uuid, hashes: &[String]) -> Result<()> {
        let records = hashes
            .iter()
            .map(|hash| BackupCodeRecord {
                hash: hash.clone(),
                used: false,
            })
            .collect();
        self.backup_codes.lock().await.insert(user_id, records);
        Ok(())
    }

    async fn consume_backup_code(&self, user_id: Uuid, hash: &str) -> Result<bool> {
        let mut codes = self.backup_codes.lock().await;
        let Some(record) = codes
            .get_mut(&user_id)
            .and_then(|records| records.iter_mut().find(|r| r.hash == hash))
        else {
            return Ok(false);
        };
        if record.used {
            return Ok(false);
        }
        record.used = true;
        Ok(true)
    }

    async fn delete_backup_codes(&self, user_id: Uuid) -> Result<()> {
        self.backup_codes.lock().await.remove(&user_id);
        Ok(())
    }
}
