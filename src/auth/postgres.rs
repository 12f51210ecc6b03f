//! Postgres-backed stores.
//!
//! One pool serves every durable collaborator. Pending two-factor sessions and
//! attempt counters stay in process memory. Schema: `sql/schema.sql`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use tracing::{Instrument, info_span};
use uuid::Uuid;

use super::audit::{AuditAction, AuditEntry, AuditOutcome, AuditSink};
use super::claims::{IdentityScope, Principal};
use super::delegation::session::{ImpersonationSession, ImpersonationStatus, ImpersonationStore};
use super::stores::{IdentityStore, PermissionStore, Tenant, TenantDirectory, TenantLookup};
use super::two_factor::factor_store::{BackupCodeRecord, FactorStore, TotpEnrollment};
use super::utils::normalize_email;

#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

macro_rules! db_span {
    ($operation:literal) => {
        info_span!("db.query", db.system = "postgresql", db.operation = $operation)
    };
}

fn principal_from_row(row: &PgRow, is_super_admin: bool) -> Principal {
    Principal {
        id: row.get("id"),
        email: row.get("email"),
        display_name: row.get("display_name"),
        is_super_admin,
        password_hash: row.get("password_hash"),
        roles: row.get("roles"),
        permissions: row.get("permissions"),
    }
}

#[async_trait]
impl IdentityStore for PgStore {
    async fn find_by_email(&self, scope: IdentityScope, email: &str) -> Result<Option<Principal>> {
        let email = normalize_email(email);
        let row = match scope {
            IdentityScope::Platform => {
                let query = r"
                    SELECT id, email, display_name, password_hash, is_super_admin, roles, permissions
                    FROM platform_users
                    WHERE email = $1
                    LIMIT 1
                ";
                sqlx::query(query)
                    .bind(&email)
                    .fetch_optional(&self.pool)
                    .instrument(db_span!("SELECT"))
                    .await
                    .context("failed to load platform user by email")?
                    .map(|row| {
                        let is_super_admin: bool = row.get("is_super_admin");
                        principal_from_row(&row, is_super_admin)
                    })
            }
            IdentityScope::Tenant(tenant_id) => {
                let query = r"
                    SELECT id, email, display_name, password_hash, roles, permissions
                    FROM tenant_users
                    WHERE tenant_id = $1
                      AND email = $2
                    LIMIT 1
                ";
                sqlx::query(query)
                    .bind(tenant_id)
                    .bind(&email)
                    .fetch_optional(&self.pool)
                    .instrument(db_span!("SELECT"))
                    .await
                    .context("failed to load tenant user by email")?
                    .map(|row| principal_from_row(&row, false))
            }
        };
        Ok(row)
    }

    async fn find_by_id(&self, scope: IdentityScope, id: Uuid) -> Result<Option<Principal>> {
        let row = match scope {
            IdentityScope::Platform => {
                let query = r"
                    SELECT id, email, display_name, password_hash, is_super_admin, roles, permissions
                    FROM platform_users
                    WHERE id = $1
                ";
                sqlx::query(query)
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .instrument(db_span!("SELECT"))
                    .await
                    .context("failed to load platform user")?
                    .map(|row| {
                        let is_super_admin: bool = row.get("is_super_admin");
                        principal_from_row(&row, is_super_admin)
                    })
            }
            IdentityScope::Tenant(tenant_id) => {
                let query = r"
                    SELECT id, email, display_name, password_hash, roles, permissions
                    FROM tenant_users
                    WHERE tenant_id = $1
                      AND id = $2
                ";
                sqlx::query(query)
                    .bind(tenant_id)
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .instrument(db_span!("SELECT"))
                    .await
                    .context("failed to load tenant user")?
                    .map(|row| principal_from_row(&row, false))
            }
        };
        Ok(row)
    }
}

#[async_trait]
impl TenantDirectory for PgStore {
    async fn find_tenant(&self, lookup: TenantLookup<'_>) -> Result<Option<Tenant>> {
        let query = match lookup {
            TenantLookup::Id(id) => sqlx::query(
                "SELECT id, subdomain, is_active FROM tenants WHERE id = $1",
            )
            .bind(id),
            TenantLookup::Subdomain(subdomain) => sqlx::query(
                "SELECT id, subdomain, is_active FROM tenants WHERE subdomain = $1",
            )
            .bind(subdomain.trim().to_lowercase()),
        };
        let row = query
            .fetch_optional(&self.pool)
            .instrument(db_span!("SELECT"))
            .await
            .context("failed to load tenant")?;
        Ok(row.map(|row| Tenant {
            id: row.get("id"),
            subdomain: row.get("subdomain"),
            is_active: row.get("is_active"),
        }))
    }
}

#[async_trait]
impl PermissionStore for PgStore {
    async fn has_grant(&self, user_id: Uuid, tenant_id: Uuid) -> Result<bool> {
        let query = r"
            SELECT 1 AS granted
            FROM delegation_grants
            WHERE user_id = $1
              AND tenant_id = $2
        ";
        let row = sqlx::query(query)
            .bind(user_id)
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .instrument(db_span!("SELECT"))
            .await
            .context("failed to check delegation grant")?;
        Ok(row.is_some())
    }
}

const IMPERSONATION_COLUMNS: &str = "id, original_user_id, original_tenant_id, impersonated_user_id, \
     impersonated_tenant_id, started_at, expires_at, reason, status, ended_at, session_id";

fn impersonation_from_row(row: &PgRow) -> ImpersonationSession {
    let status: String = row.get("status");
    ImpersonationSession {
        id: row.get("id"),
        original_user_id: row.get("original_user_id"),
        original_tenant_id: row.get("original_tenant_id"),
        impersonated_user_id: row.get("impersonated_user_id"),
        impersonated_tenant_id: row.get("impersonated_tenant_id"),
        started_at: row.get("started_at"),
        expires_at: row.get("expires_at"),
        reason: row.get("reason"),
        // Anything unrecognised is treated as no longer usable.
        status: ImpersonationStatus::parse(&status).unwrap_or(ImpersonationStatus::Ended),
        ended_at: row.get("ended_at"),
        session_id: row.get("session_id"),
    }
}

#[async_trait]
impl ImpersonationStore for PgStore {
    async fn create(&self, session: &ImpersonationSession) -> Result<()> {
        let query = format!(
            "INSERT INTO impersonation_sessions ({IMPERSONATION_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)"
        );
        sqlx::query(&query)
            .bind(session.id)
            .bind(session.original_user_id)
            .bind(session.original_tenant_id)
            .bind(session.impersonated_user_id)
            .bind(session.impersonated_tenant_id)
            .bind(session.started_at)
            .bind(session.expires_at)
            .bind(&session.reason)
            .bind(session.status.as_str())
            .bind(session.ended_at)
            .bind(&session.session_id)
            .execute(&self.pool)
            .instrument(db_span!("INSERT"))
            .await
            .context("failed to insert impersonation session")?;
        Ok(())
    }

    async fn find(&self, id: Uuid) -> Result<Option<ImpersonationSession>> {
        let query = format!("SELECT {IMPERSONATION_COLUMNS} FROM impersonation_sessions WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(db_span!("SELECT"))
            .await
            .context("failed to load impersonation session")?;
        Ok(row.as_ref().map(impersonation_from_row))
    }

    async fn end_active(
        &self,
        id: Uuid,
        ended_at: DateTime<Utc>,
    ) -> Result<Option<ImpersonationSession>> {
        let query = format!(
            "UPDATE impersonation_sessions \
             SET status = 'ended', ended_at = $2 \
             WHERE id = $1 AND status = 'active' \
             RETURNING {IMPERSONATION_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(id)
            .bind(ended_at)
            .fetch_optional(&self.pool)
            .instrument(db_span!("UPDATE"))
            .await
            .context("failed to end impersonation session")?;
        Ok(row.as_ref().map(impersonation_from_row))
    }

    async fn reopen(&self, id: Uuid) -> Result<bool> {
        let query = r"
            UPDATE impersonation_sessions
            SET status = 'active', ended_at = NULL
            WHERE id = $1 AND status = 'ended'
        ";
        let result = sqlx::query(query)
            .bind(id)
            .execute(&self.pool)
            .instrument(db_span!("UPDATE"))
            .await
            .context("failed to reopen impersonation session")?;
        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl FactorStore for PgStore {
    async fn totp(&self, user_id: Uuid) -> Result<Option<TotpEnrollment>> {
        let query = r"
            SELECT secret, confirmed_at
            FROM totp_enrollments
            WHERE user_id = $1
        ";
        let row = sqlx::query(query)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .instrument(db_span!("SELECT"))
            .await
            .context("failed to load TOTP enrollment")?;
        Ok(row.map(|row| {
            let confirmed_at: Option<DateTime<Utc>> = row.get("confirmed_at");
            TotpEnrollment {
                secret: row.get("secret"),
                confirmed: confirmed_at.is_some(),
            }
        }))
    }

    async fn save_totp(&self, user_id: Uuid, secret: &[u8]) -> Result<()> {
        let query = r"
            INSERT INTO totp_enrollments (user_id, secret, created_at, confirmed_at)
            VALUES ($1, $2, NOW(), NULL)
            ON CONFLICT (user_id) DO UPDATE
            SET secret = $2,
                created_at = NOW(),
                confirmed_at = NULL
        ";
        sqlx::query(query)
            .bind(user_id)
            .bind(secret)
            .execute(&self.pool)
            .instrument(db_span!("INSERT"))
            .await
            .context("failed to save TOTP enrollment")?;
        Ok(())
    }

    async fn confirm_totp(&self, user_id: Uuid) -> Result<()> {
        let query = r"
            UPDATE totp_enrollments
            SET confirmed_at = NOW()
            WHERE user_id = $1
              AND confirmed_at IS NULL
        ";
        sqlx::query(query)
            .bind(user_id)
            .execute(&self.pool)
            .instrument(db_span!("UPDATE"))
            .await
            .context("failed to confirm TOTP enrollment")?;
        Ok(())
    }

    async fn delete_totp(&self, user_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM totp_enrollments WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .instrument(db_span!("DELETE"))
            .await
            .context("failed to delete TOTP enrollment")?;
        Ok(())
    }

    async fn backup_codes(&self, user_id: Uuid) -> Result<Vec<BackupCodeRecord>> {
        let query = r"
            SELECT code_hash, used_at
            FROM backup_codes
            WHERE user_id = $1
        ";
        let rows = sqlx::query(query)
            .bind(user_id)
            .fetch_all(&self.pool)
            .instrument(db_span!("SELECT"))
            .await
            .context("failed to list backup codes")?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let used_at: Option<DateTime<Utc>> = row.get("used_at");
                BackupCodeRecord {
                    hash: row.get("code_hash"),
                    used: used_at.is_some(),
                }
            })
            .collect())
    }

    async fn replace_backup_codes(&self, user_id: Uuid, hashes: &[String]) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("failed to begin backup code transaction")?;
        sqlx::query("DELETE FROM backup_codes WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .instrument(db_span!("DELETE"))
            .await
            .context("failed to clear backup codes")?;
        for hash in hashes {
            sqlx::query("INSERT INTO backup_codes (user_id, code_hash) VALUES ($1, $2)")
                .bind(user_id)
                .bind(hash)
                .execute(&mut *tx)
                .instrument(db_span!("INSERT"))
                .await
                .context("failed to insert backup code")?;
        }
        tx.commit()
            .await
            .context("failed to commit backup codes")?;
        Ok(())
    }

    async fn consume_backup_code(&self, user_id: Uuid, hash: &str) -> Result<bool> {
        let query = r"
            UPDATE backup_codes
            SET used_at = NOW()
            WHERE user_id = $1
              AND code_hash = $2
              AND used_at IS NULL
            RETURNING user_id
        ";
        let row = sqlx::query(query)
            .bind(user_id)
            .bind(hash)
            .fetch_optional(&self.pool)
            .instrument(db_span!("UPDATE"))
            .await
            .context("failed to consume backup code")?;
        Ok(row.is_some())
    }

    async fn delete_backup_codes(&self, user_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM backup_codes WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .instrument(db_span!("DELETE"))
            .await
            .context("failed to delete backup codes")?;
        Ok(())
    }
}

#[async_trait]
impl AuditSink for PgStore {
    async fn append(&self, entry: &AuditEntry) -> Result<()> {
        let query = r"
            INSERT INTO access_audit (actor, action, resource, tenant_id, outcome, reason, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
        ";
        sqlx::query(query)
            .bind(&entry.actor)
            .bind(entry.action.as_str())
            .bind(&entry.resource)
            .bind(entry.tenant_id)
            .bind(entry.outcome.as_str())
            .bind(&entry.reason)
            .bind(entry.timestamp)
            .execute(&self.pool)
            .instrument(db_span!("INSERT"))
            .await
            .context("failed to append audit entry")?;
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<AuditEntry>> {
        let query = r"
            SELECT actor, action, resource, tenant_id, outcome, reason, created_at
            FROM access_audit
            ORDER BY id DESC
            LIMIT $1
        ";
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query(query)
            .bind(limit)
            .fetch_all(&self.pool)
            .instrument(db_span!("SELECT"))
            .await
            .context("failed to list audit entries")?;
        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let action: String = row.get("action");
                let outcome: String = row.get("outcome");
                Some(AuditEntry {
                    actor: row.get("actor"),
                    action: AuditAction::parse(&action)?,
                    resource: row.get("resource"),
                    tenant_id: row.get("tenant_id"),
                    outcome: if outcome == AuditOutcome::Denied.as_str() {
                        AuditOutcome::Denied
                    } else {
                        AuditOutcome::Success
                    },
                    reason: row.get("reason"),
                    timestamp: row.get("created_at"),
                })
            })
            .collect())
    }
}
