//! Access audit trail.
//!
//! Entries are append-only. Delegation start/end and admitted super-admin tenant
//! mismatches are critical: they are retried with exponential backoff and, if the
//! sink still refuses them, the operation that produced them fails. Other entries
//! (guard denials, blocked logins) are retried the same way but a final failure
//! is only logged.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{error, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use super::error::AuthError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    SecureLoginStarted,
    ImpersonationStarted,
    ImpersonationEnded,
    TenantMismatchAllowed,
    TenantMismatchDenied,
    DirectLoginBlocked,
    TokenRejected,
    AccessDenied,
}

impl AuditAction {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SecureLoginStarted => "secure_login_started",
            Self::ImpersonationStarted => "impersonation_started",
            Self::ImpersonationEnded => "impersonation_ended",
            Self::TenantMismatchAllowed => "tenant_mismatch_allowed",
            Self::TenantMismatchDenied => "tenant_mismatch_denied",
            Self::DirectLoginBlocked => "direct_login_blocked",
            Self::TokenRejected => "token_rejected",
            Self::AccessDenied => "access_denied",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "secure_login_started" => Some(Self::SecureLoginStarted),
            "impersonation_started" => Some(Self::ImpersonationStarted),
            "impersonation_ended" => Some(Self::ImpersonationEnded),
            "tenant_mismatch_allowed" => Some(Self::TenantMismatchAllowed),
            "tenant_mismatch_denied" => Some(Self::TenantMismatchDenied),
            "direct_login_blocked" => Some(Self::DirectLoginBlocked),
            "token_rejected" => Some(Self::TokenRejected),
            "access_denied" => Some(Self::AccessDenied),
            _ => None,
        }
    }

    /// Critical entries must never be dropped.
    #[must_use]
    pub fn is_critical(self) -> bool {
        matches!(
            self,
            Self::SecureLoginStarted
                | Self::ImpersonationStarted
                | Self::ImpersonationEnded
                | Self::TenantMismatchAllowed
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Denied,
}

impl AuditOutcome {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Denied => "denied",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub actor: String,
    pub action: AuditAction,
    pub resource: String,
    pub tenant_id: Option<Uuid>,
    pub outcome: AuditOutcome,
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl AuditEntry {
    #[must_use]
    pub fn new(actor: impl Into<String>, action: AuditAction, resource: impl Into<String>) -> Self {
        Self {
            actor: actor.into(),
            action,
            resource: resource.into(),
            tenant_id: None,
            outcome: AuditOutcome::Success,
            reason: None,
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn tenant(mut self, tenant_id: Option<Uuid>) -> Self {
        self.tenant_id = tenant_id;
        self
    }

    #[must_use]
    pub fn denied(mut self) -> Self {
        self.outcome = AuditOutcome::Denied;
        self
    }

    #[must_use]
    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Append-only audit storage.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, entry: &AuditEntry) -> Result<()>;

    /// Most recent entries, newest first. Sinks that cannot be read return nothing.
    async fn recent(&self, _limit: usize) -> Result<Vec<AuditEntry>> {
        Ok(Vec::new())
    }
}

#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().await.clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn append(&self, entry: &AuditEntry) -> Result<()> {
        self.entries.lock().await.push(entry.clone());
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<AuditEntry>> {
        let entries = self.entries.lock().await;
        Ok(entries.iter().rev().take(limit).cloned().collect())
    }
}

#[derive(Clone, Copy, Debug)]
pub struct AuditRetryConfig {
    max_attempts: u32,
    backoff_base: Duration,
    backoff_max: Duration,
}

impl AuditRetryConfig {
    /// 4 attempts, 50ms -> 1s exponential backoff with jitter.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_attempts: 4,
            backoff_base: Duration::from_millis(50),
            backoff_max: Duration::from_secs(1),
        }
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    #[must_use]
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }
}

impl Default for AuditRetryConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Audit sink wrapper that applies the retry policy and criticality rules.
#[derive(Clone)]
pub struct AuditTrail {
    sink: Arc<dyn AuditSink>,
    retry: AuditRetryConfig,
}

impl AuditTrail {
    #[must_use]
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self {
            sink,
            retry: AuditRetryConfig::new(),
        }
    }

    #[must_use]
    pub fn with_retry(mut self, retry: AuditRetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Append an entry.
    ///
    /// # Errors
    /// Returns `AuthError::Internal` when a critical entry could not be written
    /// after all retries. Non-critical failures are logged and swallowed.
    pub async fn record(&self, entry: AuditEntry) -> Result<(), AuthError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.sink.append(&entry).await {
                Ok(()) => return Ok(()),
                Err(err) if attempt < self.retry.max_attempts => {
                    warn!(
                        action = entry.action.as_str(),
                        attempt, "audit append failed, retrying: {err}"
                    );
                    sleep(backoff_delay(
                        attempt,
                        self.retry.backoff_base,
                        self.retry.backoff_max,
                    ))
                    .await;
                }
                Err(err) => {
                    error!(
                        action = entry.action.as_str(),
                        actor = %entry.actor,
                        resource = %entry.resource,
                        "audit append failed after {attempt} attempts: {err}"
                    );
                    if entry.action.is_critical() {
                        return Err(AuthError::Internal(
                            err.context("critical audit entry could not be written"),
                        ));
                    }
                    return Ok(());
                }
            }
        }
    }

    pub async fn recent(&self, limit: usize) -> Result<Vec<AuditEntry>, AuthError> {
        Ok(self.sink.recent(limit).await?)
    }
}

fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let shift = attempt.saturating_sub(1).min(31);
    let factor = 1u32 << shift;
    let delay = base.checked_mul(factor).unwrap_or(max);
    let capped = if delay > max { max } else { delay };
    jitter_delay(capped)
}

fn jitter_delay(delay: Duration) -> Duration {
    let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
    if delay_ms < 2 {
        return delay;
    }
    let half = delay_ms / 2;
    let jitter = rand::thread_rng().gen_range(0..=half);
    Duration::from_millis(half + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` appends, then stores.
    struct FlakySink {
        failures: u32,
        calls: AtomicU32,
        inner: MemoryAuditSink,
    }

    impl FlakySink {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                calls: AtomicU32::new(0),
                inner: MemoryAuditSink::new(),
            }
        }
    }

    #[async_trait]
    impl AuditSink for FlakySink {
        async fn append(&self, entry: &AuditEntry) -> Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(anyhow::anyhow!("sink unavailable"));
            }
            self.inner.append(entry).await
        }
    }

    fn fast_retry() -> AuditRetryConfig {
        AuditRetryConfig::new()
            .with_max_attempts(3)
            .with_backoff_base(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn transient_failures_are_retried() -> anyhow::Result<()> {
        let sink = Arc::new(FlakySink::new(2));
        let trail = AuditTrail::new(sink.clone()).with_retry(fast_retry());
        trail
            .record(AuditEntry::new("admin", AuditAction::ImpersonationStarted, "s-1"))
            .await?;
        assert_eq!(sink.inner.entries().await.len(), 1);
        assert_eq!(sink.calls.load(Ordering::SeqCst), 3);
        Ok(())
    }

    #[tokio::test]
    async fn critical_entry_failure_is_an_error() {
        let sink = Arc::new(FlakySink::new(u32::MAX));
        let trail = AuditTrail::new(sink).with_retry(fast_retry());
        let result = trail
            .record(AuditEntry::new("admin", AuditAction::ImpersonationEnded, "s-1"))
            .await;
        assert!(matches!(result, Err(AuthError::Internal(_))));
    }

    #[tokio::test]
    async fn non_critical_entry_failure_is_logged_only() {
        let sink = Arc::new(FlakySink::new(u32::MAX));
        let trail = AuditTrail::new(sink).with_retry(fast_retry());
        let result = trail
            .record(AuditEntry::new("anonymous", AuditAction::TokenRejected, "/v1/x").denied())
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn memory_sink_lists_newest_first() -> anyhow::Result<()> {
        let sink = MemoryAuditSink::new();
        sink.append(&AuditEntry::new("a", AuditAction::AccessDenied, "first"))
            .await?;
        sink.append(&AuditEntry::new("a", AuditAction::AccessDenied, "second"))
            .await?;
        let recent = sink.recent(1).await?;
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].resource, "second");
        Ok(())
    }

    #[test]
    fn action_names_round_trip() {
        for action in [
            AuditAction::SecureLoginStarted,
            AuditAction::ImpersonationStarted,
            AuditAction::ImpersonationEnded,
            AuditAction::TenantMismatchAllowed,
            AuditAction::TenantMismatchDenied,
            AuditAction::DirectLoginBlocked,
            AuditAction::TokenRejected,
            AuditAction::AccessDenied,
        ] {
            assert_eq!(AuditAction::parse(action.as_str()), Some(action));
        }
    }

    #[test]
    fn backoff_is_capped() {
        let delay = backoff_delay(20, Duration::from_millis(50), Duration::from_secs(1));
        assert!(delay <= Duration::from_secs(1));
        assert!(delay >= Duration::from_millis(500));
    }
}
