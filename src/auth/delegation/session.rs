//! Persisted impersonation sessions.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::Mutex;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImpersonationStatus {
    Active,
    Ended,
}

impl ImpersonationStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Ended => "ended",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "active" => Some(Self::Active),
            "ended" => Some(Self::Ended),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImpersonationSession {
    pub id: Uuid,
    pub original_user_id: Uuid,
    pub original_tenant_id: Option<Uuid>,
    pub impersonated_user_id: Uuid,
    pub impersonated_tenant_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub reason: String,
    pub status: ImpersonationStatus,
    pub ended_at: Option<DateTime<Utc>>,
    /// Correlates the session with the request that opened it.
    pub session_id: String,
}

impl ImpersonationSession {
    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.status == ImpersonationStatus::Active && now < self.expires_at
    }
}

#[async_trait]
pub trait ImpersonationStore: Send + Sync {
    async fn create(&self, session: &ImpersonationSession) -> Result<()>;

    async fn find(&self, id: Uuid) -> Result<Option<ImpersonationSession>>;

    /// Compare-and-set `ACTIVE -> ENDED`. Returns the ended session only for the
    /// caller that performed the transition.
    async fn end_active(
        &self,
        id: Uuid,
        ended_at: DateTime<Utc>,
    ) -> Result<Option<ImpersonationSession>>;

    /// Undo an `end_active` whose follow-up failed: `ENDED -> ACTIVE`.
    /// Returns whether the session was reopened.
    async fn reopen(&self, id: Uuid) -> Result<bool>;
}

#[derive(Debug, Default)]
pub struct MemoryImpersonationStore {
    sessions: Mutex<HashMap<Uuid, ImpersonationSession>>,
}

impl MemoryImpersonationStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ImpersonationStore for MemoryImpersonationStore {
    async fn create(&self, session: &ImpersonationSession) -> Result<()> {
        self.sessions
            .lock()
            .await
            .insert(session.id, session.clone());
        Ok(())
    }

    async fn find(&self, id: Uuid) -> Result<Option<ImpersonationSession>> {
        Ok(self.sessions.lock().await.get(&id).cloned())
    }

    async fn end_active(
        &self,
        id: Uuid,
        ended_at: DateTime<Utc>,
    ) -> Result<Option<ImpersonationSession>> {
        let mut sessions = self.sessions.lock().await;
        let Some(session) = sessions
            .get_mut(&id)
            .filter(|session| session.status == ImpersonationStatus::Active)
        else {
            return Ok(None);
        };
        session.status = ImpersonationStatus::Ended;
        session.ended_at = Some(ended_at);
        Ok(Some(session.clone()))
    }

    async fn reopen(&self, id: Uuid) -> Result<bool> {
        let mut sessions = self.sessions.lock().await;
        let Some(session) = sessions
            .get_mut(&id)
            .filter(|session| session.status == ImpersonationStatus::Ended)
        else {
            return Ok(false);
        };
        session.status = ImpersonationStatus::Active;
        session.ended_at = None;
        Ok(true)
    }
}
