//! Capability stores for pending two-factor sessions and attempt counters.
//!
//! Both are single-process maps today. Callers only rely on the atomic
//! operations declared by the traits (`take` as check-and-delete,
//! `check_and_increment`), so a shared external store can replace them.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::auth::claims::SessionClaims;

/// A login that passed the password check and is waiting for a second factor.
#[derive(Clone, Debug)]
pub struct PendingTwoFactorSession {
    pub id: String,
    pub user_id: Uuid,
    pub email: String,
    pub name: String,
    /// Draft claims, signed only after verification succeeds.
    pub payload: SessionClaims,
    pub tenant_context: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl PendingTwoFactorSession {
    #[must_use]
    pub fn is_expired(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        now - self.created_at >= ttl
    }
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn put(&self, session: PendingTwoFactorSession, ttl: Duration) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<PendingTwoFactorSession>>;

    /// Remove and return the session. Among concurrent callers for the same id,
    /// exactly one observes `Some`.
    async fn take(&self, id: &str) -> Result<Option<PendingTwoFactorSession>>;
}

#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<String, (PendingTwoFactorSession, DateTime<Utc>)>>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn put(&self, session: PendingTwoFactorSession, ttl: Duration) -> Result<()> {
        let now = Utc::now();
        let mut sessions = self.sessions.lock().await;
        // Expired entries are swept on write so the map stays bounded.
        sessions.retain(|_, (_, expires_at)| *expires_at > now);
        let expires_at = session.created_at + ttl;
        sessions.insert(session.id.clone(), (session, expires_at));
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<PendingTwoFactorSession>> {
        let sessions = self.sessions.lock().await;
        Ok(sessions.get(id).map(|(session, _)| session.clone()))
    }

    async fn take(&self, id: &str) -> Result<Option<PendingTwoFactorSession>> {
        let mut sessions = self.sessions.lock().await;
        Ok(sessions.remove(id).map(|(session, _)| session))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CounterDecision {
    Allowed { count: u32 },
    Limited,
}

#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment the counter for `key` unless it already reached `limit` within
    /// the current window. Check and increment happen atomically.
    async fn check_and_increment(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
    ) -> Result<CounterDecision>;

    async fn reset(&self, key: &str) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    counters: Mutex<HashMap<String, (u32, DateTime<Utc>)>>,
}

impl MemoryCounterStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.counters.lock().await.len()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn check_and_increment(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
    ) -> Result<CounterDecision> {
        let now = Utc::now();
        let mut counters = self.counters.lock().await;
        // Lapsed windows carry no state; dropping them keeps the map bounded.
        counters.retain(|_, (_, started)| now - *started < window);
        let entry = counters.entry(key.to_string()).or_insert((0, now));
        if entry.0 >= limit {
            return Ok(CounterDecision::Limited);
        }
        entry.0 += 1;
        Ok(CounterDecision::Allowed { count: entry.0 })
    }

    async fn reset(&self, key: &str) -> Result<()> {
        self.counters.lock().await.remove(key);
        Ok(())
    }
}
