//! Collaborator interfaces consumed by the auth core, with in-memory
//! implementations used by tests and by the server's memory mode.
//!
//! The Postgres implementations live in `postgres.rs`.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    claims::{IdentityScope, Principal},
    utils::normalize_email,
};

/// Identity lookups, separately per platform and tenant scope. The two scopes
/// never share records.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn find_by_email(&self, scope: IdentityScope, email: &str) -> Result<Option<Principal>>;
    async fn find_by_id(&self, scope: IdentityScope, id: Uuid) -> Result<Option<Principal>>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tenant {
    pub id: Uuid,
    pub subdomain: String,
    pub is_active: bool,
}

#[derive(Clone, Copy, Debug)]
pub enum TenantLookup<'a> {
    Id(Uuid),
    Subdomain(&'a str),
}

impl<'a> TenantLookup<'a> {
    /// Interpret a tenant reference that may be either an id or a subdomain.
    #[must_use]
    pub fn parse(value: &'a str) -> Self {
        Uuid::parse_str(value).map_or(Self::Subdomain(value), Self::Id)
    }
}

#[async_trait]
pub trait TenantDirectory: Send + Sync {
    async fn find_tenant(&self, lookup: TenantLookup<'_>) -> Result<Option<Tenant>>;
}

/// Explicit per-tenant delegation grants for platform users.
#[async_trait]
pub trait PermissionStore: Send + Sync {
    async fn has_grant(&self, user_id: Uuid, tenant_id: Uuid) -> Result<bool>;
}

#[derive(Debug, Default)]
pub struct MemoryIdentityStore {
    principals: RwLock<HashMap<IdentityScope, Vec<Principal>>>,
}

impl MemoryIdentityStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, scope: IdentityScope, mut principal: Principal) {
        principal.email = normalize_email(&principal.email);
        let mut principals = self.principals.write().await;
        let entries = principals.entry(scope).or_default();
        entries.retain(|existing| existing.id != principal.id && existing.email != principal.email);
        entries.push(principal);
    }
}

#[async_trait]
impl IdentityStore for MemoryIdentityStore {
    async fn find_by_email(&self, scope: IdentityScope, email: &str) -> Result<Option<Principal>> {
        let email = normalize_email(email);
        let principals = self.principals.read().await;
        Ok(principals
            .get(&scope)
            .and_then(|entries| entries.iter().find(|p| p.email == email))
            .cloned())
    }

    async fn find_by_id(&self, scope: IdentityScope, id: Uuid) -> Result<Option<Principal>> {
        let principals = self.principals.read().await;
        Ok(principals
            .get(&scope)
            .and_then(|entries| entries.iter().find(|p| p.id == id))
            .cloned())
    }
}

#[derive(Debug, Default)]
pub struct MemoryTenantDirectory {
    tenants: RwLock<Vec<Tenant>>,
}

impl MemoryTenantDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, tenant: Tenant) {
        let mut tenants = self.tenants.write().await;
        tenants.retain(|existing| existing.id != tenant.id);
        tenants.push(tenant);
    }
}

#[async_trait]
impl TenantDirectory for MemoryTenantDirectory {
    async fn find_tenant(&self, lookup: TenantLookup<'_>) -> Result<Option<Tenant>> {
        let tenants = self.tenants.read().await;
        let found = match lookup {
            TenantLookup::Id(id) => tenants.iter().find(|t| t.id == id),
            TenantLookup::Subdomain(subdomain) => {
                let subdomain = subdomain.trim().to_lowercase();
                tenants.iter().find(|t| t.subdomain == subdomain)
            }
        };
        Ok(found.cloned())
    }
}

#[derive(Debug, Default)]
pub struct MemoryPermissionStore {
    grants: RwLock<HashSet<(Uuid, Uuid)>>,
}

impl MemoryPermissionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn grant(&self, user_id: Uuid, tenant_id: Uuid) {
        self.grants.write().await.insert((user_id, tenant_id));
    }
}

#[async_trait]
impl PermissionStore for MemoryPermissionStore {
    async fn has_grant(&self, user_id: Uuid, tenant_id: Uuid) -> Result<bool> {
        Ok(self.grants.read().await.contains(&(user_id, tenant_id)))
    }
}
