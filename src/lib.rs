//! # Warden (multi-tenant authentication and delegated access)
//!
//! `warden` authenticates users against a platform identity store or one
//! tenant's store, brokers a second factor when one is enrolled, and issues
//! signed session tokens that are re-validated on every request.
//!
//! ## Tenant Model
//!
//! Platform identities (operators, super-admins) and tenant identities live in
//! separate stores and never share records. A platform identity cannot log into
//! a tenant directly; it enters through delegation.
//!
//! ## Delegated Access
//!
//! - **Secure login:** a platform user receives a time-boxed token scoped to one
//!   tenant.
//! - **Impersonation:** a platform user acts as a specific tenant user. The token
//!   carries both identities and points at a persisted session that can be
//!   ended once.
//!
//! Both are permission-checked and audited before any token is issued.
//!
//! ## Request Guard
//!
//! Every protected route re-derives trust from the token alone: signature,
//! claim structure, delegated expiry, tenant fencing, then the route's role,
//! permission and super-admin policy.

pub mod api;
pub mod auth;
pub mod cli;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(GIT_COMMIT_HASH.len() >= 7);
    }
}
