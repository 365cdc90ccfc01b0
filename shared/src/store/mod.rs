//! Collaborator contracts for the three systems of record the portal core
//! reconciles: identities, the invite ledger, and employee profiles.
//!
//! Stores offer equality lookups by email and single-record conditional
//! writes. There are no cross-record transactions; every write method
//! reports whether it actually changed the record so callers can stay
//! idempotent.

pub mod dynamo;
pub mod memory;

use crate::error::Result;
use crate::types::{EmployeeProfile, Identity, IdentityUpdate, InviteRecord};
use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn get_identity(&self, user_id: &str) -> Result<Option<Identity>>;

    /// Exact match on the stored email value.
    async fn find_identities_by_email(&self, email: &str) -> Result<Vec<Identity>>;

    /// Returns false when the identity was already converged or does not exist.
    async fn apply_identity_update(&self, user_id: &str, update: &IdentityUpdate) -> Result<bool>;
}

#[async_trait]
pub trait InviteStore: Send + Sync {
    /// Exact match on the stored email value.
    async fn find_invites_by_email(&self, email: &str) -> Result<Vec<InviteRecord>>;

    /// Returns false when the invite was already accepted.
    async fn mark_invite_accepted(&self, invite_id: &str) -> Result<bool>;
}

#[async_trait]
pub trait EmployeeProfileStore: Send + Sync {
    /// Exact match on the stored email value.
    async fn find_profiles_by_email(&self, email: &str) -> Result<Vec<EmployeeProfile>>;

    /// Returns false when the profile was already active.
    async fn activate_profile(&self, profile_id: &str) -> Result<bool>;

    /// Returns false when a profile with the same id already exists.
    async fn create_profile_if_absent(&self, profile: &EmployeeProfile) -> Result<bool>;
}

/// The three stores the core reads and writes, usually backed by one table.
#[derive(Clone)]
pub struct PortalStores {
    pub identities: Arc<dyn IdentityStore>,
    pub invites: Arc<dyn InviteStore>,
    pub profiles: Arc<dyn EmployeeProfileStore>,
}

impl PortalStores {
    /// Uses one backing store for all three entity kinds.
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: IdentityStore + InviteStore + EmployeeProfileStore + 'static,
    {
        Self {
            identities: store.clone(),
            invites: store.clone(),
            profiles: store,
        }
    }
}
