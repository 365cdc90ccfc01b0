use super::{EmployeeProfileStore, IdentityStore, InviteStore};
use crate::error::{PortalError, Result};
use crate::types::{EmployeeProfile, Identity, IdentityUpdate, InviteRecord, InviteStatus, ProfileStatus};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

/// In-memory store for tests and local runs.
///
/// Mirrors the conditional-write semantics of the DynamoDB store: writes that
/// would not change a record are not counted. `fail_writes_after` makes every
/// write past the given budget fail, which is how partial application is
/// simulated.
#[derive(Default)]
pub struct InMemoryPortalStore {
    identities: RwLock<BTreeMap<String, Identity>>,
    invites: RwLock<BTreeMap<String, InviteRecord>>,
    profiles: RwLock<BTreeMap<String, EmployeeProfile>>,
    writes: AtomicUsize,
    write_budget: RwLock<Option<usize>>,
}

impl InMemoryPortalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_identity(&self, identity: Identity) {
        self.identities
            .write()
            .await
            .insert(identity.user_id.clone(), identity);
    }

    pub async fn insert_invite(&self, invite: InviteRecord) {
        self.invites
            .write()
            .await
            .insert(invite.invite_id.clone(), invite);
    }

    pub async fn insert_profile(&self, profile: EmployeeProfile) {
        self.profiles
            .write()
            .await
            .insert(profile.profile_id.clone(), profile);
    }

    pub async fn identity(&self, user_id: &str) -> Option<Identity> {
        self.identities.read().await.get(user_id).cloned()
    }

    pub async fn invite(&self, invite_id: &str) -> Option<InviteRecord> {
        self.invites.read().await.get(invite_id).cloned()
    }

    pub async fn all_profiles(&self) -> Vec<EmployeeProfile> {
        self.profiles.read().await.values().cloned().collect()
    }

    /// Number of writes that changed a record.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Every write after `budget` more successful writes fails until cleared.
    pub async fn fail_writes_after(&self, budget: usize) {
        *self.write_budget.write().await = Some(budget);
    }

    pub async fn clear_failures(&self) {
        *self.write_budget.write().await = None;
    }

    async fn admit_write(&self) -> Result<()> {
        let mut budget = self.write_budget.write().await;
        match budget.as_mut() {
            Some(0) => Err(PortalError::Store("injected write failure".to_string())),
            Some(remaining) => {
                *remaining -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl IdentityStore for InMemoryPortalStore {
    async fn get_identity(&self, user_id: &str) -> Result<Option<Identity>> {
        Ok(self.identity(user_id).await)
    }

    async fn find_identities_by_email(&self, email: &str) -> Result<Vec<Identity>> {
        Ok(self
            .identities
            .read()
            .await
            .values()
            .filter(|identity| identity.email == email)
            .cloned()
            .collect())
    }

    async fn apply_identity_update(&self, user_id: &str, update: &IdentityUpdate) -> Result<bool> {
        let mut identities = self.identities.write().await;
        let Some(identity) = identities.get_mut(user_id) else {
            return Ok(false);
        };
        if update.is_converged(identity) {
            return Ok(false);
        }
        self.admit_write().await?;
        update.apply_to(identity);
        self.record_write();
        Ok(true)
    }
}

#[async_trait]
impl InviteStore for InMemoryPortalStore {
    async fn find_invites_by_email(&self, email: &str) -> Result<Vec<InviteRecord>> {
        Ok(self
            .invites
            .read()
            .await
            .values()
            .filter(|invite| invite.email == email)
            .cloned()
            .collect())
    }

    async fn mark_invite_accepted(&self, invite_id: &str) -> Result<bool> {
        let mut invites = self.invites.write().await;
        match invites.get_mut(invite_id) {
            Some(invite) if invite.status != InviteStatus::Accepted => {
                self.admit_write().await?;
                invite.status = InviteStatus::Accepted;
                self.record_write();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl EmployeeProfileStore for InMemoryPortalStore {
    async fn find_profiles_by_email(&self, email: &str) -> Result<Vec<EmployeeProfile>> {
        Ok(self
            .profiles
            .read()
            .await
            .values()
            .filter(|profile| profile.user_email == email)
            .cloned()
            .collect())
    }

    async fn activate_profile(&self, profile_id: &str) -> Result<bool> {
        let mut profiles = self.profiles.write().await;
        match profiles.get_mut(profile_id) {
            Some(profile) if profile.status != ProfileStatus::Active => {
                self.admit_write().await?;
                profile.status = ProfileStatus::Active;
                self.record_write();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn create_profile_if_absent(&self, profile: &EmployeeProfile) -> Result<bool> {
        let mut profiles = self.profiles.write().await;
        if profiles.contains_key(&profile.profile_id) {
            return Ok(false);
        }
        self.admit_write().await?;
        profiles.insert(profile.profile_id.clone(), profile.clone());
        self.record_write();
        Ok(true)
    }
}
