//! ReconcileInvite: brings identity, invite and employee-profile records for
//! one email into agreement after an acceptance signal.
//!
//! Both portal entry points run this routine. There is no lock across the
//! three entity kinds; every step is a conditional single-record write that
//! is a no-op on already-converged state, so concurrent or repeated runs for
//! the same email converge. Steps run invites -> profiles -> identities, and
//! the first store error aborts the run. The identity write comes last: an
//! identity holding a portal role is treated as fully reconciled by the
//! access fast path, so it must only happen once everything else is done.

use crate::config::ReconcileSettings;
use crate::email::{find_by_email, normalize_email};
use crate::error::Result;
use crate::store::PortalStores;
use crate::types::{
    EmployeeProfile, IdentityUpdate, InviteRecord, InviteStatus, PortalRole, ProfileStatus,
    RoleWriteMode,
};
use chrono::{DateTime, FixedOffset};
use serde::Serialize;

/// Which identities receive the granted portal role.
#[derive(Debug, Clone, Copy)]
pub enum RoleTarget<'a> {
    /// Only the calling identity, and only if it has no portal role yet.
    Caller(&'a str),
    /// Every identity with the email; replaces a differing portal role.
    EveryIdentityWithEmail,
}

#[derive(Debug, Clone, Copy)]
pub struct Reconciliation<'a> {
    /// Email as observed by the caller; normalized internally.
    pub email: &'a str,
    /// Used only when the ledger holds no invite for the email.
    pub fallback_role: PortalRole,
    pub assign_to: RoleTarget<'a>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileSummary {
    #[serde(rename = "role")]
    pub granted_role: Option<PortalRole>,
    #[serde(skip)]
    pub caller_assigned: bool,
    pub identities_updated: usize,
    pub invites_accepted: usize,
    pub profiles_activated: usize,
    #[serde(rename = "created")]
    pub profile_created: bool,
}

/// Role of the most recently issued invite. Invites without a parseable
/// RFC 3339 `created_at` rank last; ties go to the first record.
pub fn newest_granted_role(invites: &[InviteRecord]) -> Option<PortalRole> {
    invites
        .iter()
        .enumerate()
        .max_by(|(ia, a), (ib, b)| {
            issued_at(a)
                .cmp(&issued_at(b))
                .then_with(|| ib.cmp(ia))
        })
        .map(|(_, invite)| invite.granted_role())
}

fn issued_at(invite: &InviteRecord) -> Option<DateTime<FixedOffset>> {
    invite
        .created_at
        .as_deref()
        .and_then(|raw| DateTime::parse_from_rfc3339(raw.trim()).ok())
}

pub async fn reconcile_invite(
    stores: &PortalStores,
    request: Reconciliation<'_>,
    settings: &ReconcileSettings,
) -> Result<ReconcileSummary> {
    let normalized = normalize_email(request.email);
    let mut summary = ReconcileSummary::default();

    // 1. Invite ledger: acceptance is about the person, so every invite follows.
    // The ledger, not the signal that triggered this run, decides the role.
    let invites = find_by_email(request.email, |key| async move {
        stores.invites.find_invites_by_email(&key).await
    })
    .await?;
    let role = newest_granted_role(&invites).unwrap_or(request.fallback_role);
    summary.granted_role = Some(role);

    for invite in invites.iter().filter(|i| i.status != InviteStatus::Accepted) {
        if stores.invites.mark_invite_accepted(&invite.invite_id).await? {
            summary.invites_accepted += 1;
        }
    }

    // 2. Employee profiles
    let profiles = find_by_email(request.email, |key| async move {
        stores.profiles.find_profiles_by_email(&key).await
    })
    .await?;

    if !profiles.is_empty() {
        for profile in profiles.iter().filter(|p| p.status != ProfileStatus::Active) {
            if stores.profiles.activate_profile(&profile.profile_id).await? {
                summary.profiles_activated += 1;
            }
        }
    } else if role == PortalRole::Employee {
        let profile = EmployeeProfile::placeholder(&normalized, &settings.default_position);
        summary.profile_created = stores.profiles.create_profile_if_absent(&profile).await?;
    }

    // 3. Identities
    match request.assign_to {
        RoleTarget::Caller(user_id) => {
            let update = IdentityUpdate::if_unset(role);
            summary.caller_assigned = stores
                .identities
                .apply_identity_update(user_id, &update)
                .await?;
            if summary.caller_assigned {
                summary.identities_updated = 1;
            }
        }
        RoleTarget::EveryIdentityWithEmail => {
            let update = IdentityUpdate {
                portal_role: role,
                mode: RoleWriteMode::Replace,
                baseline_role: Some(settings.baseline_role.clone()),
                display_name: Some(normalized.clone()),
            };
            let identities = find_by_email(request.email, |key| async move {
                stores.identities.find_identities_by_email(&key).await
            })
            .await?;

            for identity in identities {
                if stores
                    .identities
                    .apply_identity_update(&identity.user_id, &update)
                    .await?
                {
                    summary.identities_updated += 1;
                }
            }
        }
    }

    tracing::info!(
        "Reconciled {} as {}: identities={} invites={} profiles_activated={} profile_created={}",
        normalized,
        role,
        summary.identities_updated,
        summary.invites_accepted,
        summary.profiles_activated,
        summary.profile_created
    );

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryPortalStore;
    use crate::types::{Identity, InviteRecord};
    use std::sync::Arc;

    fn invite(id: &str, email: &str, status: InviteStatus) -> InviteRecord {
        InviteRecord {
            invite_id: id.to_string(),
            email: email.to_string(),
            portal_role: Some(PortalRole::Employee),
            status,
            created_at: None,
        }
    }

    fn identity(id: &str, email: &str) -> Identity {
        Identity {
            user_id: id.to_string(),
            email: email.to_string(),
            full_name: None,
            role: None,
            portal_role: None,
        }
    }

    fn every(email: &str) -> Reconciliation<'_> {
        Reconciliation {
            email,
            fallback_role: PortalRole::Employee,
            assign_to: RoleTarget::EveryIdentityWithEmail,
        }
    }

    #[tokio::test]
    async fn test_full_reconcile_then_rerun_is_noop() {
        let store = Arc::new(InMemoryPortalStore::new());
        store.insert_identity(identity("u1", "a@x.com")).await;
        for id in ["i1", "i2", "i3"] {
            store.insert_invite(invite(id, "a@x.com", InviteStatus::Pending)).await;
        }
        let stores = PortalStores::from_store(store.clone());
        let settings = ReconcileSettings::default();

        let summary = reconcile_invite(&stores, every("a@x.com"), &settings).await.unwrap();
        assert_eq!(summary.identities_updated, 1);
        assert_eq!(summary.invites_accepted, 3);
        assert!(summary.profile_created);

        let user = store.identity("u1").await.unwrap();
        assert_eq!(user.portal_role, Some(PortalRole::Employee));
        assert_eq!(user.role.as_deref(), Some("user"));
        assert_eq!(user.full_name.as_deref(), Some("a@x.com"));

        let writes = store.write_count();
        let again = reconcile_invite(&stores, every("a@x.com"), &settings).await.unwrap();
        assert_eq!(
            again,
            ReconcileSummary {
                granted_role: Some(PortalRole::Employee),
                ..ReconcileSummary::default()
            }
        );
        assert_eq!(store.write_count(), writes);
        assert_eq!(store.all_profiles().await.len(), 1);
    }

    #[tokio::test]
    async fn test_partial_failure_converges_on_retry() {
        let store = Arc::new(InMemoryPortalStore::new());
        for id in ["i1", "i2", "i3"] {
            store.insert_invite(invite(id, "a@x.com", InviteStatus::Pending)).await;
        }
        let stores = PortalStores::from_store(store.clone());
        let settings = ReconcileSettings::default();

        store.fail_writes_after(2).await;
        assert!(reconcile_invite(&stores, every("a@x.com"), &settings).await.is_err());
        assert!(store.all_profiles().await.is_empty());

        store.clear_failures().await;
        let summary = reconcile_invite(&stores, every("a@x.com"), &settings).await.unwrap();
        assert_eq!(summary.invites_accepted, 1);
        assert!(summary.profile_created);
        for id in ["i1", "i2", "i3"] {
            assert_eq!(store.invite(id).await.unwrap().status, InviteStatus::Accepted);
        }
    }

    #[tokio::test]
    async fn test_existing_profiles_are_activated_not_duplicated() {
        let store = Arc::new(InMemoryPortalStore::new());
        for (id, status) in [("p1", ProfileStatus::Inactive), ("p2", ProfileStatus::Active)] {
            store
                .insert_profile(EmployeeProfile {
                    profile_id: id.to_string(),
                    user_email: "A@X.com".to_string(),
                    position: Some("Foreman".to_string()),
                    status,
                    created_at: None,
                })
                .await;
        }
        let stores = PortalStores::from_store(store.clone());

        let summary = reconcile_invite(&stores, every("A@X.com"), &ReconcileSettings::default())
            .await
            .unwrap();
        assert_eq!(summary.profiles_activated, 1);
        assert!(!summary.profile_created);
        assert_eq!(store.all_profiles().await.len(), 2);
    }

    #[tokio::test]
    async fn test_customer_invite_creates_no_profile() {
        let store = Arc::new(InMemoryPortalStore::new());
        let stores = PortalStores::from_store(store.clone());
        let request = Reconciliation {
            email: "c@x.com",
            fallback_role: PortalRole::Customer,
            assign_to: RoleTarget::EveryIdentityWithEmail,
        };

        let summary = reconcile_invite(&stores, request, &ReconcileSettings::default())
            .await
            .unwrap();
        assert!(!summary.profile_created);
        assert!(store.all_profiles().await.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_runs_create_one_profile() {
        let store = Arc::new(InMemoryPortalStore::new());
        store.insert_identity(identity("u1", "b@x.com")).await;
        store.insert_invite(invite("i1", "b@x.com", InviteStatus::Pending)).await;
        let stores = PortalStores::from_store(store.clone());
        let settings = ReconcileSettings::default();

        let caller = Reconciliation {
            email: "b@x.com",
            fallback_role: PortalRole::Employee,
            assign_to: RoleTarget::Caller("u1"),
        };
        let (a, b) = tokio::join!(
            reconcile_invite(&stores, caller, &settings),
            reconcile_invite(&stores, every("b@x.com"), &settings),
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(a.invites_accepted + b.invites_accepted, 1);
        assert_eq!(u8::from(a.profile_created) + u8::from(b.profile_created), 1);
        assert_eq!(store.all_profiles().await.len(), 1);
    }

    fn dated(id: &str, role: PortalRole, created_at: Option<&str>) -> InviteRecord {
        InviteRecord {
            portal_role: Some(role),
            created_at: created_at.map(|s| s.to_string()),
            ..invite(id, "a@x.com", InviteStatus::Pending)
        }
    }

    #[test]
    fn test_newest_invite_compares_instants() {
        // 10:00+02:00 is 08:00Z, earlier than 09:00Z despite sorting later as text.
        let invites = vec![
            dated("i1", PortalRole::Employee, Some("2024-06-01T10:00:00+02:00")),
            dated("i2", PortalRole::Customer, Some("2024-06-01T09:00:00Z")),
            dated("i3", PortalRole::Employee, Some("not a timestamp")),
            dated("i4", PortalRole::Employee, None),
        ];
        assert_eq!(newest_granted_role(&invites), Some(PortalRole::Customer));

        let precision = vec![
            dated("i1", PortalRole::Employee, Some("2024-06-01T09:00:00Z")),
            dated("i2", PortalRole::Customer, Some("2024-06-01T09:00:00.250Z")),
        ];
        assert_eq!(newest_granted_role(&precision), Some(PortalRole::Customer));
    }

    #[test]
    fn test_undated_invites_keep_first_record() {
        let undated = vec![
            dated("i1", PortalRole::Customer, None),
            dated("i2", PortalRole::Employee, Some("garbage")),
        ];
        assert_eq!(newest_granted_role(&undated), Some(PortalRole::Customer));
        assert_eq!(newest_granted_role(&[]), None);
    }

    #[tokio::test]
    async fn test_ledger_role_overrides_fallback() {
        let store = Arc::new(InMemoryPortalStore::new());
        store.insert_identity(identity("u1", "a@x.com")).await;
        store
            .insert_invite(dated("i1", PortalRole::Employee, Some("2024-01-01T00:00:00Z")))
            .await;
        store
            .insert_invite(dated("i2", PortalRole::Customer, Some("2024-06-01T00:00:00Z")))
            .await;
        let stores = PortalStores::from_store(store.clone());

        let summary = reconcile_invite(&stores, every("a@x.com"), &ReconcileSettings::default())
            .await
            .unwrap();
        assert_eq!(summary.granted_role, Some(PortalRole::Customer));
        assert!(!summary.profile_created);
        assert_eq!(
            store.identity("u1").await.unwrap().portal_role,
            Some(PortalRole::Customer)
        );
        assert!(store.all_profiles().await.is_empty());
    }
}
