use crate::config::ReconcileSettings;
use crate::email::find_by_email;
use crate::error::{PortalError, Result};
use crate::reconcile::{newest_granted_role, reconcile_invite, Reconciliation, RoleTarget};
use crate::store::PortalStores;
use crate::types::{Identity, IdentityUpdate, PortalRole};
use serde::Serialize;

/// Answer to "may this identity enter the portal, and as what".
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessDecision {
    pub authorized: bool,
    pub role: Option<PortalRole>,
    pub assigned_now: bool,
}

impl AccessDecision {
    fn granted(role: PortalRole, assigned_now: bool) -> Self {
        Self {
            authorized: true,
            role: Some(role),
            assigned_now,
        }
    }

    /// Known to the auth provider but without portal entitlement yet.
    fn no_entitlement() -> Self {
        Self {
            authorized: true,
            role: None,
            assigned_now: false,
        }
    }
}

/// Loads the caller's identity and decides access.
pub async fn check_access_for_user(
    stores: &PortalStores,
    user_id: &str,
    settings: &ReconcileSettings,
) -> Result<AccessDecision> {
    let identity = stores
        .identities
        .get_identity(user_id)
        .await?
        .ok_or_else(|| PortalError::Unauthorized(format!("no identity record for {}", user_id)))?;

    check_access(stores, &identity, settings).await
}

/// Decides portal access for `identity`, lazily assigning a portal role when
/// an invite or an employee profile justifies one.
pub async fn check_access(
    stores: &PortalStores,
    identity: &Identity,
    settings: &ReconcileSettings,
) -> Result<AccessDecision> {
    if let Some(role) = identity.portal_role {
        return Ok(AccessDecision::granted(role, false));
    }

    let invites = find_by_email(&identity.email, |key| async move {
        stores.invites.find_invites_by_email(&key).await
    })
    .await?;

    if let Some(newest) = newest_granted_role(&invites) {
        let summary = reconcile_invite(
            stores,
            Reconciliation {
                email: &identity.email,
                fallback_role: newest,
                assign_to: RoleTarget::Caller(&identity.user_id),
            },
            settings,
        )
        .await?;

        let role = summary.granted_role.unwrap_or(newest);
        if summary.caller_assigned {
            tracing::info!("Assigned portal role {} to {} from invite", role, identity.user_id);
            return Ok(AccessDecision::granted(role, true));
        }
        return settled_decision(stores, &identity.user_id).await;
    }

    let profiles = find_by_email(&identity.email, |key| async move {
        stores.profiles.find_profiles_by_email(&key).await
    })
    .await?;

    if !profiles.is_empty() {
        let assigned = stores
            .identities
            .apply_identity_update(&identity.user_id, &IdentityUpdate::if_unset(PortalRole::Employee))
            .await?;

        if assigned {
            tracing::info!("Assigned portal role employee to {} from profile", identity.user_id);
            return Ok(AccessDecision::granted(PortalRole::Employee, true));
        }
        return settled_decision(stores, &identity.user_id).await;
    }

    tracing::debug!("{} has no portal entitlement", identity.user_id);
    Ok(AccessDecision::no_entitlement())
}

/// Another writer got there first: report whatever role is now stored.
async fn settled_decision(stores: &PortalStores, user_id: &str) -> Result<AccessDecision> {
    let identity = stores
        .identities
        .get_identity(user_id)
        .await?
        .ok_or_else(|| PortalError::Unauthorized(format!("identity {} disappeared", user_id)))?;

    Ok(match identity.portal_role {
        Some(role) => AccessDecision::granted(role, false),
        None => AccessDecision::no_entitlement(),
    })
}
