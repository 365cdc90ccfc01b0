use crate::config::ReconcileSettings;
use crate::error::Result;
use crate::reconcile::{reconcile_invite, ReconcileSummary, Reconciliation, RoleTarget};
use crate::store::PortalStores;
use crate::types::{InviteStatus, PortalRole};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Entity-update notification for an invite record.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InviteAcceptedEvent {
    #[serde(default)]
    pub event: EventMeta,
    #[serde(default)]
    pub data: InviteState,
    #[serde(default)]
    pub old_data: Option<InviteState>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventMeta {
    #[serde(rename = "type", default)]
    pub kind: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InviteState {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(rename = "portalRole", alias = "portal_role", default)]
    pub portal_role: Option<String>,
}

impl InviteAcceptedEvent {
    fn is_update(&self) -> bool {
        matches!(
            self.event.kind.trim().to_ascii_lowercase().as_str(),
            "update" | "modify"
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotAnUpdate,
    NotAccepted,
    AlreadyAccepted,
    MissingEmail,
    UnknownRole,
    MalformedEvent,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotAnUpdate => "not an update event",
            Self::NotAccepted => "status is not accepted",
            Self::AlreadyAccepted => "already accepted",
            Self::MissingEmail => "missing email",
            Self::UnknownRole => "unknown portal role",
            Self::MalformedEvent => "malformed event",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for SkipReason {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Result of handling one event: `{skipped, reason}` or `{success, ...counts}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum InviteAcceptedOutcome {
    Skipped { skipped: bool, reason: SkipReason },
    Applied {
        success: bool,
        #[serde(flatten)]
        summary: ReconcileSummary,
    },
}

impl InviteAcceptedOutcome {
    pub fn skipped(reason: SkipReason) -> Self {
        Self::Skipped {
            skipped: true,
            reason,
        }
    }

    fn applied(summary: ReconcileSummary) -> Self {
        Self::Applied {
            success: true,
            summary,
        }
    }
}

/// Guard sequence. `Ok` carries the email and the event's role, which only
/// applies when no invite for the email is on record.
fn admit(event: &InviteAcceptedEvent) -> std::result::Result<(String, PortalRole), SkipReason> {
    if !event.is_update() {
        return Err(SkipReason::NotAnUpdate);
    }

    let status = event.data.status.as_deref().map(InviteStatus::parse);
    if status != Some(InviteStatus::Accepted) {
        return Err(SkipReason::NotAccepted);
    }

    // Redelivered updates carry an accepted previous state.
    let previous = event
        .old_data
        .as_ref()
        .and_then(|old| old.status.as_deref())
        .map(InviteStatus::parse);
    if previous == Some(InviteStatus::Accepted) {
        return Err(SkipReason::AlreadyAccepted);
    }

    let email = event
        .data
        .email
        .as_deref()
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .ok_or(SkipReason::MissingEmail)?;

    let role = match event.data.portal_role.as_deref().map(str::trim) {
        None | Some("") => PortalRole::Employee,
        Some(raw) => PortalRole::parse(raw).ok_or(SkipReason::UnknownRole)?,
    };

    Ok((email.to_string(), role))
}

/// Authoritative role assignment after an invite flips to accepted.
pub async fn handle_invite_accepted(
    stores: &PortalStores,
    event: &InviteAcceptedEvent,
    settings: &ReconcileSettings,
) -> Result<InviteAcceptedOutcome> {
    let (email, role) = match admit(event) {
        Ok(admitted) => admitted,
        Err(reason) => {
            tracing::info!("Invite event skipped: {}", reason);
            return Ok(InviteAcceptedOutcome::skipped(reason));
        }
    };

    let summary = reconcile_invite(
        stores,
        Reconciliation {
            email: &email,
            fallback_role: role,
            assign_to: RoleTarget::EveryIdentityWithEmail,
        },
        settings,
    )
    .await?;

    Ok(InviteAcceptedOutcome::applied(summary))
}

/// Parses a raw request body. Malformed bodies become a skipped outcome.
pub fn parse_event(body: &[u8]) -> std::result::Result<InviteAcceptedEvent, SkipReason> {
    serde_json::from_slice(body).map_err(|e| {
        tracing::warn!("Malformed invite event: {}", e);
        SkipReason::MalformedEvent
    })
}
