use serde::{Deserialize, Serialize};
use std::fmt;

// ========== PORTAL ROLE ==========
/// Capability class that decides which portal dashboard an identity lands on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortalRole {
    Employee,
    Customer,
}

impl PortalRole {
    /// Lenient parse used for stored and event values. Unknown strings are `None`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "employee" => Some(Self::Employee),
            "customer" => Some(Self::Customer),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Employee => "employee",
            Self::Customer => "customer",
        }
    }
}

impl fmt::Display for PortalRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ========== IDENTITY ==========
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Identity {
    pub user_id: String,
    pub email: String,
    pub full_name: Option<String>,
    pub role: Option<String>, // site-wide privilege: admin | user
    pub portal_role: Option<PortalRole>,
}

/// How an identity's portal role may be written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleWriteMode {
    /// Write only when the identity carries no recognized portal role.
    IfUnset,
    /// Write whenever the stored portal role differs.
    Replace,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IdentityUpdate {
    pub portal_role: PortalRole,
    pub mode: RoleWriteMode,
    /// Applied only when the identity has no site-wide role yet.
    pub baseline_role: Option<String>,
    /// Applied only when the identity has no display name yet.
    pub display_name: Option<String>,
}

impl IdentityUpdate {
    pub fn if_unset(portal_role: PortalRole) -> Self {
        Self {
            portal_role,
            mode: RoleWriteMode::IfUnset,
            baseline_role: None,
            display_name: None,
        }
    }

    /// True when applying this update to `identity` would change nothing.
    pub fn is_converged(&self, identity: &Identity) -> bool {
        match self.mode {
            RoleWriteMode::IfUnset => identity.portal_role.is_some(),
            RoleWriteMode::Replace => {
                identity.portal_role == Some(self.portal_role)
                    && (self.baseline_role.is_none() || identity.role.is_some())
                    && (self.display_name.is_none() || identity.full_name.is_some())
            }
        }
    }

    /// Applies the update to an in-memory copy. Returns false if nothing changed.
    pub fn apply_to(&self, identity: &mut Identity) -> bool {
        if self.is_converged(identity) {
            return false;
        }
        identity.portal_role = Some(self.portal_role);
        if self.mode == RoleWriteMode::Replace {
            if identity.role.is_none() {
                identity.role = self.baseline_role.clone();
            }
            if identity.full_name.is_none() {
                identity.full_name = self.display_name.clone();
            }
        }
        true
    }
}

// ========== INVITE ==========
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InviteStatus {
    Pending,
    Accepted,
}

impl InviteStatus {
    pub fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("accepted") {
            Self::Accepted
        } else {
            Self::Pending
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct InviteRecord {
    pub invite_id: String,
    pub email: String,
    pub portal_role: Option<PortalRole>,
    pub status: InviteStatus,
    pub created_at: Option<String>,
}

impl InviteRecord {
    /// Role granted on acceptance. Invites issued without one grant employee.
    pub fn granted_role(&self) -> PortalRole {
        self.portal_role.unwrap_or(PortalRole::Employee)
    }
}

// ========== EMPLOYEE PROFILE ==========
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileStatus {
    Active,
    Inactive,
}

impl ProfileStatus {
    pub fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("active") {
            Self::Active
        } else {
            Self::Inactive
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct EmployeeProfile {
    pub profile_id: String,
    pub user_email: String,
    pub position: Option<String>,
    pub status: ProfileStatus,
    pub created_at: Option<String>,
}

impl EmployeeProfile {
    /// Placeholder profile created when an employee invite is accepted and no
    /// profile exists. Keyed by the normalized email so two creators collide.
    pub fn placeholder(normalized_email: &str, position: &str) -> Self {
        Self {
            profile_id: normalized_email.to_string(),
            user_email: normalized_email.to_string(),
            position: Some(position.to_string()),
            status: ProfileStatus::Active,
            created_at: Some(chrono::Utc::now().to_rfc3339()),
        }
    }
}
