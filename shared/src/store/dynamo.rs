use super::{EmployeeProfileStore, IdentityStore, InviteStore};
use crate::error::{PortalError, Result};
use crate::types::{
    EmployeeProfile, Identity, IdentityUpdate, InviteRecord, InviteStatus, PortalRole,
    ProfileStatus, RoleWriteMode,
};
use async_trait::async_trait;
use aws_sdk_dynamodb::error::{DisplayErrorContext, SdkError};
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client as DynamoClient;
use chrono::Utc;
use std::collections::HashMap;

type Item = HashMap<String, AttributeValue>;

const USER_PREFIX: &str = "USER#";
const INVITE_PREFIX: &str = "INVITE#";
const EMPLOYEE_PREFIX: &str = "EMPLOYEE#";
const INVITE_SK: &str = "METADATA";
const PROFILE_SK: &str = "PROFILE";

const ENTITY_USER: &str = "user";
const ENTITY_INVITE: &str = "invite";
const ENTITY_PROFILE: &str = "employee_profile";

const IDENTITY_WRITE_ATTEMPTS: usize = 3;

/// Single-table DynamoDB store.
///
/// Items carry `PK`/`SK`, an `entity_type`, and an `email` attribute that a
/// GSI (`email_index`) is keyed on:
/// - identity: `USER#{id}` / `USER#{id}`
/// - invite: `INVITE#{id}` / `METADATA`
/// - employee profile: `EMPLOYEE#{id}` / `PROFILE`
pub struct DynamoPortalStore {
    client: DynamoClient,
    table_name: String,
    email_index: String,
}

impl DynamoPortalStore {
    pub fn new(client: DynamoClient, table_name: &str, email_index: &str) -> Self {
        Self {
            client,
            table_name: table_name.to_string(),
            email_index: email_index.to_string(),
        }
    }

    async fn identity_item(&self, user_id: &str, consistent: bool) -> Result<Option<Item>> {
        let pk = format!("{}{}", USER_PREFIX, user_id);

        let result = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key("PK", AttributeValue::S(pk.clone()))
            .key("SK", AttributeValue::S(pk))
            .consistent_read(consistent)
            .send()
            .await
            .map_err(|e| store_error("get identity", e))?;

        Ok(result.item().cloned())
    }

    /// Paginated equality lookup on the email index, filtered to one entity type.
    async fn query_by_email(&self, entity_type: &str, email: &str) -> Result<Vec<Item>> {
        let mut items = Vec::new();
        let mut start_key: Option<Item> = None;

        loop {
            let output = self
                .client
                .query()
                .table_name(&self.table_name)
                .index_name(&self.email_index)
                .key_condition_expression("#email = :email")
                .filter_expression("entity_type = :entity_type")
                .expression_attribute_names("#email", "email")
                .expression_attribute_values(":email", AttributeValue::S(email.to_string()))
                .expression_attribute_values(
                    ":entity_type",
                    AttributeValue::S(entity_type.to_string()),
                )
                .set_exclusive_start_key(start_key.take())
                .send()
                .await
                .map_err(|e| store_error("query by email", e))?;

            items.extend(output.items().iter().cloned());

            match output.last_evaluated_key() {
                Some(key) if !key.is_empty() => start_key = Some(key.clone()),
                _ => break,
            }
        }

        tracing::debug!("{} {} item(s) found for {}", items.len(), entity_type, email);
        Ok(items)
    }
}

#[async_trait]
impl IdentityStore for DynamoPortalStore {
    async fn get_identity(&self, user_id: &str) -> Result<Option<Identity>> {
        self.identity_item(user_id, false)
            .await?
            .as_ref()
            .map(identity_from_item)
            .transpose()
    }

    async fn find_identities_by_email(&self, email: &str) -> Result<Vec<Identity>> {
        self.query_by_email(ENTITY_USER, email)
            .await?
            .iter()
            .map(identity_from_item)
            .collect()
    }

    /// Read, decide with the same rules as the in-memory store, then write
    /// only if `portal_role` still holds the exact stored value that was read.
    async fn apply_identity_update(&self, user_id: &str, update: &IdentityUpdate) -> Result<bool> {
        let pk = format!("{}{}", USER_PREFIX, user_id);

        for attempt in 1..=IDENTITY_WRITE_ATTEMPTS {
            let Some(item) = self.identity_item(user_id, true).await? else {
                return Ok(false);
            };
            let Some(write) = plan_identity_write(update, &item)? else {
                tracing::debug!("Identity {} already converged", user_id);
                return Ok(false);
            };

            let result = self
                .client
                .update_item()
                .table_name(&self.table_name)
                .key("PK", AttributeValue::S(pk.clone()))
                .key("SK", AttributeValue::S(pk.clone()))
                .update_expression(write.update_expression())
                .condition_expression(write.condition)
                .set_expression_attribute_names((!write.names.is_empty()).then_some(write.names))
                .set_expression_attribute_values(Some(write.values))
                .send()
                .await;

            match result {
                Ok(_) => return Ok(true),
                Err(e)
                    if e
                        .as_service_error()
                        .map(|se| se.is_conditional_check_failed_exception())
                        .unwrap_or(false) =>
                {
                    tracing::debug!("Identity {} changed underneath update (attempt {})", user_id, attempt);
                }
                Err(e) => return Err(store_error("update identity", e)),
            }
        }

        Err(PortalError::Store(format!(
            "identity {} kept changing during portal role update",
            user_id
        )))
    }
}

#[async_trait]
impl InviteStore for DynamoPortalStore {
    async fn find_invites_by_email(&self, email: &str) -> Result<Vec<InviteRecord>> {
        self.query_by_email(ENTITY_INVITE, email)
            .await?
            .iter()
            .map(invite_from_item)
            .collect()
    }

    async fn mark_invite_accepted(&self, invite_id: &str) -> Result<bool> {
        let result = self
            .client
            .update_item()
            .table_name(&self.table_name)
            .key("PK", AttributeValue::S(format!("{}{}", INVITE_PREFIX, invite_id)))
            .key("SK", AttributeValue::S(INVITE_SK.to_string()))
            .update_expression("SET #status = :accepted, accepted_at = :now")
            .condition_expression(
                "attribute_exists(PK) AND (attribute_not_exists(#status) OR #status <> :accepted)",
            )
            .expression_attribute_names("#status", "status")
            .expression_attribute_values(
                ":accepted",
                AttributeValue::S(InviteStatus::Accepted.as_str().to_string()),
            )
            .expression_attribute_values(":now", AttributeValue::S(Utc::now().to_rfc3339()))
            .send()
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(e)
                if e
                    .as_service_error()
                    .map(|se| se.is_conditional_check_failed_exception())
                    .unwrap_or(false) =>
            {
                Ok(false)
            }
            Err(e) => Err(store_error("mark invite accepted", e)),
        }
    }
}

#[async_trait]
impl EmployeeProfileStore for DynamoPortalStore {
    async fn find_profiles_by_email(&self, email: &str) -> Result<Vec<EmployeeProfile>> {
        self.query_by_email(ENTITY_PROFILE, email)
            .await?
            .iter()
            .map(profile_from_item)
            .collect()
    }

    async fn activate_profile(&self, profile_id: &str) -> Result<bool> {
        let result = self
            .client
            .update_item()
            .table_name(&self.table_name)
            .key("PK", AttributeValue::S(format!("{}{}", EMPLOYEE_PREFIX, profile_id)))
            .key("SK", AttributeValue::S(PROFILE_SK.to_string()))
            .update_expression("SET #status = :active, updated_at = :now")
            .condition_expression(
                "attribute_exists(PK) AND (attribute_not_exists(#status) OR #status <> :active)",
            )
            .expression_attribute_names("#status", "status")
            .expression_attribute_values(
                ":active",
                AttributeValue::S(ProfileStatus::Active.as_str().to_string()),
            )
            .expression_attribute_values(":now", AttributeValue::S(Utc::now().to_rfc3339()))
            .send()
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(e)
                if e
                    .as_service_error()
                    .map(|se| se.is_conditional_check_failed_exception())
                    .unwrap_or(false) =>
            {
                Ok(false)
            }
            Err(e) => Err(store_error("activate profile", e)),
        }
    }

    async fn create_profile_if_absent(&self, profile: &EmployeeProfile) -> Result<bool> {
        let mut put_request = self
            .client
            .put_item()
            .table_name(&self.table_name)
            .item("PK", AttributeValue::S(format!("{}{}", EMPLOYEE_PREFIX, profile.profile_id)))
            .item("SK", AttributeValue::S(PROFILE_SK.to_string()))
            .item("entity_type", AttributeValue::S(ENTITY_PROFILE.to_string()))
            .item("email", AttributeValue::S(profile.user_email.clone()))
            .item("status", AttributeValue::S(profile.status.as_str().to_string()))
            .condition_expression("attribute_not_exists(PK)");

        if let Some(position) = &profile.position {
            put_request = put_request.item("position", AttributeValue::S(position.clone()));
        }
        if let Some(created_at) = &profile.created_at {
            put_request = put_request.item("created_at", AttributeValue::S(created_at.clone()));
        }

        match put_request.send().await {
            Ok(_) => {
                tracing::info!("Employee profile created for {}", profile.user_email);
                Ok(true)
            }
            Err(e)
                if e
                    .as_service_error()
                    .map(|se| se.is_conditional_check_failed_exception())
                    .unwrap_or(false) =>
            {
                Ok(false)
            }
            Err(e) => Err(store_error("create profile", e)),
        }
    }
}

fn store_error<E, R>(operation: &str, err: SdkError<E, R>) -> PortalError
where
    E: std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let message = format!("Failed to {}: {}", operation, DisplayErrorContext(err));
    tracing::error!("{}", message);
    PortalError::Store(message)
}

/// Conditional identity update derived from one read of the item.
#[derive(Debug)]
struct IdentityWrite {
    sets: Vec<&'static str>,
    condition: &'static str,
    names: HashMap<String, String>,
    values: Item,
}

impl IdentityWrite {
    fn update_expression(&self) -> String {
        format!("SET {}", self.sets.join(", "))
    }
}

/// `None` when `update` is already converged for the stored item. The stored
/// `portal_role` is interpreted by the same lenient parser reads use, and the
/// condition pins whatever raw value was observed.
fn plan_identity_write(update: &IdentityUpdate, item: &Item) -> Result<Option<IdentityWrite>> {
    let identity = identity_from_item(item)?;
    if update.is_converged(&identity) {
        return Ok(None);
    }

    let mut sets = vec!["portal_role = :portal_role", "updated_at = :now"];
    let mut names = HashMap::new();
    let mut values: Item = HashMap::from([
        (
            ":portal_role".to_string(),
            AttributeValue::S(update.portal_role.as_str().to_string()),
        ),
        (":now".to_string(), AttributeValue::S(Utc::now().to_rfc3339())),
    ]);

    let condition = match item.get("portal_role") {
        Some(observed) => {
            values.insert(":observed".to_string(), observed.clone());
            "attribute_exists(PK) AND portal_role = :observed"
        }
        None => "attribute_exists(PK) AND attribute_not_exists(portal_role)",
    };

    if update.mode == RoleWriteMode::Replace {
        if let Some(baseline) = &update.baseline_role {
            sets.push("#role = if_not_exists(#role, :baseline_role)");
            names.insert("#role".to_string(), "role".to_string());
            values.insert(":baseline_role".to_string(), AttributeValue::S(baseline.clone()));
        }
        if let Some(display_name) = &update.display_name {
            sets.push("full_name = if_not_exists(full_name, :display_name)");
            values.insert(":display_name".to_string(), AttributeValue::S(display_name.clone()));
        }
    }

    Ok(Some(IdentityWrite {
        sets,
        condition,
        names,
        values,
    }))
}

fn attr_s(item: &Item, key: &str) -> Option<String> {
    item.get(key)
        .and_then(|v| v.as_s().ok())
        .map(|s| s.to_string())
}

fn id_from_pk(item: &Item, prefix: &str) -> Result<String> {
    let pk = attr_s(item, "PK").ok_or_else(|| PortalError::InvalidRecord("item without PK".to_string()))?;
    pk.strip_prefix(prefix)
        .map(|id| id.to_string())
        .ok_or_else(|| PortalError::InvalidRecord(format!("unexpected key {}", pk)))
}

fn identity_from_item(item: &Item) -> Result<Identity> {
    Ok(Identity {
        user_id: id_from_pk(item, USER_PREFIX)?,
        email: attr_s(item, "email").unwrap_or_default(),
        full_name: attr_s(item, "full_name"),
        role: attr_s(item, "role"),
        portal_role: attr_s(item, "portal_role").and_then(|r| PortalRole::parse(&r)),
    })
}

fn invite_from_item(item: &Item) -> Result<InviteRecord> {
    Ok(InviteRecord {
        invite_id: id_from_pk(item, INVITE_PREFIX)?,
        email: attr_s(item, "email").unwrap_or_default(),
        portal_role: attr_s(item, "portal_role").and_then(|r| PortalRole::parse(&r)),
        status: attr_s(item, "status")
            .map(|s| InviteStatus::parse(&s))
            .unwrap_or(InviteStatus::Pending),
        created_at: attr_s(item, "created_at"),
    })
}

fn profile_from_item(item: &Item) -> Result<EmployeeProfile> {
    Ok(EmployeeProfile {
        profile_id: id_from_pk(item, EMPLOYEE_PREFIX)?,
        user_email: attr_s(item, "email").unwrap_or_default(),
        position: attr_s(item, "position"),
        status: attr_s(item, "status")
            .map(|s| ProfileStatus::parse(&s))
            .unwrap_or(ProfileStatus::Inactive),
        created_at: attr_s(item, "created_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(pairs: &[(&str, &str)]) -> Item {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), AttributeValue::S(v.to_string())))
            .collect()
    }

    #[test]
    fn test_identity_from_item() {
        let identity = identity_from_item(&item(&[
            ("PK", "USER#abc"),
            ("SK", "USER#abc"),
            ("email", "Jane@Co.com"),
            ("role", "user"),
            ("portal_role", "Customer"),
        ]))
        .unwrap();
        assert_eq!(identity.user_id, "abc");
        assert_eq!(identity.email, "Jane@Co.com");
        assert_eq!(identity.full_name, None);
        assert_eq!(identity.portal_role, Some(PortalRole::Customer));
    }

    #[test]
    fn test_unrecognized_portal_role_reads_as_unset() {
        let identity = identity_from_item(&item(&[("PK", "USER#abc"), ("portal_role", "vendor")])).unwrap();
        assert_eq!(identity.portal_role, None);
    }

    #[test]
    fn test_invite_from_item_defaults_to_pending() {
        let invite = invite_from_item(&item(&[("PK", "INVITE#i1"), ("email", "a@x.com")])).unwrap();
        assert_eq!(invite.invite_id, "i1");
        assert_eq!(invite.status, InviteStatus::Pending);
        assert_eq!(invite.granted_role(), PortalRole::Employee);
    }

    fn replace(role: PortalRole) -> IdentityUpdate {
        IdentityUpdate {
            portal_role: role,
            mode: RoleWriteMode::Replace,
            baseline_role: Some("user".to_string()),
            display_name: Some("a@x.com".to_string()),
        }
    }

    #[test]
    fn test_mixed_case_stored_role_is_converged() {
        let stored = item(&[
            ("PK", "USER#u1"),
            ("role", "user"),
            ("full_name", "Ann"),
            ("portal_role", "Customer"),
        ]);
        let if_unset = IdentityUpdate::if_unset(PortalRole::Employee);
        assert!(plan_identity_write(&if_unset, &stored).unwrap().is_none());
        assert!(plan_identity_write(&replace(PortalRole::Customer), &stored).unwrap().is_none());

        let write = plan_identity_write(&replace(PortalRole::Employee), &stored)
            .unwrap()
            .unwrap();
        assert_eq!(write.condition, "attribute_exists(PK) AND portal_role = :observed");
        assert_eq!(write.values[":observed"], AttributeValue::S("Customer".to_string()));
        assert_eq!(write.values[":portal_role"], AttributeValue::S("employee".to_string()));
    }

    #[test]
    fn test_unset_role_write_requires_absent_attribute() {
        let write = plan_identity_write(
            &IdentityUpdate::if_unset(PortalRole::Customer),
            &item(&[("PK", "USER#u1")]),
        )
        .unwrap()
        .unwrap();
        assert_eq!(write.condition, "attribute_exists(PK) AND attribute_not_exists(portal_role)");
        assert!(!write.values.contains_key(":observed"));
        assert!(write.names.is_empty());
        assert_eq!(write.update_expression(), "SET portal_role = :portal_role, updated_at = :now");
    }

    #[test]
    fn test_unrecognized_stored_role_is_pinned_when_overwritten() {
        let write = plan_identity_write(
            &IdentityUpdate::if_unset(PortalRole::Employee),
            &item(&[("PK", "USER#u1"), ("portal_role", "vendor")]),
        )
        .unwrap()
        .unwrap();
        assert_eq!(write.values[":observed"], AttributeValue::S("vendor".to_string()));
    }

    #[test]
    fn test_replace_fills_missing_names_only_via_if_not_exists() {
        let write = plan_identity_write(
            &replace(PortalRole::Employee),
            &item(&[("PK", "USER#u1"), ("portal_role", "employee")]),
        )
        .unwrap()
        .unwrap();
        assert_eq!(
            write.update_expression(),
            "SET portal_role = :portal_role, updated_at = :now, #role = if_not_exists(#role, :baseline_role), full_name = if_not_exists(full_name, :display_name)"
        );
        assert_eq!(write.names["#role"], "role");
    }

    #[test]
    fn test_profile_with_wrong_key_is_rejected() {
        let result = profile_from_item(&item(&[("PK", "USER#abc"), ("email", "a@x.com")]));
        assert!(matches!(result, Err(PortalError::InvalidRecord(_))));
    }
}
