use aws_lambda_events::event::dynamodb::{Event, EventRecord};
use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use portal_shared::config::ReconcileSettings;
use portal_shared::error::PortalError;
use portal_shared::invite_accepted::{
    handle_invite_accepted, EventMeta, InviteAcceptedEvent, InviteAcceptedOutcome, InviteState,
};
use portal_shared::store::PortalStores;
use portal_shared::AppState;
use serde_json::Value;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .without_time()
        .init();

    let state = AppState::from_env().await;

    run(service_fn(move |event: LambdaEvent<Event>| {
        let state = Arc::clone(&state);
        async move { function_handler(event, state).await }
    }))
    .await
}

async fn function_handler(event: LambdaEvent<Event>, state: Arc<AppState>) -> Result<(), Error> {
    let total = event.payload.records.len();
    tracing::info!("DynamoDB Stream event received with {} records", total);

    // Every record is attempted; a failure fails the batch so it is redelivered.
    let mut failed = 0;
    for record in &event.payload.records {
        if let Err(e) = process_record(record, &state.stores, &state.config.reconcile).await {
            tracing::error!("Failed to process record {:?}: {}", record.event_id, e);
            failed += 1;
        }
    }

    if failed > 0 {
        return Err(format!("{} of {} invite records failed", failed, total).into());
    }
    Ok(())
}

async fn process_record(
    record: &EventRecord,
    stores: &PortalStores,
    settings: &ReconcileSettings,
) -> Result<Option<InviteAcceptedOutcome>, PortalError> {
    let new_image = serde_json::to_value(&record.change.new_image)
        .map_err(|e| PortalError::InvalidRecord(format!("NewImage: {}", e)))?;
    let old_image = serde_json::to_value(&record.change.old_image)
        .map_err(|e| PortalError::InvalidRecord(format!("OldImage: {}", e)))?;

    process_invite_change(stores, settings, &record.event_name, &new_image, &old_image).await
}

/// Runs the invite handler for one stream change. Non-invite items are ignored.
async fn process_invite_change(
    stores: &PortalStores,
    settings: &ReconcileSettings,
    event_name: &str,
    new_image: &Value,
    old_image: &Value,
) -> Result<Option<InviteAcceptedOutcome>, PortalError> {
    let Some(invite_event) = invite_event_from_images(event_name, new_image, old_image) else {
        return Ok(None);
    };

    tracing::info!("Processing {} event for invite", event_name);
    let outcome = handle_invite_accepted(stores, &invite_event, settings).await?;
    Ok(Some(outcome))
}

/// Maps a stream change onto the invite event shape. `None` for non-invite items.
fn invite_event_from_images(
    event_name: &str,
    new_image: &Value,
    old_image: &Value,
) -> Option<InviteAcceptedEvent> {
    // For REMOVE events, new_image is empty; use old_image instead
    let image = if is_empty_image(new_image) {
        old_image
    } else {
        new_image
    };

    let pk = attr_str(image, "PK")?;
    if !pk.starts_with("INVITE#") {
        return None;
    }

    let kind = match event_name {
        "INSERT" => "create",
        "MODIFY" => "update",
        "REMOVE" => "delete",
        other => other,
    };

    Some(InviteAcceptedEvent {
        event: EventMeta {
            kind: kind.to_string(),
        },
        data: invite_state(new_image),
        old_data: (!is_empty_image(old_image)).then(|| invite_state(old_image)),
    })
}

fn invite_state(image: &Value) -> InviteState {
    InviteState {
        status: attr_str(image, "status"),
        email: attr_str(image, "email"),
        portal_role: attr_str(image, "portal_role"),
    }
}

fn is_empty_image(image: &Value) -> bool {
    image.as_object().map(|m| m.is_empty()).unwrap_or(true)
}

/// String attribute from a stream image, in either `{"S": "..."}` or plain form.
fn attr_str(image: &Value, key: &str) -> Option<String> {
    match image.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Object(typed) => typed.get("S").and_then(|v| v.as_str()).map(|s| s.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portal_shared::store::memory::InMemoryPortalStore;
    use portal_shared::types::{InviteRecord, InviteStatus, PortalRole};
    use serde_json::json;

    fn invite_image(status: &str) -> Value {
        json!({
            "PK": {"S": "INVITE#i1"},
            "SK": {"S": "METADATA"},
            "email": {"S": "f@x.com"},
            "portal_role": {"S": "employee"},
            "status": {"S": status}
        })
    }

    #[test]
    fn test_modify_maps_to_update_event() {
        let event = invite_event_from_images("MODIFY", &invite_image("accepted"), &invite_image("pending")).unwrap();
        assert_eq!(event.event.kind, "update");
        assert_eq!(event.data.status.as_deref(), Some("accepted"));
        assert_eq!(event.data.email.as_deref(), Some("f@x.com"));
        assert_eq!(event.data.portal_role.as_deref(), Some("employee"));
        assert_eq!(event.old_data.unwrap().status.as_deref(), Some("pending"));
    }

    #[test]
    fn test_insert_has_no_previous_state() {
        let event = invite_event_from_images("INSERT", &invite_image("pending"), &json!({})).unwrap();
        assert_eq!(event.event.kind, "create");
        assert!(event.old_data.is_none());
    }

    #[test]
    fn test_non_invite_items_are_ignored() {
        let user = json!({"PK": {"S": "USER#u1"}, "email": {"S": "f@x.com"}});
        assert!(invite_event_from_images("MODIFY", &user, &user).is_none());
        assert!(invite_event_from_images("MODIFY", &json!({}), &json!({})).is_none());
    }

    #[test]
    fn test_plain_string_attributes() {
        assert_eq!(attr_str(&json!({"PK": "INVITE#x"}), "PK").as_deref(), Some("INVITE#x"));
        assert_eq!(attr_str(&json!({"n": {"N": "1"}}), "n"), None);
    }

    #[tokio::test]
    async fn test_accepted_change_reconciles_and_redelivery_is_skipped() {
        let store = Arc::new(InMemoryPortalStore::new());
        store
            .insert_invite(InviteRecord {
                invite_id: "i2".to_string(),
                email: "f@x.com".to_string(),
                portal_role: Some(PortalRole::Employee),
                status: InviteStatus::Pending,
                created_at: None,
            })
            .await;
        let stores = PortalStores::from_store(store.clone());
        let settings = ReconcileSettings::default();

        let outcome = process_invite_change(
            &stores,
            &settings,
            "MODIFY",
            &invite_image("accepted"),
            &invite_image("pending"),
        )
        .await
        .unwrap()
        .unwrap();
        assert!(matches!(outcome, InviteAcceptedOutcome::Applied { .. }));
        assert_eq!(store.invite("i2").await.unwrap().status, InviteStatus::Accepted);
        assert_eq!(store.all_profiles().await.len(), 1);

        let writes = store.write_count();
        let outcome = process_invite_change(
            &stores,
            &settings,
            "MODIFY",
            &invite_image("accepted"),
            &invite_image("accepted"),
        )
        .await
        .unwrap()
        .unwrap();
        assert!(matches!(outcome, InviteAcceptedOutcome::Skipped { .. }));
        assert_eq!(store.write_count(), writes);
    }
}
