use lambda_http::{
    http::{Method, StatusCode},
    Body, Error, Request, Response,
};
use portal_shared::access::check_access_for_user;
use portal_shared::error::PortalError;
use portal_shared::http::{json_response, method_not_allowed, not_found, preflight};
use portal_shared::invite_accepted::{handle_invite_accepted, parse_event, InviteAcceptedOutcome};
use portal_shared::{auth, AppState};
use serde_json::json;
use std::sync::Arc;

/// Main Lambda handler - routes portal requests
pub(crate) async fn function_handler(
    event: Request,
    state: Arc<AppState>,
) -> Result<Response<Body>, Error> {
    let method = event.method();
    let path = event.uri().path();
    tracing::info!("Portal API invoked - Method: {} Path: {}", method, path);

    // Handle CORS preflight
    if method == &Method::OPTIONS {
        return preflight();
    }

    match path.trim_end_matches('/') {
        "/portal/access" => match method {
            &Method::GET | &Method::POST => portal_access(&event, &state).await,
            _ => method_not_allowed(),
        },
        "/portal/invite-accepted" => match method {
            &Method::POST => invite_accepted(&event, &state).await,
            _ => method_not_allowed(),
        },
        _ => {
            tracing::warn!("No route matched - Method: {} Path: {}", method, path);
            not_found()
        }
    }
}

/// GET /portal/access - decide portal entry for the caller
async fn portal_access(event: &Request, state: &AppState) -> Result<Response<Body>, Error> {
    let Some(user_id) = auth::caller_user_id(event, &state.config) else {
        tracing::warn!("Portal access without an authenticated caller");
        return json_response(StatusCode::UNAUTHORIZED, &json!({"authorized": false}));
    };

    match check_access_for_user(&state.stores, &user_id, &state.config.reconcile).await {
        Ok(decision) => json_response(StatusCode::OK, &decision),
        Err(PortalError::Unauthorized(reason)) => {
            tracing::warn!("Portal access denied for {}: {}", user_id, reason);
            json_response(StatusCode::UNAUTHORIZED, &json!({"authorized": false}))
        }
        Err(e) => {
            tracing::error!("Portal access check failed for {}: {}", user_id, e);
            json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &json!({"authorized": false, "error": e.to_string()}),
            )
        }
    }
}

/// POST /portal/invite-accepted - invite record flipped to accepted
async fn invite_accepted(event: &Request, state: &AppState) -> Result<Response<Body>, Error> {
    if !auth::webhook_secret_matches(event, &state.config) {
        tracing::warn!("Invite event rejected: webhook secret mismatch");
        return json_response(StatusCode::UNAUTHORIZED, &json!({"error": "Unauthorized"}));
    }

    let invite_event = match parse_event(event.body()) {
        Ok(invite_event) => invite_event,
        Err(reason) => {
            return json_response(StatusCode::OK, &InviteAcceptedOutcome::skipped(reason));
        }
    };

    match handle_invite_accepted(&state.stores, &invite_event, &state.config.reconcile).await {
        Ok(outcome) => json_response(StatusCode::OK, &outcome),
        Err(e) => {
            tracing::error!("Invite acceptance failed: {}", e);
            json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &json!({"error": e.to_string()}),
            )
        }
    }
}
