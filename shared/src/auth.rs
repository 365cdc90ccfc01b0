use crate::config::Config;
use lambda_http::{Request, RequestExt};

/// Caller user id: the JWT `sub` claim from the API Gateway authorizer, or the
/// `X-User-Id` header when the dev override is enabled.
pub fn caller_user_id(event: &Request, config: &Config) -> Option<String> {
    let from_header = || {
        event
            .headers()
            .get("X-User-Id")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    };

    let from_jwt = event
        .request_context_ref()
        .and_then(|ctx| ctx.authorizer())
        .and_then(|auth| auth.jwt.as_ref())
        .and_then(|jwt| jwt.claims.get("sub"))
        .map(|s| s.to_string());

    match from_jwt {
        Some(user_id) => Some(user_id),
        None if config.allow_dev_user_header => from_header(),
        None => None,
    }
}

/// Checks the invite webhook secret. Always passes when no secret is configured.
pub fn webhook_secret_matches(event: &Request, config: &Config) -> bool {
    let Some(expected) = config.invite_webhook_secret.as_deref() else {
        return true;
    };

    event
        .headers()
        .get("X-Webhook-Secret")
        .and_then(|v| v.to_str().ok())
        .map(|provided| constant_time_eq(provided.as_bytes(), expected.as_bytes()))
        .unwrap_or(false)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    use subtle::ConstantTimeEq;
    a.ct_eq(b).into()
}
