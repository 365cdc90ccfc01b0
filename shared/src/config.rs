use std::env;

/// Runtime configuration, read once per cold start.
#[derive(Debug, Clone)]
pub struct Config {
    pub table_name: String,
    pub email_index: String,
    /// Honour `X-User-Id` as the caller. Local development only.
    pub allow_dev_user_header: bool,
    /// Shared secret expected in `X-Webhook-Secret` on invite events.
    pub invite_webhook_secret: Option<String>,
    pub reconcile: ReconcileSettings,
}

/// Values written by reconciliation when a record has none.
#[derive(Debug, Clone)]
pub struct ReconcileSettings {
    pub baseline_role: String,
    pub default_position: String,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            baseline_role: "user".to_string(),
            default_position: "Pending assignment".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            table_name: "portal".to_string(),
            email_index: "email-index".to_string(),
            allow_dev_user_header: false,
            invite_webhook_secret: None,
            reconcile: ReconcileSettings::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            table_name: env::var("TABLE_NAME").unwrap_or(defaults.table_name),
            email_index: env::var("EMAIL_INDEX_NAME").unwrap_or(defaults.email_index),
            allow_dev_user_header: env::var("ALLOW_DEV_USER_HEADER")
                .map(|v| parse_flag(&v))
                .unwrap_or(false),
            invite_webhook_secret: env::var("INVITE_WEBHOOK_SECRET")
                .ok()
                .filter(|s| !s.is_empty()),
            reconcile: ReconcileSettings {
                baseline_role: env::var("BASELINE_USER_ROLE")
                    .unwrap_or(defaults.reconcile.baseline_role),
                default_position: env::var("DEFAULT_EMPLOYEE_POSITION")
                    .unwrap_or(defaults.reconcile.default_position),
            },
        }
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
