pub mod types;
pub mod error;
pub mod config;
pub mod email;
pub mod store;
pub mod reconcile;
pub mod access;
pub mod invite_accepted;
pub mod auth;
pub mod http;

use aws_sdk_dynamodb::Client as DynamoClient;
use config::Config;
use std::sync::Arc;
use store::dynamo::DynamoPortalStore;
use store::PortalStores;

/// Shared application state
pub struct AppState {
    pub stores: PortalStores,
    pub config: Config,
}

impl AppState {
    pub fn new(stores: PortalStores, config: Config) -> Arc<Self> {
        Arc::new(Self { stores, config })
    }

    /// State backed by the DynamoDB table named in `config`.
    pub fn with_dynamo(dynamo_client: DynamoClient, config: Config) -> Arc<Self> {
        let store = DynamoPortalStore::new(dynamo_client, &config.table_name, &config.email_index);
        Self::new(PortalStores::from_store(Arc::new(store)), config)
    }

    /// Initialize AWS clients and configuration once per cold start.
    pub async fn from_env() -> Arc<Self> {
        let aws_config = aws_config::load_from_env().await;
        let config = Config::from_env();
        tracing::info!(
            "Portal state initialized (table: {}, index: {})",
            config.table_name,
            config.email_index
        );
        Self::with_dynamo(DynamoClient::new(&aws_config), config)
    }
}
