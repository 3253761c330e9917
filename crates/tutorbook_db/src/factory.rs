// --- File: crates/tutorbook_db/src/factory.rs ---
//! Picks the booking store backend from the application configuration.

use crate::client::DbClient;
use crate::error::DbError;
use crate::repositories::{BookingStore, InMemoryBookingStore, SqlBookingStore};
use std::sync::Arc;
use tracing::{debug, info};
use tutorbook_config::AppConfig;

#[derive(Debug, Clone, Default)]
pub struct BookingStoreFactory;

impl BookingStoreFactory {
    pub fn new() -> Self {
        Self
    }

    /// SQL store when `use_database` is set, in-memory store otherwise.
    /// The schema is initialized before the store is returned.
    pub async fn from_app_config(
        &self,
        config: &AppConfig,
    ) -> Result<Arc<dyn BookingStore>, DbError> {
        let store: Arc<dyn BookingStore> = if config.use_database {
            debug!("[Store] Creating SQL booking store from application configuration");
            Arc::new(SqlBookingStore::new(DbClient::new(config).await?))
        } else {
            Arc::new(InMemoryBookingStore::new())
        };
        store.init_schema().await?;
        info!("[Store] Booking store ready ({})", store.backend());
        Ok(store)
    }

    pub async fn from_url(&self, db_url: &str) -> Result<Arc<dyn BookingStore>, DbError> {
        let store = SqlBookingStore::new(DbClient::from_url(db_url).await?);
        store.init_schema().await?;
        Ok(Arc::new(store))
    }
}
