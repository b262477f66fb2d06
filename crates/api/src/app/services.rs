//! Store construction and selection.

use std::sync::Arc;

use sqlx::PgPool;

use wikiforge_queue::{InMemoryJobStore, JobStore, PostgresJobStore};

use crate::config::ApiConfig;

/// The job store as shared by every handler.
pub type SharedJobStore = Arc<dyn JobStore>;

/// In-memory store wiring (dev/test).
pub fn build_in_memory_store() -> SharedJobStore {
    Arc::new(InMemoryJobStore::default())
}

/// Select and construct the store from configuration.
pub async fn build_store(config: &ApiConfig) -> SharedJobStore {
    if !config.use_persistent_stores {
        tracing::info!("using in-memory job store");
        return build_in_memory_store();
    }

    let database_url = config
        .database_url
        .as_deref()
        .expect("DATABASE_URL must be set when USE_PERSISTENT_STORES=true");

    let pool = PgPool::connect(database_url)
        .await
        .expect("Failed to connect to Postgres");

    let store = PostgresJobStore::new(pool);
    store
        .ensure_schema()
        .await
        .expect("Failed to apply job queue schema");

    tracing::info!("using Postgres job store");
    Arc::new(store)
}
