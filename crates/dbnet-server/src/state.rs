use dbnet_connection::ConnectionRegistry;
use dbnet_dbt::DbtBroker;
use dbnet_jobs::JobBroker;
use dbnet_query::QueryBroker;
use dbnet_schema::SchemaCache;
use dbnet_store::{SessionStore, Store};
use std::sync::Arc;

/// Shared handles injected into every route and websocket task
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ConnectionRegistry>,
    pub schema: Arc<SchemaCache>,
    pub queries: Arc<QueryBroker>,
    pub jobs: Arc<JobBroker>,
    pub sessions: SessionStore,
    pub dbt: Option<Arc<DbtBroker>>,
}

impl AppState {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        store: Store,
        queries: Arc<QueryBroker>,
        jobs: Arc<JobBroker>,
    ) -> Self {
        Self {
            schema: Arc::new(SchemaCache::new(Arc::clone(&registry), store.clone())),
            sessions: SessionStore::new(store),
            registry,
            queries,
            jobs,
            dbt: None,
        }
    }

    pub fn with_dbt(mut self, dbt: Arc<DbtBroker>) -> Self {
        self.dbt = Some(dbt);
        self
    }
}
