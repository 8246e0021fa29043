//! Application state wiring stores, gateway, and supervisor together.
//!
//! The supervisor is generic over store and gateway traits; AppState pins it
//! to the concrete infra implementations.

use std::sync::Arc;

use taskflow_core::supervisor::RunSupervisor;
use taskflow_infra::llm::{create_gateway, ProviderGateway};
use taskflow_infra::seed::seed_default_template;
use taskflow_infra::settings::Settings;
use taskflow_infra::sqlite::ledger::SqliteCostLedger;
use taskflow_infra::sqlite::pool::DatabasePool;
use taskflow_infra::sqlite::run::SqliteRunStore;
use taskflow_infra::sqlite::template::SqliteTemplateStore;

/// Concrete type alias for the supervisor generics pinned to infra implementations.
pub type ConcreteSupervisor =
    RunSupervisor<SqliteRunStore, SqliteTemplateStore, SqliteCostLedger, ProviderGateway>;

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub supervisor: ConcreteSupervisor,
    pub run_store: Arc<SqliteRunStore>,
    pub template_store: Arc<SqliteTemplateStore>,
    pub ledger: Arc<SqliteCostLedger>,
    pub db_pool: DatabasePool,
}

impl AppState {
    /// Initialize the application state: connect to the database, run
    /// migrations, seed the default template, wire the supervisor.
    pub async fn init(settings: &Settings) -> anyhow::Result<Self> {
        let db_pool = DatabasePool::new(&settings.database_url).await?;

        let run_store = Arc::new(SqliteRunStore::new(db_pool.clone()));
        let template_store = Arc::new(SqliteTemplateStore::new(db_pool.clone()));
        let ledger = Arc::new(SqliteCostLedger::new(db_pool.clone()));

        seed_default_template(template_store.as_ref()).await?;

        let gateway: Arc<ProviderGateway> = Arc::new(create_gateway(&settings.provider)?);

        let supervisor = RunSupervisor::new(
            Arc::clone(&run_store),
            Arc::clone(&template_store),
            Arc::clone(&ledger),
            gateway,
            settings.engine.clone(),
        );

        Ok(Self {
            supervisor,
            run_store,
            template_store,
            ledger,
            db_pool,
        })
    }
}
