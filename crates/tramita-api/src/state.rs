//! Application state wiring all services together.
//!
//! AppState holds the single engine instance used by both CLI and REST API.
//! The engine is generic over repository/clock traits, but AppState pins it
//! to the concrete SQLite implementations and the system clock.

use std::path::PathBuf;
use std::sync::Arc;

use tramita_core::clock::SystemClock;
use tramita_core::engine::WorkflowEngine;
use tramita_infra::config::load_global_config;
use tramita_infra::resolve_data_dir;
use tramita_infra::sqlite::definition::SqliteDefinitionRepository;
use tramita_infra::sqlite::history::SqliteHistoryRepository;
use tramita_infra::sqlite::instance::SqliteInstanceRepository;
use tramita_infra::sqlite::pool::DatabasePool;
use tramita_types::config::GlobalConfig;

/// Concrete type alias for the engine generics pinned to infra implementations.
pub type ConcreteEngine = WorkflowEngine<
    SqliteDefinitionRepository,
    SqliteInstanceRepository,
    SqliteHistoryRepository,
    SystemClock,
>;

/// Shared application state.
///
/// Used by both CLI commands and REST API handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ConcreteEngine>,
    pub config: GlobalConfig,
    pub data_dir: PathBuf,
}

impl AppState {
    /// Initialize the application state: connect to DB, wire the engine.
    pub async fn init() -> anyhow::Result<Self> {
        let data_dir = resolve_data_dir();

        // Ensure data directory exists
        tokio::fs::create_dir_all(&data_dir).await?;

        let config = load_global_config(&data_dir).await;

        let db_url = format!(
            "sqlite://{}?mode=rwc",
            data_dir.join("tramita.db").display()
        );
        let db_pool = DatabasePool::new(&db_url).await?;

        let engine = WorkflowEngine::new(
            SqliteDefinitionRepository::new(db_pool.clone()),
            SqliteInstanceRepository::new(db_pool.clone()),
            SqliteHistoryRepository::new(db_pool),
            SystemClock,
        );

        Ok(Self {
            engine: Arc::new(engine),
            config,
            data_dir,
        })
    }
}
