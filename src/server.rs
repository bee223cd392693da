use std::collections::HashSet;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::sync::{OwnedSemaphorePermit, RwLock, Semaphore};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api::handler;
use crate::config::{AppConfig, StorageBackend};
use crate::error::{AppError, Result};
use crate::llm::{ClaudeClient, LanguageModel};
use crate::search::{SearchProvider, SerpApiClient};
use crate::steps::StepSet;
use crate::store::{MemoryStore, ResultStore, RunLogger, SqliteStore};
use crate::workflow::{Orchestrator, RunId};

pub struct AppState {
    pub config: AppConfig,
    pub orchestrator: Arc<Orchestrator>,
    pub logger: Arc<dyn RunLogger>,
    pub results: Arc<dyn ResultStore>,
    run_permits: Arc<Semaphore>,
    in_flight: RwLock<HashSet<RunId>>,
}

impl AppState {
    /// Wire up the configured store, language model and search provider.
    pub async fn new(config: AppConfig) -> Result<Self> {
        let (logger, results) = open_store(&config)?;

        let llm: Arc<dyn LanguageModel> = Arc::new(ClaudeClient::from_config(&config.llm));
        let search: Option<Arc<dyn SearchProvider>> = match SerpApiClient::from_config(&config.search)
        {
            Some(client) => Some(Arc::new(client) as Arc<dyn SearchProvider>),
            None => {
                tracing::warn!("No search API key configured; research will run without web results");
                None
            }
        };

        let steps = StepSet::llm_backed(llm, search, &config);
        Ok(Self::from_parts(config, steps, logger, results))
    }

    /// Assemble state from already-built collaborators.
    pub fn from_parts(
        config: AppConfig,
        steps: StepSet,
        logger: Arc<dyn RunLogger>,
        results: Arc<dyn ResultStore>,
    ) -> Self {
        let orchestrator = Arc::new(Orchestrator::new(
            steps,
            Arc::clone(&logger),
            Arc::clone(&results),
            &config.pipeline,
        ));
        let run_permits = Arc::new(Semaphore::new(config.server.max_concurrent_runs));

        Self {
            config,
            orchestrator,
            logger,
            results,
            run_permits,
            in_flight: RwLock::new(HashSet::new()),
        }
    }

    /// Wait for a free run slot.
    pub async fn acquire_run_permit(&self) -> Result<OwnedSemaphorePermit> {
        Arc::clone(&self.run_permits)
            .acquire_owned()
            .await
            .map_err(|_| AppError::Internal("run permits closed".to_string()))
    }

    /// Stop handing out run permits. Waiting requests are rejected.
    pub fn close_run_permits(&self) {
        self.run_permits.close();
    }

    pub async fn mark_in_flight(&self, run_id: RunId) {
        self.in_flight.write().await.insert(run_id);
    }

    pub async fn mark_finished(&self, run_id: RunId) {
        self.in_flight.write().await.remove(&run_id);
    }

    pub async fn in_flight_runs(&self) -> Vec<RunId> {
        self.in_flight.read().await.iter().copied().collect()
    }
}

fn open_store(config: &AppConfig) -> Result<(Arc<dyn RunLogger>, Arc<dyn ResultStore>)> {
    match config.storage.backend {
        StorageBackend::Memory => {
            let store = Arc::new(MemoryStore::new());
            let logger: Arc<dyn RunLogger> = store.clone();
            let results: Arc<dyn ResultStore> = store;
            Ok((logger, results))
        }
        StorageBackend::Sqlite => {
            tracing::info!(path = %config.storage.path.display(), "Opening SQLite run store");
            let store = Arc::new(SqliteStore::open(&config.storage.path)?);
            let logger: Arc<dyn RunLogger> = store.clone();
            let results: Arc<dyn ResultStore> = store;
            Ok((logger, results))
        }
    }
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handler::health_check))
        .route("/generate", post(handler::generate))
        .route("/runs/:run_id", get(handler::get_run))
        .route("/runs/:run_id/logs", get(handler::get_run_logs))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
