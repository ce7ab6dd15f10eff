//! Application state, health reporting, and the stdio transport.

mod mcp;

pub use mcp::{JsonRpcRequest, JsonRpcResponse, McpServer};

use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Value};

use crate::config::Config;
use crate::error::{HubError, HubResult};
use crate::governance::Omega;
use crate::graph::{EntityOps, GraphStore, RelationshipOps, TraversalOps};
use crate::mcp::{Dispatcher, MetricsSink, SubServerRegistry, TracingSink};
use crate::model::{ModelRouter, OllamaClient};
use crate::servers::{
    ChainServer, ChainService, GraphMemoryServer, ModelServer, NotebookServer, TaskServer,
    TaskService,
};
use crate::vault::NotebookVault;

/// Application state shared across dispatches
pub struct AppState {
    pub config: Config,
    pub store: GraphStore,
    pub router: Arc<ModelRouter>,
    pub vault: NotebookVault,
    pub dispatcher: Arc<Dispatcher>,
    pub metrics: Arc<MetricsSink>,
    started_at: Instant,
}

impl AppState {
    /// Connect the backends and assemble the full dispatch pipeline.
    pub async fn new(config: Config) -> HubResult<Self> {
        let store = GraphStore::connect(&config.graph).await?;
        let entities = EntityOps::new(store.clone());
        let relationships = RelationshipOps::new(store.clone());
        let traversal = TraversalOps::new(store.clone());

        let vault = NotebookVault::new(&config.vault);
        vault.ensure_root().await.map_err(HubError::Vault)?;

        let client = OllamaClient::new(&config.model)?;
        let router = Arc::new(ModelRouter::new(client, &config.model));

        let omega = Arc::new(Omega::new(vault.clone(), config.governance.clone()));
        let discovery = Arc::new(SubServerRegistry::new());
        let metrics = Arc::new(MetricsSink::new());

        let chain_service = Arc::new(ChainService::new(
            entities.clone(),
            relationships.clone(),
            vault.clone(),
        ));
        let task_service = Arc::new(TaskService::new(entities.clone(), relationships.clone()));

        let mut dispatcher = Dispatcher::new(discovery, omega);
        dispatcher.register_server(Arc::new(GraphMemoryServer::new(
            entities,
            relationships,
            traversal,
        )));
        dispatcher.register_server(Arc::new(NotebookServer::new(vault.clone())));
        dispatcher.register_server(Arc::new(ModelServer::new(router.clone())));
        dispatcher.register_server(Arc::new(ChainServer::new(chain_service)));
        dispatcher.register_server(Arc::new(TaskServer::new(task_service)));
        dispatcher.add_sink(Arc::new(TracingSink));
        dispatcher.add_sink(metrics.clone());

        Ok(Self {
            config,
            store,
            router,
            vault,
            dispatcher: Arc::new(dispatcher),
            metrics,
            started_at: Instant::now(),
        })
    }

    /// Seconds since the state was assembled.
    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Aggregate health snapshot: probes every dependency and rolls the
    /// results up into healthy/degraded.
    pub async fn health_report(&self) -> Value {
        let start = Instant::now();

        let graph = self.store.health().await;
        let graph_health = json!({
            "status": if graph.healthy { "healthy" } else { "unhealthy" },
            "latency_ms": graph.latency_ms,
            "error": graph.error,
        });

        let model_health = match self.router.list(false).await {
            Ok(models) => json!({
                "status": "healthy",
                "models": models.len(),
            }),
            Err(e) => json!({
                "status": "unhealthy",
                "error": e.to_string(),
            }),
        };

        let all_healthy = graph.healthy && model_health["status"] == json!("healthy");

        json!({
            "status": if all_healthy { "healthy" } else { "degraded" },
            "timestamp": crate::governance::now_timestamp(),
            "uptime": self.uptime_secs(),
            "dependencies": {
                "graph": graph_health,
                "model": model_health,
            },
            "metrics": self.metrics.snapshot(),
            "response_time_ms": start.elapsed().as_millis() as u64,
        })
    }
}

/// Shared application state handle
pub type SharedState = Arc<AppState>;
