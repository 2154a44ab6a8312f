//! Hub: wires the bus, registry, context store and orchestrator together

use std::sync::Arc;

use sharedctx::ContextStore;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bus::EventBus;
use crate::config::Config;
use crate::domain::Event;
use crate::error::{HubError, HubResult};
use crate::orchestrator::{MetricsSnapshot, Orchestrator, OrchestratorMetrics};
use crate::registry::ModuleRegistry;

/// A running hub
///
/// Owns the shared components and the orchestrator task. This is the entry
/// point for any administrative surface layered on top.
pub struct Hub {
    bus: Arc<EventBus>,
    registry: Arc<ModuleRegistry>,
    context: Arc<ContextStore>,
    metrics: Arc<OrchestratorMetrics>,
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<HubResult<()>>,
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

impl Hub {
    /// Build every component and spawn the orchestrator on the current runtime
    pub fn start(config: &Config) -> HubResult<Self> {
        debug!(?config, "Hub::start: called");
        config
            .validate()
            .map_err(|e| HubError::validation(e.to_string()))?;

        let bus = Arc::new(EventBus::new(&config.bus, config.orchestrator.max_concurrency));
        let registry = Arc::new(ModuleRegistry::new(bus.clone()));
        let context = Arc::new(ContextStore::new());
        let orchestrator = Orchestrator::new(
            config.orchestrator.clone(),
            registry.clone(),
            bus.clone(),
            context.clone(),
        );
        let metrics = orchestrator.metrics();

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let task = tokio::runtime::Handle::try_current()
            .map_err(|e| HubError::Runtime(e.to_string()))?
            .spawn(orchestrator.run(shutdown_rx));

        info!("Hub started");
        Ok(Self {
            bus,
            registry,
            context,
            metrics,
            shutdown_tx,
            task,
        })
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    pub fn context(&self) -> &Arc<ContextStore> {
        &self.context
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Publish an event through the bus
    pub fn publish(&self, event: Event) -> HubResult<Arc<Event>> {
        self.bus.publish(event)
    }

    /// Stop the orchestrator and wait for it to exit
    ///
    /// Aggregations already in flight keep running on the runtime until they
    /// reach their deadline.
    pub async fn shutdown(self) -> HubResult<()> {
        debug!("Hub::shutdown: called");
        if self.shutdown_tx.send(()).await.is_err() {
            warn!("Orchestrator already stopped");
        }
        let result = self
            .task
            .await
            .map_err(|e| HubError::Runtime(format!("orchestrator task failed: {}", e)))?;
        info!("Hub stopped");
        result
    }
}
