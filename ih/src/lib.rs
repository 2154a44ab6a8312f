//! IntelHub - event-driven orchestration hub for intelligence modules
//!
//! Modules register with declared capabilities and event subscriptions.
//! Every published event is routed to all relevant modules in parallel and
//! their answers are folded into a single INTELLIGENCE_RESPONSE event that
//! carries a status for each responder.
//!
//! ```no_run
//! use std::sync::Arc;
//! use intelhub::{Capability, Config, Event, EventType, Hub, Registration, handler_fn};
//! use serde_json::json;
//!
//! # async fn demo() -> intelhub::HubResult<()> {
//! let hub = Hub::start(&Config::default())?;
//! hub.registry().register(
//!     Registration::new("echo")
//!         .capability(Capability::Analysis)
//!         .subscribe(EventType::TaskCreated),
//!     handler_fn(|event: Arc<Event>| async move { Ok(event.payload().clone()) }),
//! )?;
//! hub.publish(Event::new(EventType::TaskCreated, "client", json!({"task_id": "t1"})))?;
//! hub.shutdown().await
//! # }
//! ```

pub mod bus;
pub mod cli;
pub mod config;
pub mod domain;
pub mod error;
pub mod hub;
pub mod modules;
pub mod orchestrator;
pub mod registry;

pub use bus::{BusConfig, BusStats, DeliveryFailure, EventBus};
pub use config::Config;
pub use domain::{
    Capability, Event, EventType, ModuleHandler, ModuleId, ModuleInfo, ModuleType, Registration, handler_fn,
};
pub use error::{HubError, HubResult};
pub use hub::Hub;
pub use orchestrator::{AggregatedResponse, JobState, Orchestrator, OrchestratorConfig, ResponderStatus};
pub use registry::{ModuleRegistry, RegistryStats};
pub use sharedctx::{ContextError, ContextStore};
