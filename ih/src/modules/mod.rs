//! Built-in demonstration modules
//!
//! Three in-process modules that return mock structured results. They give
//! the CLI something to orchestrate and exercise the context store.

mod chat;
mod insight;
mod task;

use std::sync::Arc;

use serde_json::{Map, Value, json};
use sharedctx::ContextStore;
use tracing::debug;

use crate::domain::{Event, ModuleId};
use crate::error::HubResult;
use crate::orchestrator::ContextTracker;
use crate::registry::ModuleRegistry;

pub use chat::ChatAssistant;
pub use insight::InsightGenerator;
pub use task::TaskEngine;

/// Confidence every demo module reports
pub const DEMO_CONFIDENCE: f64 = 0.85;

/// Fields common to every demo result
fn base_response(tracker: &ContextTracker, event: &Event) -> Map<String, Value> {
    let context_used: Vec<String> = tracker
        .relevant_context(event)
        .keys()
        .take(3)
        .cloned()
        .collect();
    let mut result = Map::new();
    result.insert("processed".to_string(), json!(true));
    result.insert("confidence".to_string(), json!(DEMO_CONFIDENCE));
    result.insert("context_used".to_string(), json!(context_used));
    result
}

/// Register the task, chat and insight modules, returning their IDs in that order
pub fn register_examples(registry: &ModuleRegistry, context: Arc<ContextStore>) -> HubResult<Vec<ModuleId>> {
    debug!("register_examples: called");
    let tracker = ContextTracker::new(context);
    Ok(vec![
        registry.register(TaskEngine::registration(), Arc::new(TaskEngine::new(tracker.clone())))?,
        registry.register(ChatAssistant::registration(), Arc::new(ChatAssistant::new(tracker.clone())))?,
        registry.register(InsightGenerator::registration(), Arc::new(InsightGenerator::new(tracker)))?,
    ])
}
