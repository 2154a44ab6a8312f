//! Task Intelligence Engine

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

use super::base_response;
use crate::domain::{Capability, Event, EventType, ModuleHandler, ModuleType, Registration};
use crate::orchestrator::ContextTracker;

const URGENT_WORDS: [&str; 4] = ["urgent", "asap", "critical", "blocker"];

/// Estimates effort and priority for new or changed tasks
pub struct TaskEngine {
    tracker: ContextTracker,
}

impl TaskEngine {
    pub fn new(tracker: ContextTracker) -> Self {
        Self { tracker }
    }

    pub fn registration() -> Registration {
        Registration::new("Task Intelligence Engine")
            .module_type(ModuleType::Tasks)
            .version("1.2.0")
            .description("Smart task management and prioritization")
            .capabilities([
                Capability::TaskManagement,
                Capability::Prioritization,
                Capability::Automation,
                Capability::Analysis,
            ])
            .subscriptions([EventType::TaskCreated, EventType::TaskUpdated])
    }
}

fn priority_for(payload: &Value) -> String {
    if let Some(priority) = payload.get("priority").and_then(Value::as_str) {
        return priority.to_string();
    }
    let title = payload
        .get("title")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_lowercase();
    if URGENT_WORDS.iter().any(|w| title.contains(w)) {
        "high".to_string()
    } else {
        "medium".to_string()
    }
}

#[async_trait]
impl ModuleHandler for TaskEngine {
    async fn handle(&self, event: Arc<Event>) -> eyre::Result<Value> {
        debug!(correlation_id = %event.correlation_id(), "TaskEngine::handle: called");
        let payload = event.payload();
        let mut result = base_response(&self.tracker, &event);
        result.insert("task_id".to_string(), payload.get("task_id").cloned().unwrap_or(Value::Null));
        result.insert("priority".to_string(), json!(priority_for(payload)));
        result.insert("estimated_completion_time".to_string(), json!("2 hours"));
        result.insert("dependencies".to_string(), json!([]));
        Ok(Value::Object(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sharedctx::ContextStore;

    #[test]
    fn test_priority_for() {
        assert_eq!(priority_for(&json!({"priority": "low"})), "low");
        assert_eq!(priority_for(&json!({"title": "URGENT: fix prod"})), "high");
        assert_eq!(priority_for(&json!({"title": "tidy docs"})), "medium");
        assert_eq!(priority_for(&json!({})), "medium");
    }

    #[tokio::test]
    async fn test_handle() {
        let engine = TaskEngine::new(ContextTracker::new(Arc::new(ContextStore::new())));
        let event = Arc::new(Event::new(
            EventType::TaskCreated,
            "client",
            json!({"task_id": "t1", "title": "critical outage"}),
        ));
        let result = engine.handle(event).await.unwrap();
        assert_eq!(result["processed"], true);
        assert_eq!(result["task_id"], "t1");
        assert_eq!(result["priority"], "high");
        assert_eq!(result["estimated_completion_time"], "2 hours");
    }
}
