//! Smart Chat Assistant

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

use super::base_response;
use crate::domain::{Capability, Event, EventType, ModuleHandler, ModuleType, Registration};
use crate::orchestrator::ContextTracker;

const POSITIVE_WORDS: [&str; 5] = ["thanks", "great", "good", "love", "awesome"];
const NEGATIVE_WORDS: [&str; 5] = ["broken", "bad", "angry", "hate", "fail"];

/// Suggests replies and reads the mood of inbound messages
pub struct ChatAssistant {
    tracker: ContextTracker,
}

impl ChatAssistant {
    pub fn new(tracker: ContextTracker) -> Self {
        Self { tracker }
    }

    pub fn registration() -> Registration {
        Registration::new("Smart Chat Assistant")
            .module_type(ModuleType::Chat)
            .version("1.0.0")
            .description("Chat assistance with context awareness")
            .capabilities([
                Capability::Chat,
                Capability::SentimentAnalysis,
                Capability::ContextAwareness,
                Capability::ResponseSuggestion,
            ])
            .subscribe(EventType::MessageReceived)
    }
}

fn sentiment_of(content: &str) -> &'static str {
    let content = content.to_lowercase();
    let score: i32 = POSITIVE_WORDS.iter().filter(|w| content.contains(*w)).count() as i32
        - NEGATIVE_WORDS.iter().filter(|w| content.contains(*w)).count() as i32;
    match score {
        s if s > 0 => "positive",
        s if s < 0 => "negative",
        _ => "neutral",
    }
}

#[async_trait]
impl ModuleHandler for ChatAssistant {
    async fn handle(&self, event: Arc<Event>) -> eyre::Result<Value> {
        debug!(correlation_id = %event.correlation_id(), "ChatAssistant::handle: called");
        let content = event
            .payload()
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let urgency = if content.contains('!') { "high" } else { "medium" };

        let mut result = base_response(&self.tracker, &event);
        result.insert(
            "suggested_responses".to_string(),
            json!(["I understand your request.", "Let me help with that."]),
        );
        result.insert("sentiment".to_string(), json!(sentiment_of(content)));
        result.insert("urgency".to_string(), json!(urgency));
        Ok(Value::Object(result))
    }
}
