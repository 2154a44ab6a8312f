//! Folds inbound events into the shared context store

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use sharedctx::ContextStore;
use tracing::{debug, warn};

use crate::domain::{Event, EventType};

/// Conversation entries kept under the `conversation` key
pub const CONVERSATION_LIMIT: usize = 100;

const CONVERSATION_KEY: &str = "conversation";
const TASK_PREFIX: &str = "task:";
const BEHAVIOR_PREFIX: &str = "behavior:";
const INSIGHT_PREFIX: &str = "insight:";

/// Counts of what the tracker currently holds
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackerStats {
    pub total_conversations: usize,
    pub active_tasks: usize,
    pub cached_insights: usize,
    pub tracked_users: usize,
    pub last_updated: Option<DateTime<Utc>>,
}

fn is_active(task: &Value) -> bool {
    matches!(
        task.get("status").and_then(Value::as_str),
        Some("pending") | Some("in_progress")
    )
}

/// Maintains cross-module state derived from the event stream
#[derive(Debug, Clone)]
pub struct ContextTracker {
    store: Arc<ContextStore>,
}

impl ContextTracker {
    pub fn new(store: Arc<ContextStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<ContextStore> {
        &self.store
    }

    /// Update the store from one event
    ///
    /// Failures are logged and skipped; tracking never blocks dispatch.
    pub fn observe(&self, event: &Event) {
        debug!(event_type = %event.event_type(), "ContextTracker::observe: called");
        let result = match event.event_type() {
            EventType::TaskCreated | EventType::TaskUpdated | EventType::TaskCompleted => self.track_task(event),
            EventType::MessageReceived | EventType::MessageSent => self.track_message(event),
            EventType::UserActivity => self.track_behavior(event),
            EventType::InsightGenerated => self.track_insight(event),
            _ => Ok(()),
        };
        if let Err(e) = result {
            warn!(correlation_id = %event.correlation_id(), error = %e, "Context tracking skipped");
        }
    }

    fn track_task(&self, event: &Event) -> Result<(), sharedctx::ContextError> {
        let payload = event.payload();
        let task_id = payload.get("task_id").and_then(Value::as_str).unwrap_or("unknown");
        let default_status = match event.event_type() {
            EventType::TaskCompleted => "completed",
            _ => "unknown",
        };

        self.store.update(format!("{}{}", TASK_PREFIX, task_id), |current| {
            let mut task = current.and_then(Value::as_object).cloned().unwrap_or_default();
            task.insert("last_activity".to_string(), json!(Utc::now()));
            task.insert(
                "status".to_string(),
                payload.get("status").cloned().unwrap_or_else(|| json!(default_status)),
            );
            if let Some(fields) = payload.as_object() {
                task.extend(fields.clone());
            }
            Value::Object(task)
        })?;
        Ok(())
    }

    fn track_message(&self, event: &Event) -> Result<(), sharedctx::ContextError> {
        let payload = event.payload();
        let entry = json!({
            "timestamp": Utc::now(),
            "event_type": event.event_type(),
            "source": event.source_module_id(),
            "content": payload.get("content").cloned().unwrap_or_else(|| json!("")),
            "metadata": payload.get("metadata").cloned().unwrap_or_else(|| json!({})),
        });

        self.store.update(CONVERSATION_KEY, |current| {
            let mut history = current.and_then(Value::as_array).cloned().unwrap_or_default();
            history.push(entry);
            let excess = history.len().saturating_sub(CONVERSATION_LIMIT);
            history.drain(..excess);
            Value::Array(history)
        })?;
        Ok(())
    }

    fn track_behavior(&self, event: &Event) -> Result<(), sharedctx::ContextError> {
        let payload = event.payload();
        let user_id = payload.get("user_id").and_then(Value::as_str).unwrap_or("default");
        let activity = payload
            .get("activity_type")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();

        self.store.update(format!("{}{}", BEHAVIOR_PREFIX, user_id), |current| {
            let mut counters = current.and_then(Value::as_object).cloned().unwrap_or_default();
            let count = counters.get(&activity).and_then(Value::as_u64).unwrap_or(0);
            counters.insert(activity, json!(count + 1));
            Value::Object(counters)
        })?;
        Ok(())
    }

    fn track_insight(&self, event: &Event) -> Result<(), sharedctx::ContextError> {
        let key = format!(
            "{}{}:{}",
            INSIGHT_PREFIX,
            event.source_module_id(),
            event.correlation_id()
        );
        self.store.set(
            key,
            json!({
                "insight": event.payload().get("insight").cloned().unwrap_or_else(|| json!({})),
                "source_module": event.source_module_id(),
                "timestamp": Utc::now(),
            }),
        )?;

        // Cached insights expire after an hour
        let cutoff = Utc::now() - Duration::hours(1);
        for key in self.store.keys_with_prefix(INSIGHT_PREFIX) {
            if let Ok(entry) = self.store.entry(&key)
                && entry.updated_at < cutoff
            {
                let _ = self.store.remove(&key);
            }
        }
        Ok(())
    }

    /// Context a module might want when handling `event`
    ///
    /// Keys: `active_tasks`, `recent_conversations`, `recent_insights`, plus
    /// `user_behavior` when the payload names a known user.
    pub fn relevant_context(&self, event: &Event) -> Map<String, Value> {
        let mut context = Map::new();

        let conversations = self
            .store
            .get(CONVERSATION_KEY)
            .ok()
            .and_then(|v| v.as_array().cloned())
            .unwrap_or_default();
        let skip = conversations.len().saturating_sub(5);
        context.insert(
            "recent_conversations".to_string(),
            Value::Array(conversations.into_iter().skip(skip).collect()),
        );

        let mut active_tasks = Map::new();
        for key in self.store.keys_with_prefix(TASK_PREFIX) {
            if let Ok(task) = self.store.get(&key)
                && is_active(&task)
            {
                active_tasks.insert(key[TASK_PREFIX.len()..].to_string(), task);
            }
        }
        context.insert("active_tasks".to_string(), Value::Object(active_tasks));

        let mut insights: Vec<_> = self
            .store
            .keys_with_prefix(INSIGHT_PREFIX)
            .into_iter()
            .filter_map(|key| self.store.entry(&key).ok())
            .collect();
        insights.sort_by_key(|entry| entry.updated_at);
        let skip = insights.len().saturating_sub(3);
        context.insert(
            "recent_insights".to_string(),
            Value::Array(insights.into_iter().skip(skip).map(|e| e.value).collect()),
        );

        if let Some(user_id) = event.payload().get("user_id").and_then(Value::as_str)
            && let Ok(behavior) = self.store.get(&format!("{}{}", BEHAVIOR_PREFIX, user_id))
        {
            context.insert("user_behavior".to_string(), behavior);
        }

        context
    }

    pub fn stats(&self) -> TrackerStats {
        let total_conversations = self
            .store
            .get(CONVERSATION_KEY)
            .ok()
            .and_then(|v| v.as_array().map(Vec::len))
            .unwrap_or(0);
        let active_tasks = self
            .store
            .keys_with_prefix(TASK_PREFIX)
            .iter()
            .filter_map(|key| self.store.get(key).ok())
            .filter(is_active)
            .count();

        TrackerStats {
            total_conversations,
            active_tasks,
            cached_insights: self.store.keys_with_prefix(INSIGHT_PREFIX).len(),
            tracked_users: self.store.keys_with_prefix(BEHAVIOR_PREFIX).len(),
            last_updated: self.store.stats().last_modified,
        }
    }
}
