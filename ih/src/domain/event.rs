//! Events exchanged over the bus
//!
//! An event is immutable once published: the bus wraps it in an `Arc` and
//! only exposes read accessors. The `correlation_id` is fixed at creation and
//! links a request event to its aggregated INTELLIGENCE_RESPONSE.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::module::Capability;
use crate::error::{HubError, HubResult};

/// Kind of event flowing through the hub
///
/// The wire form is the lowercase snake_case name. Unknown names become
/// `Custom` so that modules can extend the vocabulary without a rebuild.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventType {
    TaskCreated,
    TaskUpdated,
    TaskCompleted,
    MessageReceived,
    MessageSent,
    InsightGenerated,
    UserActivity,
    ModuleRegistered,
    IntelligenceResponse,
    Custom(String),
}

impl EventType {
    /// Every built-in event type
    pub fn builtin() -> [EventType; 9] {
        [
            EventType::TaskCreated,
            EventType::TaskUpdated,
            EventType::TaskCompleted,
            EventType::MessageReceived,
            EventType::MessageSent,
            EventType::InsightGenerated,
            EventType::UserActivity,
            EventType::ModuleRegistered,
            EventType::IntelligenceResponse,
        ]
    }

    /// Wire name of this event type
    pub fn as_str(&self) -> &str {
        match self {
            EventType::TaskCreated => "task_created",
            EventType::TaskUpdated => "task_updated",
            EventType::TaskCompleted => "task_completed",
            EventType::MessageReceived => "message_received",
            EventType::MessageSent => "message_sent",
            EventType::InsightGenerated => "insight_generated",
            EventType::UserActivity => "user_activity",
            EventType::ModuleRegistered => "module_registered",
            EventType::IntelligenceResponse => "intelligence_response",
            EventType::Custom(name) => name,
        }
    }

    /// Whether the orchestrator fans this event out and aggregates responses
    ///
    /// Aggregated responses are delivered as plain notifications; aggregating
    /// them would emit a response to every response.
    pub fn is_aggregated(&self) -> bool {
        !matches!(self, EventType::IntelligenceResponse)
    }

    /// Reject custom names that cannot round-trip through the wire form
    pub fn validate(&self) -> HubResult<()> {
        if let EventType::Custom(name) = self {
            if name.is_empty() {
                return Err(HubError::validation("event type name must not be empty"));
            }
            if !name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '.')
            {
                return Err(HubError::validation(format!(
                    "event type '{}' must be lowercase snake_case",
                    name
                )));
            }
        }
        Ok(())
    }
}

impl From<String> for EventType {
    fn from(name: String) -> Self {
        match name.as_str() {
            "task_created" => EventType::TaskCreated,
            "task_updated" => EventType::TaskUpdated,
            "task_completed" => EventType::TaskCompleted,
            "message_received" => EventType::MessageReceived,
            "message_sent" => EventType::MessageSent,
            "insight_generated" => EventType::InsightGenerated,
            "user_activity" => EventType::UserActivity,
            "module_registered" => EventType::ModuleRegistered,
            "intelligence_response" => EventType::IntelligenceResponse,
            _ => EventType::Custom(name),
        }
    }
}

impl From<EventType> for String {
    fn from(event_type: EventType) -> Self {
        match event_type {
            EventType::Custom(name) => name,
            other => other.as_str().to_string(),
        }
    }
}

impl FromStr for EventType {
    type Err = HubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let event_type = EventType::from(s.trim().to_lowercase());
        event_type.validate()?;
        Ok(event_type)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An immutable typed message published to the bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    event_type: EventType,
    source_module_id: String,
    correlation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    required_capability: Option<Capability>,
    payload: Value,
    created_at: DateTime<Utc>,
}

impl Event {
    /// Create a new event with a fresh correlation ID
    pub fn new(event_type: EventType, source_module_id: impl Into<String>, payload: Value) -> Self {
        Self {
            event_type,
            source_module_id: source_module_id.into(),
            correlation_id: Uuid::now_v7().to_string(),
            required_capability: None,
            payload,
            created_at: Utc::now(),
        }
    }

    /// Create an event that shares the correlation ID of `request`
    pub fn in_reply_to(
        event_type: EventType,
        source_module_id: impl Into<String>,
        request: &Event,
        payload: Value,
    ) -> Self {
        Self {
            event_type,
            source_module_id: source_module_id.into(),
            correlation_id: request.correlation_id.clone(),
            required_capability: None,
            payload,
            created_at: Utc::now(),
        }
    }

    /// Restrict delivery to modules declaring `capability`
    pub fn with_required_capability(mut self, capability: Capability) -> Self {
        self.required_capability = Some(capability);
        self
    }

    /// Parse an event from its wire form, validating the required fields
    pub fn from_json(json: &str) -> HubResult<Self> {
        let event: Event = serde_json::from_str(json)?;
        event.event_type.validate()?;
        if event.correlation_id.trim().is_empty() {
            return Err(HubError::validation("correlation_id must not be empty"));
        }
        if event.source_module_id.trim().is_empty() {
            return Err(HubError::validation("source_module_id must not be empty"));
        }
        if !event.payload.is_object() {
            return Err(HubError::validation("payload must be a JSON object"));
        }
        Ok(event)
    }

    /// Serialize to the wire form
    pub fn to_json(&self) -> HubResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn event_type(&self) -> &EventType {
        &self.event_type
    }

    pub fn source_module_id(&self) -> &str {
        &self.source_module_id
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn required_capability(&self) -> Option<Capability> {
        self.required_capability
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unknown_names_become_custom() {
        assert_eq!(EventType::from("task_created".to_string()), EventType::TaskCreated);
        assert_eq!(
            EventType::from("deploy_finished".to_string()),
            EventType::Custom("deploy_finished".to_string())
        );
        assert_eq!(EventType::Custom("deploy_finished".to_string()).to_string(), "deploy_finished");
    }

    #[test]
    fn test_parse_normalizes_and_validates() {
        assert_eq!(" Task_Created ".parse::<EventType>().unwrap(), EventType::TaskCreated);
        assert!("has space".parse::<EventType>().is_err());
        assert!("".parse::<EventType>().is_err());
    }

    #[test]
    fn test_only_responses_skip_aggregation() {
        for event_type in EventType::builtin() {
            let expected = event_type != EventType::IntelligenceResponse;
            assert_eq!(event_type.is_aggregated(), expected, "{}", event_type);
        }
        assert!(EventType::Custom("x".to_string()).is_aggregated());
    }

    #[test]
    fn test_wire_shape() {
        let event = Event::new(EventType::TaskCreated, "client", json!({"task_id": "t1"}));
        let value: Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();

        assert_eq!(value["type"], "task_created");
        assert_eq!(value["source_module_id"], "client");
        assert_eq!(value["correlation_id"], event.correlation_id());
        assert_eq!(value["payload"]["task_id"], "t1");
        assert!(value["created_at"].is_string());
        assert!(value.get("required_capability").is_none());
    }

    #[test]
    fn test_reply_keeps_correlation_id() {
        let request = Event::new(EventType::MessageReceived, "client", json!({}));
        let reply = Event::in_reply_to(EventType::IntelligenceResponse, "core", &request, json!({}));
        assert_eq!(reply.correlation_id(), request.correlation_id());
        assert_ne!(
            Event::new(EventType::MessageReceived, "client", json!({})).correlation_id(),
            request.correlation_id()
        );
    }

    #[test]
    fn test_from_json_rejects_bad_payload() {
        let json = r#"{"type":"task_created","source_module_id":"c","correlation_id":"x","payload":[1],"created_at":"2026-01-01T00:00:00Z"}"#;
        assert!(Event::from_json(json).unwrap_err().is_validation());

        let json = r#"{"type":"task_created","source_module_id":"c","correlation_id":"","payload":{},"created_at":"2026-01-01T00:00:00Z"}"#;
        assert!(Event::from_json(json).unwrap_err().is_validation());

        let json = r#"{"type":"task_created","source_module_id":"c","correlation_id":"x","required_capability":"chat","payload":{},"created_at":"2026-01-01T00:00:00Z"}"#;
        let event = Event::from_json(json).unwrap();
        assert_eq!(event.required_capability(), Some(Capability::Chat));
    }
}
