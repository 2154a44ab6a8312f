//! Module identity, metadata and health

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::event::EventType;
use crate::error::{HubError, HubResult};

/// Closed set of capability tags a module may declare
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    TaskManagement,
    Prioritization,
    Automation,
    Analysis,
    Chat,
    SentimentAnalysis,
    ContextAwareness,
    ResponseSuggestion,
    Insights,
    PatternRecognition,
    Analytics,
    TrendAnalysis,
    KnowledgeBase,
}

impl Capability {
    pub const ALL: [Capability; 13] = [
        Capability::TaskManagement,
        Capability::Prioritization,
        Capability::Automation,
        Capability::Analysis,
        Capability::Chat,
        Capability::SentimentAnalysis,
        Capability::ContextAwareness,
        Capability::ResponseSuggestion,
        Capability::Insights,
        Capability::PatternRecognition,
        Capability::Analytics,
        Capability::TrendAnalysis,
        Capability::KnowledgeBase,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::TaskManagement => "task_management",
            Capability::Prioritization => "prioritization",
            Capability::Automation => "automation",
            Capability::Analysis => "analysis",
            Capability::Chat => "chat",
            Capability::SentimentAnalysis => "sentiment_analysis",
            Capability::ContextAwareness => "context_awareness",
            Capability::ResponseSuggestion => "response_suggestion",
            Capability::Insights => "insights",
            Capability::PatternRecognition => "pattern_recognition",
            Capability::Analytics => "analytics",
            Capability::TrendAnalysis => "trend_analysis",
            Capability::KnowledgeBase => "knowledge_base",
        }
    }
}

impl FromStr for Capability {
    type Err = HubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase().replace('-', "_");
        Capability::ALL
            .into_iter()
            .find(|c| c.as_str() == wanted)
            .ok_or_else(|| HubError::validation(format!("unknown capability '{}'", s)))
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Broad category a module belongs to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleType {
    Chat,
    Tasks,
    Insights,
    Automation,
    #[default]
    ThirdParty,
}

impl fmt::Display for ModuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ModuleType::Chat => "chat",
            ModuleType::Tasks => "tasks",
            ModuleType::Insights => "insights",
            ModuleType::Automation => "automation",
            ModuleType::ThirdParty => "third_party",
        };
        write!(f, "{}", s)
    }
}

/// Unique module identifier, assigned at registration and never reused
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleId(String);

impl ModuleId {
    /// Generate a fresh time-ordered ID
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ModuleId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Registration request describing a module
///
/// Built with chained setters; `validate` is called by the registry before
/// anything is stored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Registration {
    pub name: String,
    #[serde(default)]
    pub module_type: ModuleType,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub description: String,
    pub capabilities: BTreeSet<Capability>,
    pub subscriptions: BTreeSet<EventType>,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

impl Registration {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: default_version(),
            ..Default::default()
        }
    }

    pub fn module_type(mut self, module_type: ModuleType) -> Self {
        self.module_type = module_type;
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn capability(mut self, capability: Capability) -> Self {
        self.capabilities.insert(capability);
        self
    }

    pub fn capabilities(mut self, capabilities: impl IntoIterator<Item = Capability>) -> Self {
        self.capabilities.extend(capabilities);
        self
    }

    pub fn subscribe(mut self, event_type: EventType) -> Self {
        self.subscriptions.insert(event_type);
        self
    }

    pub fn subscriptions(mut self, event_types: impl IntoIterator<Item = EventType>) -> Self {
        self.subscriptions.extend(event_types);
        self
    }

    /// Parse capability tags from strings, failing on the first unknown tag
    pub fn parse_capabilities<I, S>(tags: I) -> HubResult<BTreeSet<Capability>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        tags.into_iter().map(|t| t.as_ref().parse()).collect()
    }

    /// Check the request is complete enough to register
    pub fn validate(&self) -> HubResult<()> {
        if self.name.trim().is_empty() {
            return Err(HubError::validation("module name must not be empty"));
        }
        if self.capabilities.is_empty() {
            return Err(HubError::validation(format!(
                "module '{}' must declare at least one capability",
                self.name
            )));
        }
        if self.subscriptions.is_empty() {
            return Err(HubError::validation(format!(
                "module '{}' must subscribe to at least one event type",
                self.name
            )));
        }
        for event_type in &self.subscriptions {
            event_type.validate()?;
        }
        Ok(())
    }
}

/// Liveness counters shared between the registry and the module's mailbox worker
#[derive(Debug)]
pub struct ModuleHealth {
    healthy: AtomicBool,
    handled: AtomicU64,
    failures: AtomicU64,
}

impl Default for ModuleHealth {
    fn default() -> Self {
        Self {
            healthy: AtomicBool::new(true),
            handled: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }
}

impl ModuleHealth {
    /// Record a completed handler call; a module is healthy while its last call succeeded
    pub fn record(&self, ok: bool) {
        self.handled.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
        self.healthy.store(ok, Ordering::Relaxed);
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    pub fn handled(&self) -> u64 {
        self.handled.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

/// Read-only snapshot of a registered module
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleInfo {
    pub id: ModuleId,
    pub name: String,
    pub module_type: ModuleType,
    pub version: String,
    pub description: String,
    pub capabilities: BTreeSet<Capability>,
    pub subscriptions: BTreeSet<EventType>,
    pub healthy: bool,
    pub handled: u64,
    pub failures: u64,
    pub registered_at: DateTime<Utc>,
}
