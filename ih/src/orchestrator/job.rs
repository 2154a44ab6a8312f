//! Aggregation job: collects per-module outcomes for one correlated event

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;
use tracing::debug;

use super::insights::CoreSummary;
use crate::bus::HandlerOutcome;
use crate::domain::{Event, EventType, ModuleId};

/// Lifecycle of an aggregation job
///
/// `Collecting` moves to exactly one terminal state and never back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Collecting,
    Complete,
    TimedOut,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobState::Collecting)
    }
}

/// Outcome recorded for one expected responder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResponderStatus {
    Ok { result: Value },
    Error { error: String },
    TimedOut,
}

impl From<HandlerOutcome> for ResponderStatus {
    fn from(outcome: HandlerOutcome) -> Self {
        match outcome {
            HandlerOutcome::Success(result) => ResponderStatus::Ok { result },
            HandlerOutcome::Failure(error) => ResponderStatus::Error { error },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleStatus {
    pub module_id: ModuleId,
    pub module_name: String,
    #[serde(flatten)]
    pub status: ResponderStatus,
}

/// Payload of an INTELLIGENCE_RESPONSE event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedResponse {
    pub correlation_id: String,
    pub request_type: EventType,
    pub state: JobState,
    /// One entry per expected responder, in dispatch order
    pub responses: Vec<ModuleStatus>,
    pub summary: CoreSummary,
    pub elapsed_ms: u64,
}

impl AggregatedResponse {
    /// Decode the payload of an INTELLIGENCE_RESPONSE event
    pub fn from_event(event: &Event) -> serde_json::Result<Self> {
        serde_json::from_value(event.payload().clone())
    }
}

#[derive(Debug)]
pub struct AggregationJob {
    correlation_id: String,
    request_type: EventType,
    expected: Vec<(ModuleId, String)>,
    outcomes: HashMap<ModuleId, ResponderStatus>,
    state: JobState,
    started: Instant,
    deadline: Instant,
}

impl AggregationJob {
    /// Start collecting for `event`; `expected` pairs module IDs with display names
    pub fn new(event: &Event, expected: Vec<(ModuleId, String)>, deadline: Instant) -> Self {
        debug!(
            correlation_id = %event.correlation_id(),
            expected = expected.len(),
            "AggregationJob::new: called"
        );
        Self {
            correlation_id: event.correlation_id().to_string(),
            request_type: event.event_type().clone(),
            expected,
            outcomes: HashMap::new(),
            state: JobState::Collecting,
            started: Instant::now(),
            deadline,
        }
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn expected_len(&self) -> usize {
        self.expected.len()
    }

    /// Record one responder's outcome
    ///
    /// Returns `false` and leaves the job untouched if the job is closed, the
    /// module was not dispatched to, or the module already reported.
    pub fn record(&mut self, module_id: &ModuleId, status: ResponderStatus) -> bool {
        if self.state.is_terminal() {
            debug!(correlation_id = %self.correlation_id, %module_id, "AggregationJob::record: job closed");
            return false;
        }
        if !self.expected.iter().any(|(id, _)| id == module_id) || self.outcomes.contains_key(module_id) {
            return false;
        }
        self.outcomes.insert(module_id.clone(), status);
        true
    }

    /// Every expected responder has reported
    pub fn is_settled(&self) -> bool {
        self.outcomes.len() == self.expected.len()
    }

    /// Move to a terminal state; later calls keep the first result
    pub fn close(&mut self) -> JobState {
        if self.state == JobState::Collecting {
            self.state = if self.is_settled() {
                JobState::Complete
            } else {
                JobState::TimedOut
            };
        }
        self.state
    }

    /// Modules that have not reported yet
    pub fn missing(&self) -> Vec<ModuleId> {
        self.expected
            .iter()
            .filter(|(id, _)| !self.outcomes.contains_key(id))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Close the job and build the response payload
    pub fn into_response(mut self) -> AggregatedResponse {
        let state = self.close();
        let responses: Vec<ModuleStatus> = self
            .expected
            .into_iter()
            .map(|(module_id, module_name)| {
                let status = self
                    .outcomes
                    .remove(&module_id)
                    .unwrap_or(ResponderStatus::TimedOut);
                ModuleStatus {
                    module_id,
                    module_name,
                    status,
                }
            })
            .collect();
        let summary = CoreSummary::synthesize(&responses);
        AggregatedResponse {
            correlation_id: self.correlation_id,
            request_type: self.request_type,
            state,
            responses,
            summary,
            elapsed_ms: self.started.elapsed().as_millis() as u64,
        }
    }
}
