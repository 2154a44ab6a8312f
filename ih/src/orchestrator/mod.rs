//! Core orchestrator: relevance detection, parallel dispatch and aggregation
//!
//! For each inbound event the orchestrator:
//! - folds the event into the shared context
//! - picks every relevant module (fan-out, not routing)
//! - dispatches to all of them through their mailboxes
//! - collects outcomes until all report or the deadline passes
//! - publishes one INTELLIGENCE_RESPONSE with a status per responder

mod config;
mod core;
mod insights;
mod job;
mod tracker;

pub use config::OrchestratorConfig;
pub use core::{CORE_SOURCE_ID, MetricsSnapshot, Orchestrator, OrchestratorMetrics};
pub use insights::{ConsensusLevel, CoreSummary};
pub use job::{AggregatedResponse, AggregationJob, JobState, ModuleStatus, ResponderStatus};
pub use tracker::{CONVERSATION_LIMIT, ContextTracker, TrackerStats};
