//! Main Orchestrator task implementation

use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use serde::{Deserialize, Serialize};
use sharedctx::ContextStore;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::config::OrchestratorConfig;
use super::job::{AggregationJob, JobState, ResponderStatus};
use super::tracker::ContextTracker;
use crate::bus::{EventBus, HandlerOutcome, Published};
use crate::domain::{Event, EventType, ModuleId};
use crate::error::{HubError, HubResult};
use crate::registry::ModuleRegistry;

/// Source ID of events the orchestrator publishes
pub const CORE_SOURCE_ID: &str = "core";

/// Orchestrator counters (thread-safe)
#[derive(Debug, Default)]
pub struct OrchestratorMetrics {
    events_seen: AtomicU64,
    events_without_targets: AtomicU64,
    notifications: AtomicU64,
    jobs_started: AtomicU64,
    jobs_completed: AtomicU64,
    jobs_timed_out: AtomicU64,
}

/// Point-in-time copy of the orchestrator counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub events_seen: u64,
    pub events_without_targets: u64,
    pub notifications: u64,
    pub jobs_started: u64,
    pub jobs_completed: u64,
    pub jobs_timed_out: u64,
}

impl OrchestratorMetrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events_seen: self.events_seen.load(Ordering::Relaxed),
            events_without_targets: self.events_without_targets.load(Ordering::Relaxed),
            notifications: self.notifications.load(Ordering::Relaxed),
            jobs_started: self.jobs_started.load(Ordering::Relaxed),
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            jobs_timed_out: self.jobs_timed_out.load(Ordering::Relaxed),
        }
    }
}

type ActiveJobs = Arc<Mutex<HashSet<String>>>;

fn lock_active(active: &ActiveJobs) -> MutexGuard<'_, HashSet<String>> {
    active.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The Orchestrator routes every published event to its relevant modules
/// and aggregates their answers
///
/// Relevance is the subscriber snapshot taken at publish time, minus the
/// publishing module, narrowed to modules holding the event's required
/// capability when it names one. Every relevant module receives the event;
/// there is no single winner.
pub struct Orchestrator {
    config: OrchestratorConfig,
    registry: Arc<ModuleRegistry>,
    bus: Arc<EventBus>,
    tracker: ContextTracker,
    active: ActiveJobs,
    metrics: Arc<OrchestratorMetrics>,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        registry: Arc<ModuleRegistry>,
        bus: Arc<EventBus>,
        context: Arc<ContextStore>,
    ) -> Self {
        debug!(?config, "Orchestrator::new: called");
        Self {
            config,
            registry,
            bus,
            tracker: ContextTracker::new(context),
            active: Arc::new(Mutex::new(HashSet::new())),
            metrics: Arc::new(OrchestratorMetrics::default()),
        }
    }

    /// Shared handle to the counters; stays valid after `run` consumes self
    pub fn metrics(&self) -> Arc<OrchestratorMetrics> {
        self.metrics.clone()
    }

    /// Run the dispatch loop until shutdown is signalled
    pub async fn run(self, mut shutdown_rx: mpsc::Receiver<()>) -> HubResult<()> {
        let mut intake = self
            .bus
            .take_intake()
            .ok_or(HubError::ChannelClosed("Bus intake"))?;
        info!("Orchestrator started");

        loop {
            tokio::select! {
                published = intake.recv() => match published {
                    Some(published) => self.process(published),
                    None => break,
                },
                _ = shutdown_rx.recv() => {
                    info!("Orchestrator received shutdown signal");
                    break;
                }
            }
        }

        info!("Orchestrator stopped");
        Ok(())
    }

    /// Handle one published event; never waits on handlers
    pub fn process(&self, published: Published) {
        let event = published.event.clone();
        debug!(
            event_type = %event.event_type(),
            correlation_id = %event.correlation_id(),
            "Orchestrator::process: called"
        );
        self.metrics.events_seen.fetch_add(1, Ordering::Relaxed);
        self.tracker.observe(&event);

        let targets = self.select_targets(&published);
        if targets.is_empty() {
            self.metrics.events_without_targets.fetch_add(1, Ordering::Relaxed);
            debug!(event_type = %event.event_type(), "No relevant modules, nothing to aggregate");
            return;
        }

        if !event.event_type().is_aggregated() {
            self.notify(&event, &targets);
            return;
        }

        if !lock_active(&self.active).insert(event.correlation_id().to_string()) {
            warn!(
                correlation_id = %event.correlation_id(),
                "Correlation ID already being aggregated, delivering without aggregation"
            );
            self.notify(&event, &targets);
            return;
        }

        self.fan_out(event, targets);
    }

    /// Relevant modules for a published event, with their display names
    fn select_targets(&self, published: &Published) -> Vec<(ModuleId, String)> {
        let event = &published.event;
        published
            .subscribers
            .iter()
            .filter(|id| !(self.config.skip_source_module && id.as_str() == event.source_module_id()))
            .filter(|id| {
                event
                    .required_capability()
                    .is_none_or(|capability| self.registry.has_capability(id, capability))
            })
            .filter_map(|id| self.registry.name_of(id).map(|name| (id.clone(), name)))
            .collect()
    }

    fn notify(&self, event: &Arc<Event>, targets: &[(ModuleId, String)]) {
        self.metrics.notifications.fetch_add(1, Ordering::Relaxed);
        for (id, _) in targets {
            self.bus.deliver(id, event.clone(), None);
        }
    }

    fn fan_out(&self, event: Arc<Event>, targets: Vec<(ModuleId, String)>) {
        let deadline = Instant::now() + self.config.deadline();
        let mut job = AggregationJob::new(&event, targets.clone(), deadline);
        let pending = FuturesUnordered::new();

        for (id, _) in targets {
            let (reply_tx, reply_rx) = oneshot::channel();
            if self.bus.deliver(&id, event.clone(), Some(reply_tx)) {
                pending.push(async move { (id, reply_rx.await) });
            } else {
                job.record(
                    &id,
                    ResponderStatus::Error {
                        error: "module detached before delivery".to_string(),
                    },
                );
            }
        }

        self.metrics.jobs_started.fetch_add(1, Ordering::Relaxed);
        info!(
            correlation_id = %event.correlation_id(),
            responders = job.expected_len(),
            "Aggregation started"
        );

        tokio::spawn(collect(
            event,
            job,
            pending,
            self.bus.clone(),
            self.active.clone(),
            self.metrics.clone(),
        ));
    }
}

/// Wait for responders until all report or the deadline passes, then
/// publish the aggregated response
async fn collect<F>(
    request: Arc<Event>,
    mut job: AggregationJob,
    mut pending: FuturesUnordered<F>,
    bus: Arc<EventBus>,
    active: ActiveJobs,
    metrics: Arc<OrchestratorMetrics>,
) where
    F: Future<Output = (ModuleId, Result<HandlerOutcome, oneshot::error::RecvError>)>,
{
    let started = Instant::now();
    while !job.is_settled() {
        match tokio::time::timeout_at(job.deadline(), pending.next()).await {
            Ok(Some((id, Ok(outcome)))) => {
                job.record(&id, outcome.into());
            }
            Ok(Some((id, Err(_)))) => {
                job.record(
                    &id,
                    ResponderStatus::Error {
                        error: "module dropped the request".to_string(),
                    },
                );
            }
            Ok(None) | Err(_) => break,
        }
    }
    // Replies that arrive after this point are discarded by the sender
    drop(pending);

    match job.close() {
        JobState::Complete => {
            metrics.jobs_completed.fetch_add(1, Ordering::Relaxed);
        }
        JobState::TimedOut => {
            metrics.jobs_timed_out.fetch_add(1, Ordering::Relaxed);
            let waited_ms = started.elapsed().as_millis() as u64;
            for module_id in job.missing() {
                let err = HubError::Timeout {
                    module_id: module_id.to_string(),
                    waited_ms,
                };
                warn!(correlation_id = %job.correlation_id(), error = %err, "Responder timed out");
            }
        }
        JobState::Collecting => {}
    }

    let response = job.into_response();
    lock_active(&active).remove(&response.correlation_id);
    info!(
        correlation_id = %response.correlation_id,
        state = ?response.state,
        elapsed_ms = response.elapsed_ms,
        "Aggregation finished"
    );

    let payload = match serde_json::to_value(&response) {
        Ok(payload) => payload,
        Err(e) => {
            error!(correlation_id = %response.correlation_id, error = %e, "Failed to encode aggregated response");
            return;
        }
    };
    let reply = Event::in_reply_to(EventType::IntelligenceResponse, CORE_SOURCE_ID, &request, payload);
    if let Err(e) = bus.publish(reply) {
        error!(correlation_id = %response.correlation_id, error = %e, "Failed to publish aggregated response");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::BusConfig;
    use crate::domain::{Capability, ModuleHandler, Registration, handler_fn};
    use crate::orchestrator::AggregatedResponse;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::broadcast;

    struct Fixture {
        bus: Arc<EventBus>,
        registry: Arc<ModuleRegistry>,
        context: Arc<ContextStore>,
        metrics: Arc<OrchestratorMetrics>,
        _shutdown_tx: mpsc::Sender<()>,
    }

    fn start(deadline_ms: u64) -> Fixture {
        let config = OrchestratorConfig {
            deadline_ms,
            ..Default::default()
        };
        let bus = Arc::new(EventBus::new(&BusConfig::default(), config.max_concurrency));
        let registry = Arc::new(ModuleRegistry::new(bus.clone()));
        let context = Arc::new(ContextStore::new());
        let orchestrator = Orchestrator::new(config, registry.clone(), bus.clone(), context.clone());
        let metrics = orchestrator.metrics();
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        tokio::spawn(orchestrator.run(shutdown_rx));
        Fixture {
            bus,
            registry,
            context,
            metrics,
            _shutdown_tx: shutdown_tx,
        }
    }

    fn module(name: &str, event_type: EventType) -> Registration {
        Registration::new(name)
            .capability(Capability::Analysis)
            .subscribe(event_type)
    }

    fn echo(tag: &'static str) -> Arc<dyn ModuleHandler> {
        handler_fn(move |_e: Arc<Event>| async move { Ok(json!({"from": tag, "confidence": 0.8})) })
    }

    async fn next_response(watcher: &mut broadcast::Receiver<Arc<Event>>, within: Duration) -> Option<Arc<Event>> {
        tokio::time::timeout(within, async {
            loop {
                match watcher.recv().await {
                    Ok(event) if event.event_type() == &EventType::IntelligenceResponse => return Some(event),
                    Ok(_) => continue,
                    Err(_) => return None,
                }
            }
        })
        .await
        .ok()
        .flatten()
    }

    #[tokio::test]
    async fn test_fan_out_aggregates_all_responders() {
        let fx = start(1000);
        let a = fx.registry.register(module("a", EventType::TaskCreated), echo("a")).unwrap();
        let b = fx.registry.register(module("b", EventType::TaskCreated), echo("b")).unwrap();
        let mut watcher = fx.bus.watch();

        let request = fx
            .bus
            .publish(Event::new(EventType::TaskCreated, "client", json!({"task_id": "t1"})))
            .unwrap();
        let response = next_response(&mut watcher, Duration::from_secs(2)).await.unwrap();

        assert_eq!(response.correlation_id(), request.correlation_id());
        assert_eq!(response.source_module_id(), CORE_SOURCE_ID);
        let payload = AggregatedResponse::from_event(&response).unwrap();
        assert_eq!(payload.state, JobState::Complete);
        let ids: Vec<ModuleId> = payload.responses.iter().map(|r| r.module_id.clone()).collect();
        assert_eq!(ids, vec![a, b]);
        assert_eq!(payload.summary.modules_engaged, 2);

        // The task event was folded into the shared context
        assert!(fx.context.contains("task:t1"));
        assert_eq!(fx.metrics.snapshot().jobs_completed, 1);
    }

    #[tokio::test]
    async fn test_required_capability_narrows_targets() {
        let fx = start(1000);
        fx.registry.register(module("plain", EventType::MessageReceived), echo("plain")).unwrap();
        let chat = fx
            .registry
            .register(
                Registration::new("chatty")
                    .capability(Capability::Chat)
                    .subscribe(EventType::MessageReceived),
                echo("chatty"),
            )
            .unwrap();
        let mut watcher = fx.bus.watch();

        fx.bus
            .publish(
                Event::new(EventType::MessageReceived, "client", json!({"content": "hi"}))
                    .with_required_capability(Capability::Chat),
            )
            .unwrap();
        let response = next_response(&mut watcher, Duration::from_secs(2)).await.unwrap();
        let payload = AggregatedResponse::from_event(&response).unwrap();
        assert_eq!(payload.responses.len(), 1);
        assert_eq!(payload.responses[0].module_id, chat);
    }

    #[tokio::test]
    async fn test_source_module_is_skipped() {
        let fx = start(1000);
        let a = fx.registry.register(module("a", EventType::TaskCreated), echo("a")).unwrap();
        let b = fx.registry.register(module("b", EventType::TaskCreated), echo("b")).unwrap();
        let mut watcher = fx.bus.watch();

        fx.bus
            .publish(Event::new(EventType::TaskCreated, a.as_str(), json!({})))
            .unwrap();
        let response = next_response(&mut watcher, Duration::from_secs(2)).await.unwrap();
        let payload = AggregatedResponse::from_event(&response).unwrap();
        assert_eq!(payload.responses.len(), 1);
        assert_eq!(payload.responses[0].module_id, b);
    }

    #[tokio::test]
    async fn test_straggler_times_out() {
        let fx = start(100);
        fx.registry.register(module("fast", EventType::TaskCreated), echo("fast")).unwrap();
        let slow = fx
            .registry
            .register(
                module("slow", EventType::TaskCreated),
                handler_fn(|_e: Arc<Event>| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(json!({}))
                }),
            )
            .unwrap();
        let mut watcher = fx.bus.watch();

        fx.bus
            .publish(Event::new(EventType::TaskCreated, "client", json!({})))
            .unwrap();
        let response = next_response(&mut watcher, Duration::from_secs(2)).await.unwrap();
        let payload = AggregatedResponse::from_event(&response).unwrap();
        assert_eq!(payload.state, JobState::TimedOut);
        let slow_status = payload.responses.iter().find(|r| r.module_id == slow).unwrap();
        assert_eq!(slow_status.status, ResponderStatus::TimedOut);
        assert_eq!(
            payload
                .responses
                .iter()
                .filter(|r| matches!(r.status, ResponderStatus::Ok { .. }))
                .count(),
            1
        );
        assert_eq!(fx.metrics.snapshot().jobs_timed_out, 1);
    }

    #[tokio::test]
    async fn test_responses_are_not_aggregated_again() {
        let fx = start(200);
        let seen = Arc::new(AtomicU64::new(0));
        let counter = seen.clone();
        fx.registry
            .register(
                module("listener", EventType::IntelligenceResponse),
                handler_fn(move |_e: Arc<Event>| {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(json!({}))
                    }
                }),
            )
            .unwrap();
        fx.registry.register(module("worker", EventType::TaskCreated), echo("w")).unwrap();

        fx.bus
            .publish(Event::new(EventType::TaskCreated, "client", json!({})))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;

        assert_eq!(seen.load(Ordering::SeqCst), 1);
        let responses = fx
            .bus
            .recent_events(100)
            .iter()
            .filter(|e| e.event_type() == &EventType::IntelligenceResponse)
            .count();
        assert_eq!(responses, 1);
        assert_eq!(fx.metrics.snapshot().jobs_started, 1);
    }

    #[tokio::test]
    async fn test_no_subscribers_no_response() {
        let fx = start(100);
        fx.registry.register(module("m", EventType::TaskCreated), echo("m")).unwrap();
        let mut watcher = fx.bus.watch();

        fx.bus
            .publish(Event::new(EventType::UserActivity, "client", json!({"user_id": "u"})))
            .unwrap();
        assert!(next_response(&mut watcher, Duration::from_millis(300)).await.is_none());
        assert_eq!(fx.metrics.snapshot().jobs_started, 0);
    }
}
