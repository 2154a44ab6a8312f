//! End-to-end tests for the hub: registration, fan-out, aggregation and isolation

use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use intelhub::domain::ModuleHandler;
use intelhub::modules::register_examples;
use intelhub::orchestrator::{JobState, ResponderStatus};
use intelhub::{
    AggregatedResponse, Capability, Config, Event, EventType, Hub, ModuleId, OrchestratorConfig, Registration,
    handler_fn,
};
use proptest::prelude::*;
use serde_json::{Value, json};
use tokio::sync::broadcast;

fn config(deadline_ms: u64) -> Config {
    Config {
        orchestrator: OrchestratorConfig {
            deadline_ms,
            ..Default::default()
        },
        ..Default::default()
    }
}

fn counting(counter: Arc<AtomicUsize>) -> Arc<dyn ModuleHandler> {
    handler_fn(move |_event: Arc<Event>| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(json!({"confidence": 0.9}))
        }
    })
}

async fn response_for(
    watcher: &mut broadcast::Receiver<Arc<Event>>,
    correlation_id: &str,
    within: Duration,
) -> Option<Arc<Event>> {
    tokio::time::timeout(within, async {
        loop {
            match watcher.recv().await {
                Ok(e) if e.event_type() == &EventType::IntelligenceResponse && e.correlation_id() == correlation_id => {
                    return Some(e);
                }
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
async fn test_scenario_only_subscribed_module_runs() {
    let hub = Hub::start(&config(1000)).unwrap();
    let m1_calls = Arc::new(AtomicUsize::new(0));
    let m2_calls = Arc::new(AtomicUsize::new(0));

    let m1 = hub
        .registry()
        .register(
            Registration::new("M1")
                .capability(Capability::TaskManagement)
                .subscribe(EventType::TaskCreated),
            counting(m1_calls.clone()),
        )
        .unwrap();
    hub.registry()
        .register(
            Registration::new("M2")
                .capability(Capability::Chat)
                .subscribe(EventType::MessageReceived),
            counting(m2_calls.clone()),
        )
        .unwrap();

    let mut watcher = hub.bus().watch();
    let request = hub
        .publish(Event::new(EventType::TaskCreated, "client", json!({"task_id": "t1"})))
        .unwrap();
    let response = response_for(&mut watcher, request.correlation_id(), Duration::from_secs(3))
        .await
        .expect("aggregated response");

    // Give any stray delivery a chance to show up
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(m1_calls.load(Ordering::SeqCst), 1);
    assert_eq!(m2_calls.load(Ordering::SeqCst), 0);

    let aggregated = AggregatedResponse::from_event(&response).unwrap();
    assert_eq!(aggregated.state, JobState::Complete);
    assert_eq!(aggregated.responses.len(), 1);
    assert_eq!(aggregated.responses[0].module_id, m1);
    assert!(matches!(aggregated.responses[0].status, ResponderStatus::Ok { .. }));

    let responses = hub
        .bus()
        .recent_events(100)
        .iter()
        .filter(|e| e.event_type() == &EventType::IntelligenceResponse)
        .count();
    assert_eq!(responses, 1);

    hub.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_zero_subscribers_emit_nothing() {
    let hub = Hub::start(&config(200)).unwrap();
    hub.registry()
        .register(
            Registration::new("tasks")
                .capability(Capability::TaskManagement)
                .subscribe(EventType::TaskCreated),
            counting(Arc::new(AtomicUsize::new(0))),
        )
        .unwrap();

    let mut watcher = hub.bus().watch();
    let request = hub
        .publish(Event::new(EventType::Custom("nobody_listens".to_string()), "client", json!({})))
        .unwrap();
    assert!(
        response_for(&mut watcher, request.correlation_id(), Duration::from_millis(500))
            .await
            .is_none()
    );
    assert_eq!(hub.metrics().jobs_started, 0);
    assert_eq!(hub.metrics().events_without_targets, 2); // registration announcement too

    hub.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_every_subscriber_gets_exactly_one_delivery() {
    let hub = Hub::start(&config(1000)).unwrap();
    let counters: Vec<Arc<AtomicUsize>> = (0..5).map(|_| Arc::new(AtomicUsize::new(0))).collect();
    for (i, counter) in counters.iter().enumerate() {
        hub.registry()
            .register(
                Registration::new(format!("m{}", i))
                    .capability(Capability::Analytics)
                    .subscribe(EventType::UserActivity),
                counting(counter.clone()),
            )
            .unwrap();
    }

    let mut watcher = hub.bus().watch();
    let request = hub
        .publish(Event::new(EventType::UserActivity, "client", json!({"user_id": "u1"})))
        .unwrap();
    let response = response_for(&mut watcher, request.correlation_id(), Duration::from_secs(3))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    for counter in &counters {
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
    let aggregated = AggregatedResponse::from_event(&response).unwrap();
    assert_eq!(aggregated.responses.len(), 5);
    assert!(
        aggregated
            .responses
            .iter()
            .all(|r| r.status != ResponderStatus::TimedOut)
    );

    hub.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_failure_in_one_module_is_isolated() {
    let hub = Hub::start(&config(1000)).unwrap();
    let b_calls = Arc::new(AtomicUsize::new(0));

    let a = hub
        .registry()
        .register(
            Registration::new("A")
                .capability(Capability::Chat)
                .subscribe(EventType::MessageReceived),
            handler_fn(|_e: Arc<Event>| async { Err(eyre::eyre!("model unavailable")) }),
        )
        .unwrap();
    let b = hub
        .registry()
        .register(
            Registration::new("B")
                .capability(Capability::Chat)
                .subscribe(EventType::MessageReceived),
            counting(b_calls.clone()),
        )
        .unwrap();

    let mut watcher = hub.bus().watch();
    let request = hub
        .publish(Event::new(EventType::MessageReceived, "client", json!({"content": "hello"})))
        .unwrap();
    let response = response_for(&mut watcher, request.correlation_id(), Duration::from_secs(3))
        .await
        .unwrap();

    assert_eq!(b_calls.load(Ordering::SeqCst), 1);
    let aggregated = AggregatedResponse::from_event(&response).unwrap();
    assert_eq!(aggregated.state, JobState::Complete);
    let status_of = |id: &ModuleId| {
        aggregated
            .responses
            .iter()
            .find(|r| &r.module_id == id)
            .map(|r| r.status.clone())
            .unwrap()
    };
    assert_eq!(
        status_of(&a),
        ResponderStatus::Error {
            error: "model unavailable".to_string()
        }
    );
    assert!(matches!(status_of(&b), ResponderStatus::Ok { .. }));

    let errors = hub.bus().recent_errors(10);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].module_id, a);
    assert!(!hub.registry().get(&a).unwrap().healthy);
    assert!(hub.registry().get(&b).unwrap().healthy);

    hub.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_straggler_marked_timed_out_at_deadline() {
    let hub = Hub::start(&config(150)).unwrap();
    let fast: Vec<ModuleId> = (0..2)
        .map(|i| {
            hub.registry()
                .register(
                    Registration::new(format!("fast{}", i))
                        .capability(Capability::Analysis)
                        .subscribe(EventType::TaskCreated),
                    counting(Arc::new(AtomicUsize::new(0))),
                )
                .unwrap()
        })
        .collect();
    let slow = hub
        .registry()
        .register(
            Registration::new("slow")
                .capability(Capability::Analysis)
                .subscribe(EventType::TaskCreated),
            handler_fn(|_e: Arc<Event>| async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(json!({}))
            }),
        )
        .unwrap();

    let mut watcher = hub.bus().watch();
    let request = hub
        .publish(Event::new(EventType::TaskCreated, "client", json!({"task_id": "t9"})))
        .unwrap();
    let started = tokio::time::Instant::now();
    let response = response_for(&mut watcher, request.correlation_id(), Duration::from_secs(3))
        .await
        .unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));

    let aggregated = AggregatedResponse::from_event(&response).unwrap();
    assert_eq!(aggregated.state, JobState::TimedOut);
    assert_eq!(aggregated.responses.len(), 3);
    for response in &aggregated.responses {
        if response.module_id == slow {
            assert_eq!(response.status, ResponderStatus::TimedOut);
        } else {
            assert!(fast.contains(&response.module_id));
            assert!(matches!(response.status, ResponderStatus::Ok { .. }));
        }
    }

    hub.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_deregister_unknown_module_is_not_found() {
    let hub = Hub::start(&Config::default()).unwrap();
    let err = hub
        .registry()
        .deregister(&ModuleId::from("never-registered"))
        .unwrap_err();
    assert!(err.is_not_found());
    hub.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_deregistered_module_stops_receiving() {
    let hub = Hub::start(&config(300)).unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let id = hub
        .registry()
        .register(
            Registration::new("gone")
                .capability(Capability::Analysis)
                .subscribe(EventType::TaskCreated),
            counting(calls.clone()),
        )
        .unwrap();
    hub.registry().deregister(&id).unwrap();

    let mut watcher = hub.bus().watch();
    let request = hub
        .publish(Event::new(EventType::TaskCreated, "client", json!({})))
        .unwrap();
    assert!(
        response_for(&mut watcher, request.correlation_id(), Duration::from_millis(500))
            .await
            .is_none()
    );
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    hub.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_demo_modules_and_core_summary() {
    let hub = Hub::start(&config(2000)).unwrap();
    register_examples(hub.registry(), hub.context().clone()).unwrap();

    let mut watcher = hub.bus().watch();
    let request = hub
        .publish(Event::new(
            EventType::TaskCreated,
            "client",
            json!({"task_id": "t1", "title": "urgent fix", "status": "pending", "user_id": "u1"}),
        ))
        .unwrap();
    let response = response_for(&mut watcher, request.correlation_id(), Duration::from_secs(4))
        .await
        .unwrap();

    let aggregated = AggregatedResponse::from_event(&response).unwrap();
    let names: Vec<&str> = aggregated.responses.iter().map(|r| r.module_name.as_str()).collect();
    assert_eq!(names, vec!["Task Intelligence Engine", "Insight Generator"]);
    assert_eq!(aggregated.summary.modules_engaged, 2);
    assert_eq!(aggregated.summary.average_confidence, 0.85);
    assert!(!aggregated.summary.synthesized_insights.is_empty());

    let task: Value = hub.context().get("task:t1").unwrap();
    assert_eq!(task["title"], "urgent fix");

    hub.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_dispatch_respects_max_concurrency() {
    let mut config = config(2000);
    config.orchestrator.max_concurrency = 2;
    let hub = Hub::start(&config).unwrap();

    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    for i in 0..6 {
        let running = running.clone();
        let peak = peak.clone();
        hub.registry()
            .register(
                Registration::new(format!("slow-{}", i))
                    .capability(Capability::Analysis)
                    .subscribe(EventType::TaskCreated),
                handler_fn(move |_event: Arc<Event>| {
                    let running = running.clone();
                    let peak = peak.clone();
                    async move {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        running.fetch_sub(1, Ordering::SeqCst);
                        Ok(json!({"confidence": 0.5}))
                    }
                }),
            )
            .unwrap();
    }

    let mut watcher = hub.bus().watch();
    let request = hub
        .publish(Event::new(EventType::TaskCreated, "client", json!({})))
        .unwrap();
    let response = response_for(&mut watcher, request.correlation_id(), Duration::from_secs(3))
        .await
        .expect("aggregated response");

    let aggregated = AggregatedResponse::from_event(&response).unwrap();
    assert_eq!(aggregated.state, JobState::Complete);
    assert_eq!(aggregated.responses.len(), 6);
    assert!(peak.load(Ordering::SeqCst) <= 2, "peak was {}", peak.load(Ordering::SeqCst));
    assert!(peak.load(Ordering::SeqCst) >= 1);

    hub.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_deregister_keeps_in_flight_result() {
    let hub = Hub::start(&config(1000)).unwrap();
    let id = hub
        .registry()
        .register(
            Registration::new("leaving")
                .capability(Capability::Analysis)
                .subscribe(EventType::TaskCreated),
            handler_fn(|_event: Arc<Event>| async {
                tokio::time::sleep(Duration::from_millis(150)).await;
                Ok(json!({"done": true}))
            }),
        )
        .unwrap();

    let mut watcher = hub.bus().watch();
    let request = hub
        .publish(Event::new(EventType::TaskCreated, "client", json!({})))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    hub.registry().deregister(&id).unwrap();

    let response = response_for(&mut watcher, request.correlation_id(), Duration::from_secs(3))
        .await
        .expect("aggregated response");
    let aggregated = AggregatedResponse::from_event(&response).unwrap();
    assert_eq!(aggregated.state, JobState::Complete);
    assert_eq!(aggregated.responses.len(), 1);
    assert_eq!(aggregated.responses[0].module_id, id);
    match &aggregated.responses[0].status {
        ResponderStatus::Ok { result } => assert_eq!(result["done"], true),
        other => panic!("unexpected status: {:?}", other),
    }

    hub.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_subscriber_sees_events_in_publish_order() {
    let hub = Hub::start(&config(1000)).unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorder = seen.clone();
    hub.registry()
        .register(
            Registration::new("ordered")
                .capability(Capability::Analysis)
                .subscriptions([EventType::TaskCreated, EventType::MessageReceived]),
            handler_fn(move |event: Arc<Event>| {
                let recorder = recorder.clone();
                async move {
                    let seq = event.payload()["seq"].as_u64().unwrap_or(u64::MAX);
                    recorder.lock().unwrap().push(seq);
                    Ok(json!({}))
                }
            }),
        )
        .unwrap();

    for seq in 0..20u64 {
        let event_type = if seq % 2 == 0 {
            EventType::TaskCreated
        } else {
            EventType::MessageReceived
        };
        hub.publish(Event::new(event_type, "client", json!({"seq": seq})))
            .unwrap();
    }

    tokio::time::timeout(Duration::from_secs(3), async {
        while seen.lock().unwrap().len() < 20 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("all deliveries");
    assert_eq!(*seen.lock().unwrap(), (0..20).collect::<Vec<u64>>());

    hub.shutdown().await.unwrap();
}

#[test]
fn test_context_last_write_wins() {
    let context = intelhub::ContextStore::new();
    context.set("k", json!(1)).unwrap();
    context.set("k", json!(2)).unwrap();
    assert_eq!(context.get("k").unwrap(), json!(2));
    assert!(matches!(
        context.get("unset"),
        Err(intelhub::ContextError::NotFound { .. })
    ));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_identical_registrations_get_distinct_ids(name in "[a-z]{1,12}", copies in 2usize..6) {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let ids: Vec<ModuleId> = runtime.block_on(async {
            let hub = Hub::start(&Config::default()).unwrap();
            let ids = (0..copies)
                .map(|_| {
                    hub.registry()
                        .register(
                            Registration::new(name.clone())
                                .capability(Capability::Insights)
                                .subscribe(EventType::InsightGenerated),
                            counting(Arc::new(AtomicUsize::new(0))),
                        )
                        .unwrap()
                })
                .collect();
            hub.shutdown().await.unwrap();
            ids
        });
        let unique: std::collections::HashSet<&ModuleId> = ids.iter().collect();
        prop_assert_eq!(unique.len(), copies);
    }
}
