//! IntelHub - event-driven intelligence orchestration
//!
//! CLI entry point for simulating events against the demo modules.

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result};
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tracing::{info, warn};
use uuid::Uuid;

use intelhub::cli::{Cli, Command, OutputFormat, get_log_path};
use intelhub::config::Config;
use intelhub::domain::{Capability, Event, EventType};
use intelhub::hub::Hub;
use intelhub::modules::register_examples;
use intelhub::orchestrator::{AggregatedResponse, ContextTracker, JobState, ResponderStatus, TrackerStats};

const CLIENT_SOURCE_ID: &str = "cli";

/// Send tracing output to the log file; the terminal is reserved for command output
fn setup_logging(verbose: bool) -> Result<()> {
    let log_path = get_log_path();
    if let Some(dir) = log_path.parent() {
        fs::create_dir_all(dir).with_context(|| format!("Cannot create {}", dir.display()))?;
    }
    let log_file = fs::File::create(&log_path).with_context(|| format!("Cannot open {}", log_path.display()))?;

    let level = if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into());
    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(filter)
        .init();

    info!(verbose, path = %log_path.display(), "Logging ready");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    info!(
        "IntelHub loaded config: max-concurrency={}, deadline-ms={}",
        config.orchestrator.max_concurrency, config.orchestrator.deadline_ms
    );

    match cli.command {
        Command::Simulate {
            event,
            title,
            capability,
            user,
            format,
        } => cmd_simulate(&config, event, &title, capability, &user, format).await,
        Command::Modules { format } => cmd_modules(&config, format).await,
        Command::Config => cmd_config(&config),
    }
}

/// Payload the demo modules expect for each event type
fn simulated_payload(event_type: &EventType, title: &str, user: &str) -> Value {
    match event_type {
        EventType::TaskCreated | EventType::TaskUpdated | EventType::TaskCompleted => json!({
            "task_id": Uuid::now_v7().to_string(),
            "title": title,
            "status": "pending",
            "user_id": user,
        }),
        EventType::MessageReceived | EventType::MessageSent => json!({
            "message_id": Uuid::now_v7().to_string(),
            "conversation_id": Uuid::now_v7().to_string(),
            "content": title,
            "sender": "user",
            "user_id": user,
        }),
        EventType::UserActivity => json!({
            "user_id": user,
            "activity_type": "page_view",
            "description": title,
        }),
        EventType::InsightGenerated => json!({
            "insight": {"summary": title},
            "user_id": user,
        }),
        _ => json!({
            "title": title,
            "user_id": user,
        }),
    }
}

/// Wait for the INTELLIGENCE_RESPONSE correlated with `correlation_id`
async fn await_response(
    watcher: &mut broadcast::Receiver<Arc<Event>>,
    correlation_id: &str,
    within: Duration,
) -> Option<Arc<Event>> {
    let wait = async {
        loop {
            match watcher.recv().await {
                Ok(event)
                    if event.event_type() == &EventType::IntelligenceResponse
                        && event.correlation_id() == correlation_id =>
                {
                    return Some(event);
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Watcher lagged behind the bus");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    };
    tokio::time::timeout(within, wait).await.ok().flatten()
}

/// Publish one event to the demo modules and print the aggregated response
async fn cmd_simulate(
    config: &Config,
    event_type: EventType,
    title: &str,
    capability: Option<Capability>,
    user: &str,
    format: OutputFormat,
) -> Result<()> {
    let hub = Hub::start(config)?;
    register_examples(hub.registry(), hub.context().clone())?;

    let mut watcher = hub.bus().watch();
    let mut event = Event::new(event_type.clone(), CLIENT_SOURCE_ID, simulated_payload(&event_type, title, user));
    if let Some(capability) = capability {
        event = event.with_required_capability(capability);
    }
    let published = hub.publish(event)?;
    info!(correlation_id = %published.correlation_id(), "Simulated event published");

    let within = config.orchestrator.deadline() + Duration::from_secs(1);
    let response = await_response(&mut watcher, published.correlation_id(), within).await;

    match response {
        Some(event) => {
            let aggregated = AggregatedResponse::from_event(&event).context("Malformed aggregated response")?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(event.as_ref())?),
                OutputFormat::Text => {
                    print_response(&aggregated);
                    print_context(&ContextTracker::new(hub.context().clone()).stats());
                }
            }
        }
        None => match format {
            OutputFormat::Json => println!(
                "{}",
                json!({
                    "correlation_id": published.correlation_id(),
                    "responses": [],
                    "message": "No relevant modules, no response emitted",
                })
            ),
            OutputFormat::Text => println!(
                "{} No relevant modules for {}, no response emitted",
                "-".yellow(),
                event_type
            ),
        },
    }

    hub.shutdown().await?;
    Ok(())
}

fn print_response(response: &AggregatedResponse) {
    let state = match response.state {
        JobState::Complete => "complete".green(),
        JobState::TimedOut => "timed_out".yellow(),
        JobState::Collecting => "collecting".normal(),
    };
    println!("Intelligence Response");
    println!("---------------------");
    println!("Request:        {}", response.request_type);
    println!("Correlation ID: {}", response.correlation_id.cyan());
    println!("State:          {} ({}ms)", state, response.elapsed_ms);
    println!();

    for module in &response.responses {
        match &module.status {
            ResponderStatus::Ok { result } => {
                let confidence = result.get("confidence").and_then(Value::as_f64).unwrap_or(0.0);
                println!(
                    "{} {:<26} confidence {:.2}",
                    "✓".green(),
                    module.module_name,
                    confidence
                );
            }
            ResponderStatus::Error { error } => {
                println!("{} {:<26} {}", "✗".red(), module.module_name, error.red());
            }
            ResponderStatus::TimedOut => {
                println!("{} {:<26} {}", "…".yellow(), module.module_name, "timed out".yellow());
            }
        }
    }

    let summary = &response.summary;
    println!();
    println!("Modules engaged:    {}", summary.modules_engaged);
    println!("Average confidence: {:.2}", summary.average_confidence);
    println!("Consensus:          {:?}", summary.consensus_level);
    for insight in &summary.synthesized_insights {
        println!("  - {}", insight);
    }
}

fn print_context(stats: &TrackerStats) {
    println!();
    println!(
        "Context: {} conversations, {} active tasks, {} cached insights, {} tracked users",
        stats.total_conversations, stats.active_tasks, stats.cached_insights, stats.tracked_users
    );
}

/// List the demo modules and registry statistics
async fn cmd_modules(config: &Config, format: OutputFormat) -> Result<()> {
    let hub = Hub::start(config)?;
    register_examples(hub.registry(), hub.context().clone())?;

    let modules = hub.registry().list();
    let stats = hub.registry().stats();

    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "modules": modules,
                    "stats": stats,
                }))?
            );
        }
        OutputFormat::Text => {
            println!("Registered Modules");
            println!("------------------");
            for module in &modules {
                let capabilities: Vec<String> = module.capabilities.iter().map(|c| c.to_string()).collect();
                let subscriptions: Vec<String> = module.subscriptions.iter().map(|s| s.to_string()).collect();
                println!(
                    "{} {} v{} [{}]",
                    "●".green(),
                    module.name.bold(),
                    module.version,
                    module.module_type
                );
                println!("    id:            {}", module.id.to_string().cyan());
                println!("    capabilities:  {}", capabilities.join(", "));
                println!("    subscriptions: {}", subscriptions.join(", "));
            }
            println!();
            println!(
                "Total: {} ({} healthy)",
                stats.total_modules, stats.healthy_modules
            );
        }
    }

    hub.shutdown().await?;
    Ok(())
}

/// Print the effective configuration
fn cmd_config(config: &Config) -> Result<()> {
    print!("{}", config.to_yaml()?);
    Ok(())
}
