//! Per-module delivery queue and worker
//!
//! Each attached module owns one unbounded queue drained by one worker task,
//! which gives per-subscriber FIFO delivery while different modules run in
//! parallel. A shared semaphore bounds how many handlers run at once.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::{Semaphore, mpsc, oneshot};
use tracing::{debug, warn};

use super::journal::{DeliveryFailure, Journal};
use crate::domain::{Event, ModuleHandler, ModuleHealth, ModuleId};
use crate::error::HubError;

/// Result of one handler invocation
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerOutcome {
    Success(Value),
    Failure(String),
}

impl HandlerOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, HandlerOutcome::Success(_))
    }
}

pub(crate) struct Envelope {
    pub(crate) event: Arc<Event>,
    pub(crate) reply: Option<oneshot::Sender<HandlerOutcome>>,
}

pub(crate) struct Mailbox {
    tx: mpsc::UnboundedSender<Envelope>,
}

impl Mailbox {
    pub(crate) fn spawn(
        module_id: ModuleId,
        handler: Arc<dyn ModuleHandler>,
        health: Arc<ModuleHealth>,
        permits: Arc<Semaphore>,
        journal: Arc<Journal>,
        runtime: &Handle,
    ) -> Self {
        debug!(%module_id, "Mailbox::spawn: called");
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = Worker {
            module_id,
            handler,
            health,
            permits,
            journal,
        };
        runtime.spawn(worker.run(rx));
        Self { tx }
    }

    /// Queue an envelope; fails only if the worker has exited
    pub(crate) fn send(&self, envelope: Envelope) -> bool {
        self.tx.send(envelope).is_ok()
    }
}

struct Worker {
    module_id: ModuleId,
    handler: Arc<dyn ModuleHandler>,
    health: Arc<ModuleHealth>,
    permits: Arc<Semaphore>,
    journal: Arc<Journal>,
}

impl Worker {
    // Runs until the mailbox is dropped and every queued envelope is handled,
    // so detaching a module never cancels work already sent to it.
    async fn run(self, mut rx: mpsc::UnboundedReceiver<Envelope>) {
        debug!(module_id = %self.module_id, "Mailbox worker started");

        while let Some(envelope) = rx.recv().await {
            let Ok(permit) = self.permits.clone().acquire_owned().await else {
                warn!(module_id = %self.module_id, "Dispatch semaphore closed, stopping worker");
                break;
            };
            let outcome = invoke(self.handler.as_ref(), envelope.event.clone()).await;
            drop(permit);

            self.health.record(outcome.is_success());
            if let HandlerOutcome::Failure(message) = &outcome {
                let err = HubError::Handler {
                    module_id: self.module_id.to_string(),
                    message: message.clone(),
                };
                warn!(
                    event_type = %envelope.event.event_type(),
                    correlation_id = %envelope.event.correlation_id(),
                    error = %err,
                    "Handler failure isolated"
                );
                self.journal.record_failure(DeliveryFailure::new(
                    self.module_id.clone(),
                    &envelope.event,
                    message.clone(),
                ));
            }

            if let Some(reply) = envelope.reply
                && reply.send(outcome).is_err()
            {
                warn!(
                    module_id = %self.module_id,
                    correlation_id = %envelope.event.correlation_id(),
                    "Late result discarded, aggregation already closed"
                );
            }
        }

        debug!(module_id = %self.module_id, "Mailbox worker stopped");
    }
}

async fn invoke(handler: &dyn ModuleHandler, event: Arc<Event>) -> HandlerOutcome {
    match AssertUnwindSafe(handler.handle(event)).catch_unwind().await {
        Ok(Ok(value)) => HandlerOutcome::Success(value),
        Ok(Err(err)) => HandlerOutcome::Failure(format!("{:#}", err)),
        Err(panic) => HandlerOutcome::Failure(format!("handler panicked: {}", panic_message(panic.as_ref()))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
