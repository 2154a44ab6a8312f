//! EventBus implementation

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::runtime::Handle;
use tokio::sync::{Semaphore, broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use super::config::BusConfig;
use super::journal::{BusStats, DeliveryFailure, Journal};
use super::mailbox::{Envelope, HandlerOutcome, Mailbox};
use crate::domain::{Event, EventType, ModuleHandler, ModuleHealth, ModuleId};
use crate::error::{HubError, HubResult};

/// An event handed to the dispatcher together with the subscribers it had
/// when it was published
#[derive(Debug, Clone)]
pub struct Published {
    pub event: Arc<Event>,
    pub subscribers: Vec<ModuleId>,
}

/// Publish/subscribe bus with per-module mailboxes
///
/// `publish` never waits on handlers: it records the event, snapshots the
/// subscriber set, and hands both to the dispatcher through an unbounded
/// intake queue. The dispatcher (the orchestrator) decides who receives the
/// event and calls `deliver`.
///
/// The subscription index, the mailbox table and the journal are locked
/// independently; no lock is held across an await.
pub struct EventBus {
    index: RwLock<HashMap<EventType, BTreeSet<ModuleId>>>,
    mailboxes: RwLock<HashMap<ModuleId, Mailbox>>,
    intake_tx: mpsc::UnboundedSender<Published>,
    intake_rx: Mutex<Option<mpsc::UnboundedReceiver<Published>>>,
    watch_tx: broadcast::Sender<Arc<Event>>,
    journal: Arc<Journal>,
    permits: Arc<Semaphore>,
}

impl EventBus {
    /// Create a bus allowing at most `dispatch_limit` handlers to run at once
    pub fn new(config: &BusConfig, dispatch_limit: usize) -> Self {
        debug!(?config, dispatch_limit, "EventBus::new: called");
        let (intake_tx, intake_rx) = mpsc::unbounded_channel();
        let (watch_tx, _) = broadcast::channel(config.watch_capacity.max(1));
        Self {
            index: RwLock::new(HashMap::new()),
            mailboxes: RwLock::new(HashMap::new()),
            intake_tx,
            intake_rx: Mutex::new(Some(intake_rx)),
            watch_tx,
            journal: Arc::new(Journal::new(config.history_limit, config.error_feed_limit)),
            permits: Arc::new(Semaphore::new(dispatch_limit.max(1))),
        }
    }

    fn read_index(&self) -> RwLockReadGuard<'_, HashMap<EventType, BTreeSet<ModuleId>>> {
        self.index.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_index(&self) -> RwLockWriteGuard<'_, HashMap<EventType, BTreeSet<ModuleId>>> {
        self.index.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_mailboxes(&self) -> RwLockReadGuard<'_, HashMap<ModuleId, Mailbox>> {
        self.mailboxes.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_mailboxes(&self) -> RwLockWriteGuard<'_, HashMap<ModuleId, Mailbox>> {
        self.mailboxes.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Subscribe an attached module to an event type
    ///
    /// Returns `false` if the module was already subscribed.
    pub fn subscribe(&self, event_type: EventType, module_id: &ModuleId) -> HubResult<bool> {
        debug!(%event_type, %module_id, "EventBus::subscribe: called");
        event_type.validate()?;
        if !self.read_mailboxes().contains_key(module_id) {
            return Err(HubError::NotFound {
                kind: "Module",
                id: module_id.to_string(),
            });
        }
        Ok(self
            .write_index()
            .entry(event_type)
            .or_default()
            .insert(module_id.clone()))
    }

    /// Remove a subscription; returns `false` if there was none
    pub fn unsubscribe(&self, event_type: &EventType, module_id: &ModuleId) -> bool {
        debug!(%event_type, %module_id, "EventBus::unsubscribe: called");
        let mut index = self.write_index();
        let Some(set) = index.get_mut(event_type) else {
            return false;
        };
        let removed = set.remove(module_id);
        if set.is_empty() {
            index.remove(event_type);
        }
        removed
    }

    /// Modules currently subscribed to `event_type`, in ID order
    pub fn subscribers(&self, event_type: &EventType) -> Vec<ModuleId> {
        self.read_index()
            .get(event_type)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Event types a module is currently subscribed to
    pub fn subscriptions_of(&self, module_id: &ModuleId) -> BTreeSet<EventType> {
        self.read_index()
            .iter()
            .filter(|(_, set)| set.contains(module_id))
            .map(|(event_type, _)| event_type.clone())
            .collect()
    }

    /// Publish an event without waiting for any subscriber
    pub fn publish(&self, event: Event) -> HubResult<Arc<Event>> {
        debug!(
            event_type = %event.event_type(),
            correlation_id = %event.correlation_id(),
            source = %event.source_module_id(),
            "EventBus::publish: called"
        );
        event.event_type().validate()?;
        let event = Arc::new(event);
        let subscribers = self.subscribers(event.event_type());

        self.intake_tx
            .send(Published {
                event: event.clone(),
                subscribers,
            })
            .map_err(|_| HubError::ChannelClosed("Bus intake"))?;
        self.journal.record_event(event.clone());
        // No watchers is fine
        let _ = self.watch_tx.send(event.clone());
        Ok(event)
    }

    /// Receive a copy of every event published after this call
    pub fn watch(&self) -> broadcast::Receiver<Arc<Event>> {
        debug!("EventBus::watch: new watcher");
        self.watch_tx.subscribe()
    }

    /// Last `limit` published events, oldest first
    pub fn recent_events(&self, limit: usize) -> Vec<Arc<Event>> {
        self.journal.recent_events(limit)
    }

    /// Last `limit` isolated handler failures, oldest first
    pub fn recent_errors(&self, limit: usize) -> Vec<DeliveryFailure> {
        self.journal.recent_errors(limit)
    }

    pub fn stats(&self) -> BusStats {
        let active_subscribers: BTreeMap<String, usize> = self
            .read_index()
            .iter()
            .map(|(event_type, set)| (event_type.to_string(), set.len()))
            .collect();
        self.journal.stats(active_subscribers)
    }

    /// Give a module a mailbox and a worker on the current runtime
    pub(crate) fn attach(
        &self,
        module_id: ModuleId,
        handler: Arc<dyn ModuleHandler>,
        health: Arc<ModuleHealth>,
    ) -> HubResult<()> {
        debug!(%module_id, "EventBus::attach: called");
        let runtime = Handle::try_current().map_err(|e| HubError::Runtime(e.to_string()))?;
        let mailbox = Mailbox::spawn(
            module_id.clone(),
            handler,
            health,
            self.permits.clone(),
            self.journal.clone(),
            &runtime,
        );
        self.write_mailboxes().insert(module_id, mailbox);
        Ok(())
    }

    /// Drop a module's mailbox and every subscription it holds
    ///
    /// Envelopes already queued are still handled by the worker.
    pub(crate) fn detach(&self, module_id: &ModuleId) -> bool {
        debug!(%module_id, "EventBus::detach: called");
        {
            let mut index = self.write_index();
            for set in index.values_mut() {
                set.remove(module_id);
            }
            index.retain(|_, set| !set.is_empty());
        }
        self.write_mailboxes().remove(module_id).is_some()
    }

    /// Queue an event for one module
    ///
    /// Returns `false` if the module has no mailbox; in that case `reply` is
    /// dropped without a value.
    pub(crate) fn deliver(
        &self,
        module_id: &ModuleId,
        event: Arc<Event>,
        reply: Option<oneshot::Sender<HandlerOutcome>>,
    ) -> bool {
        let mailboxes = self.read_mailboxes();
        let Some(mailbox) = mailboxes.get(module_id) else {
            warn!(%module_id, correlation_id = %event.correlation_id(), "Delivery to detached module skipped");
            return false;
        };
        mailbox.send(Envelope { event, reply })
    }

    /// Take the intake queue; only the first caller gets it
    pub(crate) fn take_intake(&self) -> Option<mpsc::UnboundedReceiver<Published>> {
        let taken = self
            .intake_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if taken.is_some() {
            info!("EventBus intake claimed by dispatcher");
        }
        taken
    }
}
