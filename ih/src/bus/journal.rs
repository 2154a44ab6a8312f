//! Bounded history of published events and handler failures

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Event, EventType, ModuleId};

/// A handler failure caught by the bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryFailure {
    pub module_id: ModuleId,
    pub event_type: EventType,
    pub correlation_id: String,
    pub error: String,
    pub at: DateTime<Utc>,
}

impl DeliveryFailure {
    pub fn new(module_id: ModuleId, event: &Event, error: impl Into<String>) -> Self {
        Self {
            module_id,
            event_type: event.event_type().clone(),
            correlation_id: event.correlation_id().to_string(),
            error: error.into(),
            at: Utc::now(),
        }
    }
}

/// Bus statistics over the retained history
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BusStats {
    /// Events currently retained in the history window
    pub total_events: usize,
    /// Events published since the bus was created
    pub total_published: u64,
    /// Retained events per type
    pub events_by_type: BTreeMap<String, usize>,
    /// Subscriber count per event type
    pub active_subscribers: BTreeMap<String, usize>,
    /// Handler failures recorded since the bus was created
    pub total_failures: u64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
pub(crate) struct Journal {
    history: Mutex<VecDeque<Arc<Event>>>,
    errors: Mutex<VecDeque<DeliveryFailure>>,
    history_limit: usize,
    error_limit: usize,
    published: AtomicU64,
    failures: AtomicU64,
}

impl Journal {
    pub(crate) fn new(history_limit: usize, error_limit: usize) -> Self {
        Self {
            history: Mutex::new(VecDeque::with_capacity(history_limit.min(1024))),
            errors: Mutex::new(VecDeque::with_capacity(error_limit.min(1024))),
            history_limit,
            error_limit,
            published: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    pub(crate) fn record_event(&self, event: Arc<Event>) {
        self.published.fetch_add(1, Ordering::Relaxed);
        let mut history = lock(&self.history);
        history.push_back(event);
        while history.len() > self.history_limit {
            history.pop_front();
        }
    }

    pub(crate) fn record_failure(&self, failure: DeliveryFailure) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        let mut errors = lock(&self.errors);
        errors.push_back(failure);
        while errors.len() > self.error_limit {
            errors.pop_front();
        }
    }

    /// Last `limit` events, oldest first
    pub(crate) fn recent_events(&self, limit: usize) -> Vec<Arc<Event>> {
        let history = lock(&self.history);
        let skip = history.len().saturating_sub(limit);
        history.iter().skip(skip).cloned().collect()
    }

    /// Last `limit` failures, oldest first
    pub(crate) fn recent_errors(&self, limit: usize) -> Vec<DeliveryFailure> {
        let errors = lock(&self.errors);
        let skip = errors.len().saturating_sub(limit);
        errors.iter().skip(skip).cloned().collect()
    }

    pub(crate) fn stats(&self, active_subscribers: BTreeMap<String, usize>) -> BusStats {
        let history = lock(&self.history);
        let mut events_by_type = BTreeMap::new();
        for event in history.iter() {
            *events_by_type
                .entry(event.event_type().to_string())
                .or_insert(0) += 1;
        }
        BusStats {
            total_events: history.len(),
            total_published: self.published.load(Ordering::Relaxed),
            events_by_type,
            active_subscribers,
            total_failures: self.failures.load(Ordering::Relaxed),
        }
    }
}
