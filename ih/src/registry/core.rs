//! ModuleRegistry implementation

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::bus::EventBus;
use crate::domain::{Capability, Event, EventType, ModuleHandler, ModuleHealth, ModuleId, ModuleInfo, Registration};
use crate::error::{HubError, HubResult};

/// Source ID used for events the registry emits on its own behalf
pub const REGISTRY_SOURCE_ID: &str = "registry";

/// Registry statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryStats {
    pub total_modules: usize,
    pub healthy_modules: usize,
    pub by_capability: BTreeMap<String, usize>,
    pub by_module_type: BTreeMap<String, usize>,
}

struct RegisteredModule {
    seq: u64,
    registration: Registration,
    health: Arc<ModuleHealth>,
    registered_at: DateTime<Utc>,
}

impl RegisteredModule {
    fn info(&self, id: &ModuleId, subscriptions: BTreeSet<EventType>) -> ModuleInfo {
        ModuleInfo {
            id: id.clone(),
            name: self.registration.name.clone(),
            module_type: self.registration.module_type,
            version: self.registration.version.clone(),
            description: self.registration.description.clone(),
            capabilities: self.registration.capabilities.clone(),
            subscriptions,
            healthy: self.health.is_healthy(),
            handled: self.health.handled(),
            failures: self.health.failures(),
            registered_at: self.registered_at,
        }
    }
}

/// Table of registered modules
///
/// The table has its own lock, separate from the bus index, and every read
/// returns an owned snapshot taken under that lock.
pub struct ModuleRegistry {
    bus: Arc<EventBus>,
    modules: RwLock<HashMap<ModuleId, RegisteredModule>>,
    next_seq: AtomicU64,
}

impl ModuleRegistry {
    pub fn new(bus: Arc<EventBus>) -> Self {
        debug!("ModuleRegistry::new: called");
        Self {
            bus,
            modules: RwLock::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<ModuleId, RegisteredModule>> {
        self.modules.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<ModuleId, RegisteredModule>> {
        self.modules.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a module and subscribe it to its declared event types
    ///
    /// Publishes MODULE_REGISTERED without waiting for anyone to consume it.
    pub fn register(&self, registration: Registration, handler: Arc<dyn ModuleHandler>) -> HubResult<ModuleId> {
        debug!(name = %registration.name, "ModuleRegistry::register: called");
        registration.validate()?;

        let id = ModuleId::generate();
        let health = Arc::new(ModuleHealth::default());
        self.bus.attach(id.clone(), handler, health.clone())?;
        for event_type in &registration.subscriptions {
            if let Err(e) = self.bus.subscribe(event_type.clone(), &id) {
                self.bus.detach(&id);
                return Err(e);
            }
        }

        let payload = json!({
            "module_id": id,
            "module_name": registration.name,
            "module_type": registration.module_type,
            "capabilities": registration.capabilities,
        });
        info!(%id, name = %registration.name, "Module registered");

        self.write().insert(
            id.clone(),
            RegisteredModule {
                seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
                registration,
                health,
                registered_at: Utc::now(),
            },
        );

        if let Err(e) = self
            .bus
            .publish(Event::new(EventType::ModuleRegistered, REGISTRY_SOURCE_ID, payload))
        {
            warn!(%id, error = %e, "Failed to announce module registration");
        }
        Ok(id)
    }

    /// Remove a module and all of its subscriptions
    ///
    /// The returned snapshot lists the subscriptions held at removal.
    ///
    /// Work already queued for the module still runs; its results are
    /// accepted or timed out like any other.
    pub fn deregister(&self, id: &ModuleId) -> HubResult<ModuleInfo> {
        debug!(%id, "ModuleRegistry::deregister: called");
        let removed = self.write().remove(id).ok_or_else(|| HubError::NotFound {
            kind: "Module",
            id: id.to_string(),
        })?;
        let subscriptions = self.bus.subscriptions_of(id);
        self.bus.detach(id);
        info!(%id, name = %removed.registration.name, "Module deregistered");
        Ok(removed.info(id, subscriptions))
    }

    pub fn get(&self, id: &ModuleId) -> HubResult<ModuleInfo> {
        self.read()
            .get(id)
            .map(|m| m.info(id, self.bus.subscriptions_of(id)))
            .ok_or_else(|| HubError::NotFound {
                kind: "Module",
                id: id.to_string(),
            })
    }

    pub fn contains(&self, id: &ModuleId) -> bool {
        self.read().contains_key(id)
    }

    /// Whether a registered module declares `capability`
    ///
    /// Unknown modules never match.
    pub fn has_capability(&self, id: &ModuleId, capability: Capability) -> bool {
        self.read()
            .get(id)
            .is_some_and(|m| m.registration.capabilities.contains(&capability))
    }

    /// Display name of a registered module
    pub fn name_of(&self, id: &ModuleId) -> Option<String> {
        self.read().get(id).map(|m| m.registration.name.clone())
    }

    /// Snapshot of every module in registration order
    ///
    /// Subscriptions reflect the live bus index, including changes made
    /// directly through the bus after registration.
    pub fn list(&self) -> Vec<ModuleInfo> {
        let modules = self.read();
        let mut entries: Vec<(&ModuleId, &RegisteredModule)> = modules.iter().collect();
        entries.sort_by_key(|(_, m)| m.seq);
        entries
            .into_iter()
            .map(|(id, m)| m.info(id, self.bus.subscriptions_of(id)))
            .collect()
    }

    pub fn stats(&self) -> RegistryStats {
        let modules = self.read();
        let mut stats = RegistryStats {
            total_modules: modules.len(),
            ..Default::default()
        };
        for module in modules.values() {
            if module.health.is_healthy() {
                stats.healthy_modules += 1;
            }
            for capability in &module.registration.capabilities {
                *stats.by_capability.entry(capability.to_string()).or_insert(0) += 1;
            }
            *stats
                .by_module_type
                .entry(module.registration.module_type.to_string())
                .or_insert(0) += 1;
        }
        stats
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}
