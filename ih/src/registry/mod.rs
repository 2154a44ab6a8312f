//! Module registry

mod core;

pub use core::{ModuleRegistry, REGISTRY_SOURCE_ID, RegistryStats};
