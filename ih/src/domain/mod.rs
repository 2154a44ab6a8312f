//! Core domain types: events, modules and handlers

mod event;
mod handler;
mod module;

pub use event::{Event, EventType};
pub use handler::{FnHandler, ModuleHandler, handler_fn};
pub use module::{Capability, ModuleHealth, ModuleId, ModuleInfo, ModuleType, Registration};
