//! Event bus: subscription index, per-module mailboxes and the error feed

mod config;
mod core;
mod journal;
mod mailbox;

pub use config::BusConfig;
pub use core::{EventBus, Published};
pub use journal::{BusStats, DeliveryFailure};
pub use mailbox::HandlerOutcome;
