//! SharedCtx - cross-module shared context
//!
//! A key/value store that any registered intelligence module may write and
//! every module (and the orchestrator) may read. There is no ownership: the
//! last writer of a key wins, and every write stamps the entry with its time.
//!
//! # Guarantees
//!
//! - Each single-key operation is atomic.
//! - No transactional guarantees span multiple keys.
//! - `stats()` is a consistent snapshot of entry count and last write time.
//!
//! # Example
//!
//! ```
//! use sharedctx::ContextStore;
//! use serde_json::json;
//!
//! let store = ContextStore::new();
//! store.set("k", json!(1)).unwrap();
//! store.set("k", json!(2)).unwrap();
//! assert_eq!(store.get("k").unwrap(), json!(2));
//! assert!(store.get("missing").is_err());
//! ```

mod error;
mod store;

pub use error::ContextError;
pub use store::{ContextEntry, ContextStats, ContextStore};

/// Longest key accepted by the store
pub const MAX_KEY_LEN: usize = 256;
