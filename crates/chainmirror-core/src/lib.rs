//! chainmirror-core keeps a relational mirror of one contract's events in
//! sync with the ledger, across restarts and connection drops.
//!
//! # Architecture
//!
//! ```text
//! ReconnectSupervisor
//!     ├── BackfillReconciler  (windowed scan, resumable cursor)
//!     ├── LiveTailListener    (one handler loop per event kind)
//!     └── pipeline            (Normalizer → dedup check → insert)
//!             ├── EventStore  (memory / SQLite / MySQL)
//!             └── CursorStore (memory / SQLite / MySQL)
//! ```

pub mod config;
pub mod context;
pub mod cursor;
pub mod error;
pub mod ledger;
pub mod listener;
pub mod normalize;
pub mod pipeline;
pub mod reconciler;
pub mod store;
pub mod supervisor;
pub mod types;
pub mod window;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use config::{GlobalConfig, LogConfig, ServiceConfig, Settings, Whitelist};
pub use context::SyncContext;
pub use cursor::{CursorStore, MemoryCursorStore, SyncCursor};
pub use error::MirrorError;
pub use ledger::{EventStream, LedgerClient};
pub use listener::{ListenerHandle, LiveTailListener};
pub use normalize::{NormalizedArgument, NormalizedValue, Normalizer};
pub use reconciler::{BackfillReconciler, ReconcileReport};
pub use store::{insert_if_absent, insert_if_absent_with, EventStore, InsertOutcome, MemoryEventStore};
pub use supervisor::{ReconnectSupervisor, SupervisorState};
pub use types::{DedupKey, EventRecord, RawArg, RawArgValue, RawEvent, TxReceipt};
pub use window::{WindowIter, WindowRange, MARGIN_BLOCKS, WINDOW_SIZE};
