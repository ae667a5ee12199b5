//! Storage backends for chainmirror.
//!
//! Every backend implements both [`EventStore`] and [`CursorStore`] from
//! `chainmirror-core`:
//!
//! - `memory`: in-process stores re-exported from `chainmirror-core`
//! - `sqlite`: `sqlx` SQLite backend (feature `sqlite`, default)
//! - `mysql`: `sqlx` MySQL backend (feature `mysql`)
//!
//! [`open`] picks the backend from the database URL scheme.

use std::sync::Arc;

use chainmirror_core::config::{DatabaseConfig, ServiceDatabase};
use chainmirror_core::cursor::CursorStore;
use chainmirror_core::error::MirrorError;
use chainmirror_core::store::EventStore;

pub use chainmirror_core::cursor::MemoryCursorStore;
pub use chainmirror_core::store::MemoryEventStore;

#[cfg(feature = "mysql")]
pub mod mysql;
#[cfg(feature = "sqlite")]
pub mod sqlite;

/// Table names used by a backend. Both are interpolated into SQL, so they
/// must be plain identifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tables {
    pub events: String,
    pub cursors: String,
}

impl Tables {
    pub fn new(events: impl Into<String>, cursors: impl Into<String>) -> Result<Self, MirrorError> {
        let tables = Self {
            events: events.into(),
            cursors: cursors.into(),
        };
        check_identifier(&tables.events)?;
        check_identifier(&tables.cursors)?;
        Ok(tables)
    }

    pub fn from_config(db: &ServiceDatabase) -> Result<Self, MirrorError> {
        Self::new(&db.table_name, &db.cursor_table)
    }
}

impl Default for Tables {
    fn default() -> Self {
        Self {
            events: "events".into(),
            cursors: "service_sync".into(),
        }
    }
}

fn check_identifier(name: &str) -> Result<(), MirrorError> {
    if !name.is_empty() && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_') {
        Ok(())
    } else {
        Err(MirrorError::Config(format!("invalid table name \"{name}\"")))
    }
}

/// The two store handles a sync context needs.
#[derive(Clone)]
pub struct Stores {
    pub events: Arc<dyn EventStore>,
    pub cursors: Arc<dyn CursorStore>,
}

impl Stores {
    fn shared<S: EventStore + CursorStore + 'static>(store: S) -> Self {
        let store = Arc::new(store);
        Self {
            events: store.clone(),
            cursors: store,
        }
    }

    /// Fresh in-memory stores.
    pub fn memory() -> Self {
        Self {
            events: Arc::new(MemoryEventStore::new()),
            cursors: Arc::new(MemoryCursorStore::new()),
        }
    }
}

/// Open the backend named by the URL scheme of `db.url`.
///
/// `sqlite:` and `mysql:` URLs are supported when the matching feature is
/// enabled; `memory:` gives throwaway in-process stores.
pub async fn open(db: &DatabaseConfig, tables: Tables) -> Result<Stores, MirrorError> {
    let scheme = db.url.split(':').next().unwrap_or_default();
    match scheme {
        "memory" => Ok(Stores::memory()),
        #[cfg(feature = "sqlite")]
        "sqlite" => Ok(Stores::shared(sqlite::SqliteStorage::open(&db.url, tables).await?)),
        #[cfg(feature = "mysql")]
        "mysql" => Ok(Stores::shared(
            mysql::MySqlStorage::connect(&db.url, db.max_connections, tables).await?,
        )),
        other => Err(MirrorError::Config(format!(
            "unsupported database scheme \"{other}\" (enabled: {})",
            enabled_schemes().join(", ")
        ))),
    }
}

fn enabled_schemes() -> Vec<&'static str> {
    let mut schemes = vec!["memory"];
    if cfg!(feature = "sqlite") {
        schemes.push("sqlite");
    }
    if cfg!(feature = "mysql") {
        schemes.push("mysql");
    }
    schemes
}
