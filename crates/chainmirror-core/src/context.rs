use std::sync::Arc;

use crate::config::ServiceConfig;
use crate::cursor::CursorStore;
use crate::ledger::LedgerClient;
use crate::normalize::Normalizer;
use crate::store::EventStore;

/// Handles shared by the reconciler, listener, and supervisor.
///
/// Built once at startup; cloning only bumps reference counts.
#[derive(Clone)]
pub struct SyncContext {
    pub config: Arc<ServiceConfig>,
    pub ledger: Arc<dyn LedgerClient>,
    pub events: Arc<dyn EventStore>,
    pub cursors: Arc<dyn CursorStore>,
    normalizer: Arc<Normalizer>,
}

impl SyncContext {
    pub fn new(
        config: ServiceConfig,
        ledger: Arc<dyn LedgerClient>,
        events: Arc<dyn EventStore>,
        cursors: Arc<dyn CursorStore>,
    ) -> Self {
        let normalizer = Arc::new(config.normalizer());
        Self {
            config: Arc::new(config),
            ledger,
            events,
            cursors,
            normalizer,
        }
    }

    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    pub fn service_id(&self) -> String {
        self.config.service_id()
    }
}
