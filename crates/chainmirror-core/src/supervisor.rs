//! Reconnect supervisor: re-runs the backfill on every (re)connect before
//! re-arming the live tail.
//!
//! ```text
//! Disconnected ──connect──▶ Reconciling ──▶ Listening
//!                               ▲               │
//!                               └──reconnect────┘
//! ```

use std::fmt;

use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::context::SyncContext;
use crate::error::MirrorError;
use crate::listener::{ListenerHandle, LiveTailListener};
use crate::reconciler::BackfillReconciler;

/// Which half of the pipeline is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Disconnected,
    Reconciling,
    Listening,
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Reconciling => "reconciling",
            Self::Listening => "listening",
        };
        f.write_str(s)
    }
}

pub struct ReconnectSupervisor {
    ctx: SyncContext,
    reconciler: BackfillReconciler,
    listener: LiveTailListener,
    state: watch::Sender<SupervisorState>,
}

impl ReconnectSupervisor {
    pub fn new(ctx: SyncContext) -> Self {
        let (state, _) = watch::channel(SupervisorState::Disconnected);
        Self {
            reconciler: BackfillReconciler::new(ctx.clone()),
            listener: LiveTailListener::new(ctx.clone()),
            ctx,
            state,
        }
    }

    /// Replace the reconciler (e.g. to change the window size).
    pub fn with_reconciler(mut self, reconciler: BackfillReconciler) -> Self {
        self.reconciler = reconciler;
        self
    }

    /// Observe state transitions.
    pub fn state(&self) -> watch::Receiver<SupervisorState> {
        self.state.subscribe()
    }

    /// Run until a fatal error or until the ledger client goes away.
    ///
    /// Non-fatal pass failures are logged; the listener is armed anyway and the
    /// next reconnect retries the pass.
    pub async fn run(&self) -> Result<(), MirrorError> {
        let mut reconnects = self.ctx.ledger.reconnects();
        let whitelist = self.ctx.config.whitelist();

        // Epoch 0 means the transport has not connected yet.
        while *reconnects.borrow_and_update() == 0 {
            if reconnects.changed().await.is_err() {
                return Err(closed());
            }
        }

        loop {
            self.transition(SupervisorState::Reconciling);
            match self.reconciler.run_pass().await {
                Ok(report) => info!(
                    chain_head = report.chain_head,
                    inserted = report.inserted,
                    "backfill pass complete"
                ),
                Err(e) if e.is_fatal() => {
                    error!(error = %e, "fatal reconcile error, stopping supervisor");
                    self.transition(SupervisorState::Disconnected);
                    return Err(e);
                }
                Err(e) => warn!(error = %e, "backfill pass failed, will retry on next reconnect"),
            }

            let handle: Option<ListenerHandle> = match self.listener.listen(&whitelist).await {
                Ok(handle) => Some(handle),
                Err(e) => {
                    warn!(error = %e, "could not arm live listener");
                    None
                }
            };
            self.transition(SupervisorState::Listening);

            let changed = reconnects.changed().await;
            drop(handle);
            if changed.is_err() {
                self.transition(SupervisorState::Disconnected);
                return Err(closed());
            }
            let epoch = *reconnects.borrow_and_update();
            info!(epoch, "ledger reconnected, re-running backfill");
        }
    }

    fn transition(&self, next: SupervisorState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            info!(from = %prev, to = %next, "supervisor state");
        }
    }
}

fn closed() -> MirrorError {
    MirrorError::Aborted {
        reason: "ledger client closed its reconnect channel".into(),
    }
}
