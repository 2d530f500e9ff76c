//! Push channel consumer
//!
//! Drains raw messages from both push transports, normalizes each one and
//! hands it to the reconciler. A bad message is logged and skipped; the loop
//! only ends when every sender is gone.

use crate::error::Result;
use crate::sync::normalize::normalize;
use crate::sync::reconciler::{Reconciled, Reconciler};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Counters reported when the listener stops
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListenerStats {
    pub received: u64,
    pub applied: u64,
    pub ignored: u64,
    pub malformed: u64,
}

pub struct PushListener {
    reconciler: Arc<Reconciler>,
}

impl PushListener {
    pub fn new(reconciler: Arc<Reconciler>) -> Self {
        Self { reconciler }
    }

    /// Normalize and reconcile one raw message
    pub fn handle(&self, raw: &Value) -> Result<Reconciled> {
        match normalize(raw)? {
            Some(event) => self.reconciler.apply(&event),
            None => Ok(Reconciled::Ignored),
        }
    }

    /// Run until the channel closes
    pub async fn run(self, mut messages: mpsc::Receiver<Value>) -> ListenerStats {
        let mut stats = ListenerStats::default();
        info!("Push listener started");

        while let Some(raw) = messages.recv().await {
            stats.received += 1;
            match self.handle(&raw) {
                Ok(Reconciled::Ignored) => stats.ignored += 1,
                Ok(outcome) => {
                    debug!(outcome = ?outcome, "Push message applied");
                    stats.applied += 1;
                }
                Err(e) => {
                    warn!(error = %e, "Discarding push message");
                    stats.malformed += 1;
                }
            }
        }

        info!(
            received = stats.received,
            applied = stats.applied,
            malformed = stats.malformed,
            "Push listener stopped"
        );
        stats
    }
}
