//! Cross-instance sync: re-submits changes another instance announced.
//!
//! Runs beside the queue, not inside it. Each notice becomes an ordinary
//! low-priority submission, so repeated notices for the same change collapse
//! in the deduplicator like any other request.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::app::orchestrator::Orchestrator;
use crate::domain::{Action, Payload, Priority, SubmitOptions};

/// Change announced by another instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteChange {
    pub action: Action,
    pub payload: Payload,
    /// Instance that made the change. Own notices are ignored.
    pub origin: String,
}

pub struct RemoteChangeObserver {
    orchestrator: Orchestrator,
    instance: String,
}

impl RemoteChangeObserver {
    pub fn new(orchestrator: Orchestrator, instance: impl Into<String>) -> Self {
        Self {
            orchestrator,
            instance: instance.into(),
        }
    }

    /// Consumes notices until the sender side closes.
    pub fn spawn(self, mut notices: mpsc::Receiver<RemoteChange>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(change) = notices.recv().await {
                self.on_change(change);
            }
            debug!(instance = %self.instance, "remote change stream closed");
        })
    }

    fn on_change(&self, change: RemoteChange) {
        if change.origin == self.instance {
            return;
        }
        let action = change.action.clone();
        let handle = self.orchestrator.submit(
            change.action,
            change.payload,
            SubmitOptions::default().priority(Priority::Low),
        );
        debug!(%action, origin = %change.origin, request_id = %handle.request_id(), "remote change re-submitted");
        tokio::spawn(async move {
            if let Err(e) = handle.await {
                warn!(%action, error = %e, "remote change not applied");
            }
        });
    }
}
