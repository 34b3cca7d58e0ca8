//! Shared service context threaded through the coordinators.
//!
//! Collapses what would otherwise be global singletons into one struct the
//! coordinators borrow: configuration, the event bus and the persistence
//! store.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};

use crate::config::Config;
use crate::diskstate::DiskState;
use crate::types::{NzbId, QueueEvent};

/// Service bundle shared by the queue, history, dupe and rename logic
#[derive(Clone)]
pub struct Services {
    /// Static configuration
    pub config: Arc<Config>,
    /// Aspect bus; events are sent while the queue lock is held
    pub events: broadcast::Sender<QueueEvent>,
    /// Persistence store for queue, history and per-file state
    pub disk_state: Arc<DiskState>,
    /// Hand-off channel into the post-processing pipeline
    pub post_tx: mpsc::UnboundedSender<NzbId>,
    /// Cancellation tokens of running post-processing passes
    pub post_cancel:
        Arc<std::sync::Mutex<std::collections::HashMap<NzbId, tokio_util::sync::CancellationToken>>>,
}

impl Services {
    /// Emit an event, ignoring the absence of subscribers
    pub fn emit(&self, event: QueueEvent) {
        self.events.send(event).ok();
    }

    /// Queue a job for the post-processing pipeline
    pub fn enqueue_post(&self, id: NzbId) {
        self.post_tx.send(id).ok();
    }

    /// Cancel a running post-processing pass. Returns false when the job
    /// is not being post-processed.
    pub fn cancel_post(&self, id: NzbId) -> bool {
        let registry = self.post_cancel.lock().unwrap_or_else(|e| e.into_inner());
        match registry.get(&id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}
