//! Registry of attached trigger listeners
//!
//! Every listener owns a bounded queue. Publishing never waits: a listener
//! whose queue is full or closed is pruned on the spot and never retried.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

/// Identifies one attached listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl std::fmt::Display for ListenerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// Outcome of one publish
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub pruned: usize,
}

pub struct ListenerRegistry {
    next_id: AtomicU64,
    listeners: Mutex<HashMap<ListenerId, mpsc::Sender<String>>>,
    queue_depth: usize,
}

impl ListenerRegistry {
    /// `queue_depth` frames may wait per listener before it is pruned
    pub fn new(queue_depth: usize) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            listeners: Mutex::new(HashMap::new()),
            queue_depth: queue_depth.max(1),
        }
    }

    /// Attach a new listener and return its id and frame queue
    pub fn attach(&self) -> (ListenerId, mpsc::Receiver<String>) {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.queue_depth);

        let mut listeners = self.listeners.lock();
        listeners.insert(id, tx);
        debug!(%id, listeners = listeners.len(), "listener attached");

        (id, rx)
    }

    /// Detach a listener. Returns false if it was already gone.
    pub fn detach(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let removed = listeners.remove(&id).is_some();
        if removed {
            debug!(%id, listeners = listeners.len(), "listener detached");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Offer `frame` to every listener without waiting on any of them
    pub fn publish(&self, frame: &str) -> PublishReport {
        let mut report = PublishReport::default();

        self.listeners.lock().retain(|id, tx| match tx.try_send(frame.to_string()) {
            Ok(()) => {
                report.delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                warn!(%id, "listener not keeping up, pruning");
                report.pruned += 1;
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(%id, "listener gone, pruning");
                report.pruned += 1;
                false
            }
        });

        report
    }
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        Self::new(16)
    }
}
