//! Latest status projection, shared with every session client

use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use crate::session::StatusView;

#[derive(Clone)]
pub struct StatusBoard {
    current: Arc<RwLock<StatusView>>,
    updates: broadcast::Sender<StatusView>,
}

impl StatusBoard {
    pub fn new() -> Self {
        let (updates, _) = broadcast::channel(32);
        Self {
            current: Arc::new(RwLock::new(StatusView::ready())),
            updates,
        }
    }

    /// Replace the current status and push it to subscribers
    pub async fn publish(&self, view: StatusView) {
        debug!(state = %view.state, text = %view.text, "status updated");
        *self.current.write().await = view.clone();
        let _ = self.updates.send(view);
    }

    pub async fn current(&self) -> StatusView {
        self.current.read().await.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusView> {
        self.updates.subscribe()
    }
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new()
    }
}
