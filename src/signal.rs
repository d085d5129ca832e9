use tokio::sync::broadcast;
use tracing::trace;

use crate::models::{Id, Thread};

/// Hint for other open views that the thread list changed and should be re-read.
#[derive(Debug, Clone, PartialEq)]
pub enum ForumEvent {
    ThreadCreated { thread: Thread },
    ThreadRestored { thread_id: Id },
    ThreadRemoved { thread_id: Id },
}

/// Process-wide broadcast of [`ForumEvent`]s. Sending with no listeners is fine.
#[derive(Clone)]
pub struct ChangeSignal {
    tx: broadcast::Sender<ForumEvent>,
}

impl ChangeSignal {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ForumEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: ForumEvent) {
        match self.tx.send(event) {
            Ok(n) => trace!(receivers = n, "forum event sent"),
            Err(_) => trace!("forum event dropped, no listeners"),
        }
    }
}

impl Default for ChangeSignal {
    fn default() -> Self { Self::new(64) }
}
