//! Graceful shutdown handling
//!
//! A cloneable flag that background loops and servers wait on. Built on a
//! watch channel so a task that subscribes after the trigger still sees it.

use std::sync::Arc;

use tokio::sync::watch;

/// Shutdown signal shared by every long-running task
#[derive(Clone)]
pub struct ShutdownSignal {
    sender: Arc<watch::Sender<bool>>,
}

impl ShutdownSignal {
    /// Create a new, untriggered signal
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Trigger shutdown
    pub fn shutdown(&self) {
        self.sender.send_replace(true);
    }

    /// True once shutdown was triggered
    pub fn is_shutdown(&self) -> bool {
        *self.sender.borrow()
    }

    /// Resolve once shutdown is triggered
    pub async fn wait(&self) {
        let mut receiver = self.sender.subscribe();
        // The sender lives in self, so the channel cannot close under us
        let _ = receiver.wait_for(|triggered| *triggered).await;
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}
