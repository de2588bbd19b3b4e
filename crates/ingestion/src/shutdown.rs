//! Cooperative shutdown signal shared by the consumer loop and in-flight books

use std::sync::Arc;
use tokio::sync::watch;

/// Cloneable cancellation flag backed by a `watch` channel
#[derive(Clone, Debug)]
pub struct ShutdownSignal {
    sender: Arc<watch::Sender<bool>>,
    receiver: watch::Receiver<bool>,
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
            receiver,
        }
    }

    /// Request shutdown; every clone observes it
    pub fn trigger(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once shutdown has been requested
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        // The sender lives in `self`, so `wait_for` can only fail if it is dropped
        let _ = receiver.wait_for(|triggered| *triggered).await;
    }
}
