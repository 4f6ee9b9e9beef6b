use std::sync::Arc;
use tokio::sync::watch;

/// Cloneable, one-way abort flag that blocking waits can race against.
///
/// Once triggered it stays triggered.
#[derive(Debug, Clone)]
pub struct Interrupt {
    sender: Arc<watch::Sender<bool>>,
}

impl Default for Interrupt {
    fn default() -> Self {
        Interrupt::new()
    }
}

impl Interrupt {
    pub fn new() -> Interrupt {
        let (sender, _) = watch::channel(false);
        Interrupt {
            sender: Arc::new(sender),
        }
    }

    pub fn trigger(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.sender.borrow()
    }

    /// Resolves once [`Interrupt::trigger`] has been called on any clone
    pub async fn triggered(&self) {
        let mut receiver = self.sender.subscribe();
        // the sender lives as long as self, so this only fails after trigger
        let _ = receiver.wait_for(|triggered| *triggered).await;
    }
}
