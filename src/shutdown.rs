use tokio::sync::watch;

/// Fires the shutdown signal for every [`Shutdown`] handle cloned from the same channel.
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

/// Cooperative cancellation handle for background tasks.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

pub fn channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, Shutdown { rx })
}

impl Shutdown {
    /// A handle that is never triggered.
    pub fn never() -> Self {
        channel().1
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown has been triggered. Pends forever if the trigger was dropped
    /// without firing.
    pub async fn wait(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn trigger_reaches_every_clone() {
        let (trigger, shutdown) = channel();
        let mut a = shutdown.clone();
        let mut b = shutdown;

        trigger.trigger();

        tokio::time::timeout(Duration::from_secs(1), a.wait()).await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), b.wait()).await.unwrap();
        assert!(a.is_triggered());
    }

    #[tokio::test]
    async fn never_handle_keeps_pending() {
        let mut shutdown = Shutdown::never();
        assert!(!shutdown.is_triggered());
        let waited = tokio::time::timeout(Duration::from_millis(20), shutdown.wait()).await;
        assert!(waited.is_err());
    }
}
