use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;
use tracing::info;

/// Broadcast cancellation signal shared by the active loop, the periodic
/// reporter and the signal handler in main.
///
/// The flag makes `trigger` idempotent and lets a waiter that subscribes
/// after the trigger observe it immediately, which a bare `Notify` does not
/// guarantee with multiple waiters.
#[derive(Debug, Default)]
pub struct Shutdown {
    triggered: AtomicBool,
    notify: Notify,
}

impl Shutdown {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn trigger(&self) {
        if !self.triggered.swap(true, Ordering::SeqCst) {
            info!("Shutdown triggered");
            self.notify.notify_waiters();
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Resolves once the shutdown has been triggered. Safe to call from any
    /// number of tasks, before or after the trigger.
    pub async fn wait(&self) {
        while !self.is_triggered() {
            let notified = self.notify.notified();
            if self.is_triggered() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_wait_after_trigger_returns_immediately() {
        let shutdown = Shutdown::new();
        shutdown.trigger();
        tokio::time::timeout(Duration::from_millis(100), shutdown.wait())
            .await
            .expect("wait should not block after trigger");
    }

    #[tokio::test]
    async fn test_trigger_wakes_multiple_waiters() {
        let shutdown = Shutdown::new();
        let a = tokio::spawn({
            let s = shutdown.clone();
            async move { s.wait().await }
        });
        let b = tokio::spawn({
            let s = shutdown.clone();
            async move { s.wait().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown.trigger();
        tokio::time::timeout(Duration::from_millis(200), async {
            a.await.unwrap();
            b.await.unwrap();
        })
        .await
        .expect("both waiters should wake");
    }

    #[tokio::test]
    async fn test_trigger_is_idempotent() {
        let shutdown = Shutdown::new();
        shutdown.trigger();
        shutdown.trigger();
        assert!(shutdown.is_triggered());
    }
}
