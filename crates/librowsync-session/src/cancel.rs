//! Cooperative session cancellation

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Shared cancel switch. Sessions check it at every stage boundary before
/// Committing and while waiting on the peer.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    inner: Arc<CancelInner>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once `cancel` has been called
    pub async fn cancelled(&self) {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_cancel_wakes_waiter() {
        let flag = CancelFlag::new();
        let waiter = flag.clone();
        let handle = tokio::spawn(async move { waiter.cancelled().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        flag.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(flag.is_cancelled());
    }

    #[tokio::test]
    async fn test_already_cancelled_returns_immediately() {
        let flag = CancelFlag::new();
        flag.cancel();
        tokio::time::timeout(Duration::from_millis(100), flag.cancelled())
            .await
            .unwrap();
    }
}
