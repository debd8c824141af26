use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Process-wide exclusion between in-flight handlers and partition
/// reassignment.
///
/// Handlers are readers: the guard is held around each handler + ack pair.
/// The rebalance callback is the writer: it cannot proceed while any
/// handler is mid-flight, so an acknowledgement never crosses a
/// reassignment boundary.
#[derive(Debug, Default)]
pub struct RebalanceBarrier {
    lock: RwLock<()>,
}

impl RebalanceBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Taken by the dispatch loop for the duration of handler + ack.
    pub async fn handler_guard(&self) -> RwLockReadGuard<'_, ()> {
        self.lock.read().await
    }

    /// Taken by the rebalance callback before partitions may be revoked.
    pub async fn rebalance_guard(&self) -> RwLockWriteGuard<'_, ()> {
        self.lock.write().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn rebalance_waits_for_in_flight_handler() {
        let barrier = Arc::new(RebalanceBarrier::new());
        let handler_done = Arc::new(AtomicBool::new(false));

        let guard = barrier.handler_guard().await;

        let rebalance = {
            let barrier = barrier.clone();
            let handler_done = handler_done.clone();
            tokio::spawn(async move {
                let _g = barrier.rebalance_guard().await;
                // Must only get here once the handler guard is released.
                assert!(handler_done.load(Ordering::SeqCst));
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        handler_done.store(true, Ordering::SeqCst);
        drop(guard);

        rebalance.await.unwrap();
    }

    #[tokio::test]
    async fn handlers_do_not_block_each_other() {
        let barrier = RebalanceBarrier::new();
        let g1 = barrier.handler_guard().await;
        let g2 = barrier.handler_guard().await;
        drop(g1);
        drop(g2);
    }
}
