use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// Per-order async locks serializing lifecycle writes inside one process.
/// Entries are dropped again once nobody holds or waits on them.
#[derive(Clone, Default)]
pub struct OrderLocks {
    locks: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
}

impl OrderLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, order_id: Uuid) -> OrderLockGuard {
        let mutex = self.locks.entry(order_id).or_default().clone();
        let guard = mutex.lock_owned().await;
        OrderLockGuard {
            order_id,
            locks: Arc::clone(&self.locks),
            guard: Some(guard),
        }
    }

    /// Number of orders with a live lock entry
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

pub struct OrderLockGuard {
    order_id: Uuid,
    locks: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl OrderLockGuard {
    pub fn order_id(&self) -> Uuid {
        self.order_id
    }
}

impl Drop for OrderLockGuard {
    fn drop(&mut self) {
        self.guard.take();
        self.locks
            .remove_if(&self.order_id, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}
