//! Per-resource-key async mutual exclusion.
//!
//! Submissions and offline replays for the same board serialize on one lock,
//! so batches reach the remote in the order they were accepted locally.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Debug, Clone, Default)]
pub struct KeyedLocks {
    slots: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl KeyedLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`. Released when the guard drops.
    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            // Slots nobody holds or waits on are dropped.
            slots.retain(|_, slot| Arc::strong_count(slot) > 1);
            Arc::clone(slots.entry(key.to_string()).or_default())
        };
        slot.lock_owned().await
    }

    /// Number of keys currently held or awaited.
    #[must_use]
    pub fn active(&self) -> usize {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.values().filter(|slot| Arc::strong_count(slot) > 1).count()
    }
}

#[cfg(test)]
mod tests {
    use super::KeyedLocks;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn same_key_serializes_in_arrival_order() {
        let locks = KeyedLocks::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let first = locks.lock("a_b").await;
        let mut handles = Vec::new();
        for i in 0..3 {
            let locks = locks.clone();
            let log = Arc::clone(&log);
            handles.push(tokio::spawn(async move {
                let _guard = locks.lock("a_b").await;
                log.lock().expect("lock").push(i);
            }));
            // Let the task reach the lock queue before spawning the next one.
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert!(log.lock().expect("lock").is_empty());
        drop(first);

        for handle in handles {
            handle.await.expect("task");
        }
        assert_eq!(*log.lock().expect("lock"), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn different_keys_do_not_block_each_other() {
        let locks = KeyedLocks::new();
        let _a = locks.lock("a_1").await;
        let _b = locks.lock("a_2").await;
        assert_eq!(locks.active(), 2);
    }

    #[tokio::test]
    async fn released_slots_are_reclaimed() {
        let locks = KeyedLocks::new();
        drop(locks.lock("a_1").await);
        let _b = locks.lock("a_2").await;
        assert_eq!(locks.active(), 1);
    }
}
