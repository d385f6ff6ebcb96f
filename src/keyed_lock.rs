// Keyed-mutex abstraction (Design Notes §9: replace the source's ad-hoc
// promise map with "a concurrent map of locks with refcounted eviction").
// Used both for per-event-identifier locking in ingress and per-(symbol,
// side) locking in the strategy engine — the same shape, different keys.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex as SyncMutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

pub struct KeyedMutex<K> {
    locks: SyncMutex<HashMap<K, Arc<AsyncMutex<()>>>>,
}

impl<K: Eq + Hash + Clone> KeyedMutex<K> {
    pub fn new() -> Self {
        Self {
            locks: SyncMutex::new(HashMap::new()),
        }
    }

    /// Acquire the lock for `key`, creating its entry on first use. The
    /// returned guard holds a strong ref to the per-key mutex, so the entry
    /// cannot be evicted out from under a held lock; `evict_unused` only
    /// removes entries whose refcount has dropped back to the map's own.
    pub async fn lock(&self, key: K) -> OwnedMutexGuard<()> {
        let mutex = {
            let mut locks = self.locks.lock();
            locks
                .entry(key)
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        mutex.lock_owned().await
    }

    /// Drop map entries with no other outstanding reference. Call
    /// periodically (e.g. from a retention-sweep tick) to bound memory; not
    /// required for correctness since `lock` recreates missing entries.
    pub fn evict_unused(&self) {
        let mut locks = self.locks.lock();
        locks.retain(|_, mutex| Arc::strong_count(mutex) > 1);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }
}

impl<K: Eq + Hash + Clone> Default for KeyedMutex<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_key_serializes_access() {
        let locks: Arc<KeyedMutex<String>> = Arc::new(KeyedMutex::new());
        let order = Arc::new(SyncMutex::new(Vec::new()));

        let l1 = locks.clone();
        let o1 = order.clone();
        let h1 = tokio::spawn(async move {
            let _g = l1.lock("k".to_string()).await;
            tokio::time::sleep(Duration::from_millis(20)).await;
            o1.lock().push(1);
        });

        tokio::time::sleep(Duration::from_millis(5)).await;
        let l2 = locks.clone();
        let o2 = order.clone();
        let h2 = tokio::spawn(async move {
            let _g = l2.lock("k".to_string()).await;
            o2.lock().push(2);
        });

        h1.await.unwrap();
        h2.await.unwrap();
        assert_eq!(*order.lock(), vec![1, 2]);
    }

    #[tokio::test]
    async fn distinct_keys_do_not_block_each_other() {
        let locks: KeyedMutex<String> = KeyedMutex::new();
        let _a = locks.lock("a".to_string()).await;
        // Different key acquires immediately even while "a" is held.
        let fut = locks.lock("b".to_string());
        let result = tokio::time::timeout(Duration::from_millis(50), fut).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn evict_unused_drops_entries_with_no_holders() {
        let locks: KeyedMutex<String> = KeyedMutex::new();
        {
            let _g = locks.lock("k".to_string()).await;
            assert_eq!(locks.len(), 1);
        }
        locks.evict_unused();
        assert_eq!(locks.len(), 0);
    }
}
