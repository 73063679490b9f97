//! Per-key write locks.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

/// A table of one mutex per key, holding entries only while they are in use.
///
/// Writers on the same key serialize; writers on distinct keys only share
/// the table lock for the duration of a lookup.
pub struct KeyedLocks<K> {
    locks: Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Run `f` while holding the lock for `key`.
    pub fn with<T>(&self, key: &K, f: impl FnOnce() -> T) -> T {
        let handle = Arc::clone(self.locks.lock().entry(key.clone()).or_default());

        let result = {
            let _guard = handle.lock();
            f()
        };

        drop(handle);
        self.release(key);
        result
    }

    /// Drop the entry for `key` once no caller holds or waits on it.
    ///
    /// Handles are only cloned under the table lock, so a count of one here
    /// means the table is the sole owner.
    fn release(&self, key: &K) {
        let mut locks = self.locks.lock();
        if locks
            .get(key)
            .map_or(false, |handle| Arc::strong_count(handle) == 1)
        {
            locks.remove(key);
        }
    }

    /// Number of keys currently locked or waited on.
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K: Eq + Hash + Clone> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    #[test]
    fn test_entry_released_after_use() {
        let locks = KeyedLocks::new();
        let value = locks.with(&"alice", || {
            assert_eq!(locks.len(), 1);
            7
        });

        assert_eq!(value, 7);
        assert!(locks.is_empty());
    }

    #[test]
    fn test_distinct_keys_do_not_block() {
        let locks = KeyedLocks::new();
        locks.with(&"alice", || {
            // Taking another key while holding the first must not deadlock
            locks.with(&"bob", || {
                assert_eq!(locks.len(), 2);
            });
            assert_eq!(locks.len(), 1);
        });
        assert!(locks.is_empty());
    }

    #[test]
    fn test_serializes_counter_updates() {
        let locks = Arc::new(KeyedLocks::new());
        let counter = Arc::new(Mutex::new(0u64));
        let start = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let locks = Arc::clone(&locks);
                let counter = Arc::clone(&counter);
                let start = Arc::clone(&start);
                thread::spawn(move || {
                    start.wait();
                    for _ in 0..100 {
                        locks.with(&"key", || {
                            let current = *counter.lock();
                            thread::yield_now();
                            *counter.lock() = current + 1;
                        });
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(*counter.lock(), 800);
        assert!(locks.is_empty());
    }

    #[test]
    fn test_table_does_not_grow_with_keys() {
        let locks = KeyedLocks::new();
        for i in 0..1000 {
            locks.with(&i, || ());
        }
        assert!(locks.is_empty());
    }
}
