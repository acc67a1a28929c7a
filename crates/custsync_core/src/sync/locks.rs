//! Per-key mutual exclusion.
//!
//! Serializes read-check-write sequences on the identity map for one
//! identifier while letting different identifiers proceed in parallel.

use std::collections::HashSet;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

#[derive(Default)]
pub struct KeyedLocks {
    held: Mutex<HashSet<String>>,
    released: Condvar,
}

/// Holds one key until dropped.
pub struct KeyGuard<'a> {
    owner: &'a KeyedLocks,
    key: String,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until `key` is free, then takes it.
    pub fn lock(&self, key: impl Into<String>) -> KeyGuard<'_> {
        let key = key.into();
        let mut held = self.held_set();
        while held.contains(&key) {
            held = self
                .released
                .wait(held)
                .unwrap_or_else(PoisonError::into_inner);
        }
        held.insert(key.clone());
        KeyGuard { owner: self, key }
    }

    pub fn is_held(&self, key: &str) -> bool {
        self.held_set().contains(key)
    }

    fn held_set(&self) -> MutexGuard<'_, HashSet<String>> {
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        self.owner.held_set().remove(&self.key);
        self.owner.released.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::KeyedLocks;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn guard_releases_key_on_drop() {
        let locks = KeyedLocks::new();
        {
            let _guard = locks.lock("local:7");
            assert!(locks.is_held("local:7"));
            assert!(!locks.is_held("local:8"));
        }
        assert!(!locks.is_held("local:7"));
    }

    #[test]
    fn same_key_is_mutually_exclusive_across_threads() {
        let locks = Arc::new(KeyedLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let locks = Arc::clone(&locks);
                let inside = Arc::clone(&inside);
                let max_seen = Arc::clone(&max_seen);
                thread::spawn(move || {
                    let _guard = locks.lock("external:cus_1");
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(5));
                    inside.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }
}
