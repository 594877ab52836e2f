//! A map of named mutexes.
//!
//! `KeyedLocker` gives at most one concurrent critical section per string key.
//! Resolutions lock the remote URL while touching its mirror and the snapshot
//! key while building a checkout. Keys are never evicted and acquisition never
//! times out: a hung holder stalls every waiter on the same key.

use std::collections::HashMap;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// Blocking mutual exclusion per distinct string key.
///
/// Construct one per process and share it (behind an `Arc`) between every
/// `GitSource` that should serialize against each other.
///
/// # Examples
///
/// ```
/// use gitsnap::KeyedLocker;
///
/// let locker = KeyedLocker::new();
/// {
///     let _guard = locker.lock("https://example.com/repo.git");
///     assert!(locker.is_locked("https://example.com/repo.git"));
/// }
/// assert!(!locker.is_locked("https://example.com/repo.git"));
/// ```
#[derive(Debug, Default)]
pub struct KeyedLocker {
    held: Mutex<HashMap<String, bool>>,
    released: Condvar,
}

/// Releases its key when dropped.
#[derive(Debug)]
#[must_use = "the key is unlocked as soon as the guard is dropped"]
pub struct KeyGuard<'a> {
    locker: &'a KeyedLocker,
    key: String,
}

impl KeyedLocker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until `key` is free, then holds it until the guard is dropped.
    pub fn lock(&self, key: &str) -> KeyGuard<'_> {
        let mut held = self.state();
        while held.get(key).copied().unwrap_or(false) {
            held = self
                .released
                .wait(held)
                .unwrap_or_else(PoisonError::into_inner);
        }
        held.insert(key.to_string(), true);
        log::trace!("Locked key {:?}", key);
        KeyGuard {
            locker: self,
            key: key.to_string(),
        }
    }

    /// Acquires `key` only if nobody holds it right now.
    pub fn try_lock(&self, key: &str) -> Option<KeyGuard<'_>> {
        let mut held = self.state();
        if held.get(key).copied().unwrap_or(false) {
            return None;
        }
        held.insert(key.to_string(), true);
        Some(KeyGuard {
            locker: self,
            key: key.to_string(),
        })
    }

    /// Reports whether `key` is currently held.
    pub fn is_locked(&self, key: &str) -> bool {
        self.state().get(key).copied().unwrap_or(false)
    }

    fn unlock(&self, key: &str) {
        let mut held = self.state();
        if let Some(flag) = held.get_mut(key) {
            *flag = false;
        }
        drop(held);
        log::trace!("Unlocked key {:?}", key);
        self.released.notify_all();
    }

    // A panic inside a critical section must not wedge every later caller.
    fn state(&self) -> MutexGuard<'_, HashMap<String, bool>> {
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl KeyGuard<'_> {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        self.locker.unlock(&self.key);
    }
}
