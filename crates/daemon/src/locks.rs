//! Per-path write locking.
//!
//! Two connections writing to *different* files must never block each
//! other; two connections writing to the *same* file must be serialized —
//! but only for the duration of each individual open/write, not for the
//! whole lifetime of an upload. [`PathLockRegistry`] is a map from
//! canonical path to a reference-counted [`tokio::sync::Mutex`]; entries
//! are created on first use and removed once nothing references them, so
//! the table never grows unboundedly across the daemon's lifetime.
//!
//! [`PathLockRegistry::acquire`] only hands out a reference-counted
//! [`PathLockHandle`] — it never blocks and never takes the mutex. Callers
//! that actually need mutual exclusion call [`PathLockHandle::lock`]
//! around just the critical section (a single open or a single write),
//! which is what lets two chunk writers to the same file interleave their
//! non-overlapping writes instead of serializing the entire upload.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// The shared table of per-path locks.
///
/// Cheaply cloneable; every handler that needs to serialize access to a
/// path holds a clone of the same registry owned by [`crate::server::Daemon`].
#[derive(Debug, Clone, Default)]
pub struct PathLockRegistry {
    entries: Arc<DashMap<PathBuf, Arc<Mutex<()>>>>,
}

/// A reference-counted handle to a path's lock entry.
///
/// Holding a handle keeps the entry alive in the registry but does **not**
/// lock anything by itself — acquiring one is just a refcount bump. Call
/// [`PathLockHandle::lock`] to actually take the mutex for a critical
/// section; drop the returned guard as soon as that section ends so other
/// holders of a handle for the same path can proceed.
///
/// Dropping the handle itself prunes the registry entry if this was the
/// last outstanding reference to that path.
#[must_use = "dropping this handle immediately prunes its refcount"]
pub struct PathLockHandle {
    path: PathBuf,
    registry: PathLockRegistry,
    mutex: Arc<Mutex<()>>,
}

impl PathLockRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a reference-counted handle for `path`, creating its entry if
    /// this is the first reference. Never blocks — no lock is taken.
    ///
    /// `path` should already be canonicalized by the caller ([`crate::fsutil::normalize_path`])
    /// so that two different spellings of the same file serialize against
    /// each other.
    pub fn acquire(&self, path: &Path) -> PathLockHandle {
        let mutex = self
            .entries
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        PathLockHandle {
            path: path.to_path_buf(),
            registry: self.clone(),
            mutex,
        }
    }

    /// Number of distinct paths currently tracked (handed out or recently
    /// handed out but not yet pruned). Exposed for tests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry currently tracks no paths.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn prune_if_unreferenced(&self, path: &Path, mutex: &Arc<Mutex<()>>) {
        if let Some(entry) = self.entries.get(path) {
            if !Arc::ptr_eq(entry.value(), mutex) {
                // A fresher entry has already replaced this one; nothing to prune.
                return;
            }
            // Two references are guaranteed alive here: the registry's own
            // map slot, and `mutex` (our caller's clone, about to be
            // dropped). Anything beyond that means another handle still
            // needs the mutex alive.
            if Arc::strong_count(entry.value()) <= 2 {
                drop(entry);
                self.entries.remove_if(path, |_, v| Arc::ptr_eq(v, mutex) && Arc::strong_count(v) <= 2);
            }
        }
    }
}

impl PathLockHandle {
    /// Takes the mutex, blocking until any other holder's critical section
    /// finishes. Hold the returned guard only for the duration of the
    /// actual open/write; drop it as soon as that operation completes.
    pub async fn lock(&self) -> OwnedMutexGuard<()> {
        self.mutex.clone().lock_owned().await
    }
}

impl Drop for PathLockHandle {
    fn drop(&mut self) {
        self.registry.prune_if_unreferenced(&self.path, &self.mutex);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn serializes_locked_access_to_the_same_path() {
        let registry = PathLockRegistry::new();
        let path = PathBuf::from("/data/a.bin");

        let order = Arc::new(tokio::sync::Mutex::new(Vec::new()));

        let r1 = registry.clone();
        let o1 = order.clone();
        let p1 = path.clone();
        let t1 = tokio::spawn(async move {
            let handle = r1.acquire(&p1);
            let _guard = handle.lock().await;
            tokio::time::sleep(Duration::from_millis(20)).await;
            o1.lock().await.push(1);
        });

        tokio::time::sleep(Duration::from_millis(5)).await;

        let r2 = registry.clone();
        let o2 = order.clone();
        let p2 = path.clone();
        let t2 = tokio::spawn(async move {
            let handle = r2.acquire(&p2);
            let _guard = handle.lock().await;
            o2.lock().await.push(2);
        });

        t1.await.unwrap();
        t2.await.unwrap();

        assert_eq!(*order.lock().await, vec![1, 2]);
    }

    #[tokio::test]
    async fn different_paths_do_not_block_each_other() {
        let registry = PathLockRegistry::new();
        let a = registry.acquire(Path::new("/data/a.bin"));
        let b = registry.acquire(Path::new("/data/b.bin"));
        let _ga = a.lock().await;
        let _gb = b.lock().await;
    }

    #[tokio::test]
    async fn handle_for_the_same_path_does_not_block_while_unlocked() {
        let registry = PathLockRegistry::new();
        let path = PathBuf::from("/data/d.bin");

        // Holding two handles for the same path is fine as long as neither
        // has taken the lock — acquiring a handle is refcount-only.
        let a = registry.acquire(&path);
        let b = registry.acquire(&path);
        assert_eq!(registry.len(), 1);

        let guard = a.lock().await;
        drop(guard);
        let guard = b.lock().await;
        drop(guard);
    }

    #[tokio::test]
    async fn entry_is_pruned_once_no_handle_remains() {
        let registry = PathLockRegistry::new();
        let path = PathBuf::from("/data/c.bin");
        {
            let handle = registry.acquire(&path);
            assert_eq!(registry.len(), 1);
            let _guard = handle.lock().await;
        }
        assert!(registry.is_empty());
    }
}
