//! Callback registries shared between handles and the socket task.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

/// Counter for binding refs. Shared by every registry so a ref names
/// exactly one callback in the whole process.
static NEXT_REF: AtomicU64 = AtomicU64::new(1);

/// Guards one registered callback against running once it was removed.
///
/// A call holds the gate for as long as the callback runs. Closing the
/// gate waits for a call running on another thread; a callback closing
/// its own gate returns at once and finishes normally.
#[derive(Default)]
pub(crate) struct Gate {
    closed: AtomicBool,
    call: Mutex<()>,
    caller: Mutex<Option<ThreadId>>,
}

impl Gate {
    /// Runs `f` unless the gate was closed.
    pub(crate) fn pass(&self, f: impl FnOnce()) {
        let _call = lock(&self.call);
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        *lock(&self.caller) = Some(thread::current().id());
        f();
        *lock(&self.caller) = None;
    }

    /// Closes the gate. Once this returns the callback never starts again
    /// and no call of it is running on another thread.
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
        if *lock(&self.caller) == Some(thread::current().id()) {
            return;
        }
        drop(lock(&self.call));
    }
}

// The data behind these locks is never left half-updated by a panicking
// callback, so a poisoned lock is still usable.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Entry<K, F: ?Sized> {
    key: K,
    id: u64,
    gate: Arc<Gate>,
    callback: Arc<F>,
}

/// An ordered list of callbacks, each filed under a key.
///
/// Handles register and remove callbacks from any thread while the
/// socket task dispatches. Dispatch works on a snapshot, and every call
/// passes through the entry's [`Gate`]: a callback removed before its
/// turn is skipped, and removing one that is running waits for it.
pub(crate) struct Listeners<K, F: ?Sized> {
    entries: Arc<Mutex<Vec<Entry<K, F>>>>,
}

impl<K, F: ?Sized> Clone for Listeners<K, F> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<K, F: ?Sized> Default for Listeners<K, F> {
    fn default() -> Self {
        Self {
            entries: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<K, F: ?Sized> Listeners<K, F> {
    /// Registers `callback` under `key` and returns its ref.
    pub(crate) fn add(&self, key: K, callback: Arc<F>) -> u64 {
        let id = NEXT_REF.fetch_add(1, Ordering::Relaxed);
        lock(&self.entries).push(Entry {
            key,
            id,
            gate: Arc::default(),
            callback,
        });
        id
    }

    /// Removes every entry under a key accepted by `key`, optionally only
    /// the one with ref `id`.
    pub(crate) fn remove(&self, key: impl Fn(&K) -> bool, id: Option<u64>) {
        self.remove_where(|entry| key(&entry.key) && id.is_none_or(|id| id == entry.id));
    }

    /// Removes the entries with the given refs, whatever their key.
    pub(crate) fn remove_refs(&self, refs: &[u64]) {
        self.remove_where(|entry| refs.contains(&entry.id));
    }

    pub(crate) fn clear(&self) {
        self.remove_where(|_| true);
    }

    pub(crate) fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    /// Calls `invoke` for each callback under a key accepted by `key`, in
    /// registration order.
    pub(crate) fn dispatch(&self, key: impl Fn(&K) -> bool, mut invoke: impl FnMut(&F)) {
        let snapshot: Vec<(Arc<Gate>, Arc<F>)> = lock(&self.entries)
            .iter()
            .filter(|entry| key(&entry.key))
            .map(|entry| (Arc::clone(&entry.gate), Arc::clone(&entry.callback)))
            .collect();

        for (gate, callback) in snapshot {
            gate.pass(|| invoke(&callback));
        }
    }

    // Gates are closed after the list lock is released: a running
    // callback may itself touch the list.
    fn remove_where(&self, matches: impl Fn(&Entry<K, F>) -> bool) {
        let removed: Vec<Arc<Gate>> = {
            let mut entries = lock(&self.entries);
            let (removed, kept): (Vec<_>, Vec<_>) =
                std::mem::take(&mut *entries).into_iter().partition(|e| matches(e));
            *entries = kept;
            removed.into_iter().map(|entry| entry.gate).collect()
        };
        for gate in removed {
            gate.close();
        }
    }
}
