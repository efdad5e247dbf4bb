//! Per-key memoization with cycle detection.
//!
//! Every lazily built runtime structure (vtables, interface maps,
//! dictionaries, dictionary slots, layouts, compiled entries, stubs) lives in
//! a [`MemoCell`]. A cell is built at most once: concurrent callers for the
//! same key block on the cell's condvar until the builder finishes, callers
//! for other keys never touch it, and a thread that re-enters a cell it is
//! itself building gets [`RuntimeError::ConstructionCycle`] instead of
//! recursing forever.

use std::hash::Hash;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex, RwLock};
use rustc_hash::FxHashMap;

use crate::error::RuntimeError;

enum MemoState<V> {
    Vacant,
    Building(ThreadId),
    Ready(V),
    Failed(RuntimeError),
}

pub struct MemoCell<V> {
    state: Mutex<MemoState<V>>,
    done: Condvar,
}

impl<V: Clone> Default for MemoCell<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Resets a cell to `Vacant` if its builder unwinds, so waiters wake up and
/// the next caller retries instead of blocking forever.
struct BuildGuard<'a, V> {
    cell: &'a MemoCell<V>,
    armed: bool,
}

impl<V> Drop for BuildGuard<'_, V> {
    fn drop(&mut self) {
        if self.armed {
            *self.cell.state.lock() = MemoState::Vacant;
            self.cell.done.notify_all();
        }
    }
}

impl<V: Clone> MemoCell<V> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoState::Vacant),
            done: Condvar::new(),
        }
    }

    /// The built value, if construction has completed successfully.
    pub fn get(&self) -> Option<V> {
        match &*self.state.lock() {
            MemoState::Ready(v) => Some(v.clone()),
            _ => None,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(&*self.state.lock(), MemoState::Ready(_))
    }

    /// Return the value, building it with `init` on first use.
    ///
    /// `label` names the thing being built in cycle errors. A failed build is
    /// memoized: later callers get the same error.
    pub fn get_or_try_init<L, F>(&self, label: L, init: F) -> Result<V, RuntimeError>
    where
        L: FnOnce() -> String,
        F: FnOnce() -> Result<V, RuntimeError>,
    {
        let me = thread::current().id();
        let mut state = self.state.lock();
        loop {
            match &*state {
                MemoState::Ready(v) => return Ok(v.clone()),
                MemoState::Failed(e) => return Err(e.clone()),
                MemoState::Building(owner) if *owner == me => {
                    return Err(RuntimeError::ConstructionCycle(label()));
                }
                MemoState::Building(_) => self.done.wait(&mut state),
                MemoState::Vacant => break,
            }
        }
        *state = MemoState::Building(me);
        drop(state);

        let mut guard = BuildGuard {
            cell: self,
            armed: true,
        };
        let result = init();
        guard.armed = false;

        let mut state = self.state.lock();
        *state = match &result {
            Ok(v) => MemoState::Ready(v.clone()),
            Err(e) => MemoState::Failed(e.clone()),
        };
        drop(state);
        self.done.notify_all();
        result
    }
}

/// A map of memo cells. The table lock is held only to fetch or insert a
/// cell, never while a value is being built.
pub struct MemoTable<K, V> {
    cells: RwLock<FxHashMap<K, Arc<MemoCell<V>>>>,
}

impl<K: Eq + Hash + Clone, V: Clone> Default for MemoTable<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Clone, V: Clone> MemoTable<K, V> {
    pub fn new() -> Self {
        Self {
            cells: RwLock::new(FxHashMap::default()),
        }
    }

    pub fn cell(&self, key: &K) -> Arc<MemoCell<V>> {
        if let Some(cell) = self.cells.read().get(key) {
            return Arc::clone(cell);
        }
        Arc::clone(self.cells.write().entry(key.clone()).or_default())
    }

    pub fn get_or_try_init<L, F>(&self, key: &K, label: L, init: F) -> Result<V, RuntimeError>
    where
        L: FnOnce() -> String,
        F: FnOnce() -> Result<V, RuntimeError>,
    {
        self.cell(key).get_or_try_init(label, init)
    }

    /// Already-built value for `key`, without building.
    pub fn peek(&self, key: &K) -> Option<V> {
        self.cells.read().get(key).and_then(|c| c.get())
    }

    pub fn ready_count(&self) -> usize {
        self.cells.read().values().filter(|c| c.is_ready()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;

    #[test]
    fn builds_once_and_caches() {
        let cell: MemoCell<u32> = MemoCell::new();
        let runs = AtomicUsize::new(0);
        for _ in 0..3 {
            let v = cell
                .get_or_try_init(
                    || "x".into(),
                    || {
                        runs.fetch_add(1, Ordering::SeqCst);
                        Ok(7)
                    },
                )
                .unwrap();
            assert_eq!(v, 7);
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn reentry_is_a_cycle() {
        let cell: MemoCell<u32> = MemoCell::new();
        let err = cell
            .get_or_try_init(
                || "outer".into(),
                || cell.get_or_try_init(|| "vtable of Loop".into(), || Ok(1)),
            )
            .unwrap_err();
        assert!(matches!(err, RuntimeError::ConstructionCycle(ref what) if what == "vtable of Loop"));
        // The failure is terminal for the cell.
        assert!(cell.get_or_try_init(|| "again".into(), || Ok(2)).is_err());
    }

    #[test]
    fn concurrent_first_use_builds_once() {
        let table: MemoTable<u32, Arc<String>> = MemoTable::new();
        let runs = AtomicUsize::new(0);
        let barrier = Barrier::new(8);
        crossbeam_utils::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|_| {
                    barrier.wait();
                    let v = table
                        .get_or_try_init(
                            &1,
                            || "one".into(),
                            || {
                                runs.fetch_add(1, Ordering::SeqCst);
                                std::thread::sleep(std::time::Duration::from_millis(5));
                                Ok(Arc::new("built".to_string()))
                            },
                        )
                        .unwrap();
                    assert_eq!(v.as_str(), "built");
                });
            }
        })
        .unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(table.ready_count(), 1);
    }

    #[test]
    fn panicking_builder_leaves_cell_retryable() {
        let cell: MemoCell<u32> = MemoCell::new();
        let caught = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = cell.get_or_try_init(|| "boom".into(), || panic!("boom"));
        }));
        assert!(caught.is_err());
        assert_eq!(cell.get_or_try_init(|| "ok".into(), || Ok(3)).unwrap(), 3);
    }
}
