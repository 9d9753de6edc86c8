//! Guarded handoff of freshly computed analysis results.

use parking_lot::Mutex;

/// Mutex-guarded slot holding the most recently published value.
///
/// Both sides only hold the lock for the duration of a copy, never across an
/// analysis pass, so neither context can stall the other for longer than the
/// copy itself. Readers always observe a fully formed value.
#[derive(Debug, Default)]
pub struct SnapshotCell<T> {
    slot: Mutex<T>,
}

impl<T> SnapshotCell<T> {
    pub fn new(initial: T) -> Self {
        Self {
            slot: Mutex::new(initial),
        }
    }

    /// Atomically replace the published value. Reuses the slot's existing
    /// storage, so steady-state publishing does not allocate.
    pub fn publish(&self, value: &T)
    where
        T: Clone,
    {
        self.slot.lock().clone_from(value);
    }

    /// Run `read` against the current value while holding the lock; `read`
    /// must only copy.
    pub fn read<R>(&self, read: impl FnOnce(&T) -> R) -> R {
        read(&self.slot.lock())
    }

    /// Copy the current value into caller-provided storage.
    pub fn read_into(&self, dest: &mut T)
    where
        T: Clone,
    {
        dest.clone_from(&self.slot.lock());
    }

    /// Clone the current value out.
    pub fn snapshot(&self) -> T
    where
        T: Clone,
    {
        self.slot.lock().clone()
    }
}
