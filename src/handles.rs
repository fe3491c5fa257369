//! Open file handle bookkeeping.

use std::{collections::BTreeMap, sync::Mutex};

/// Handles below this value look like stdin/stdout/stderr and are never issued.
pub const FIRST_HANDLE: u64 = 3;

/// Maps small integer handles to whatever they were opened against.
///
/// Allocation always picks the smallest free integer, so released handles are
/// reused. A handle is never issued twice while it is still assigned.
pub struct HandleTable<T> {
    open: Mutex<BTreeMap<u64, T>>,
}

impl<T: Clone> HandleTable<T> {
    pub fn new() -> Self {
        Self {
            open: Mutex::new(BTreeMap::new()),
        }
    }

    fn table(&self) -> std::sync::MutexGuard<'_, BTreeMap<u64, T>> {
        // Every critical section is a single map operation, so a poisoned map
        // is still consistent.
        self.open.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Assign the smallest unused handle to `target`.
    pub fn allocate(&self, target: T) -> u64 {
        let mut open = self.table();
        let mut handle = FIRST_HANDLE;
        for &taken in open.keys() {
            if taken != handle {
                break;
            }
            handle += 1;
        }
        open.insert(handle, target);
        handle
    }

    pub fn resolve(&self, handle: u64) -> Option<T> {
        self.table().get(&handle).cloned()
    }

    /// Free `handle`; returns whether it was assigned.
    pub fn release(&self, handle: u64) -> bool {
        self.table().remove(&handle).is_some()
    }

    pub fn len(&self) -> usize {
        self.table().len()
    }
}

impl<T: Clone> Default for HandleTable<T> {
    fn default() -> Self {
        Self::new()
    }
}
