//! Per-category master lists of live resources.

use std::sync::Arc;

use parking_lot::Mutex;

/// Master list of every live resource of one category.
///
/// The device keeps one strong reference to each resource it created. Once
/// that reference is the only one left, the client has dropped the resource
/// and [`ResourceRegistry::collect_released`] hands it over to deferred
/// deletion.
pub(crate) struct ResourceRegistry<T> {
    entries: Mutex<Vec<Arc<T>>>,
}

impl<T> ResourceRegistry<T> {
    pub(crate) fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Track a newly created resource.
    pub(crate) fn register(&self, resource: &Arc<T>) {
        self.entries.lock().push(Arc::clone(resource));
    }

    /// Remove and return every resource no longer referenced outside the registry.
    pub(crate) fn collect_released(&self) -> Vec<Arc<T>> {
        let mut entries = self.entries.lock();
        let mut released = Vec::new();
        let mut index = 0;
        while index < entries.len() {
            if Arc::strong_count(&entries[index]) == 1 {
                released.push(entries.swap_remove(index));
            } else {
                index += 1;
            }
        }
        released
    }

    /// Remove and return every resource, referenced or not.
    pub(crate) fn drain(&self) -> Vec<Arc<T>> {
        std::mem::take(&mut *self.entries.lock())
    }

    /// Snapshot of the live resources.
    pub(crate) fn snapshot(&self) -> Vec<Arc<T>> {
        self.entries.lock().clone()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }
}
