//! Handle table for in-flight asynchronous requests

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

/// First handle issued; offset from zero so stale or zeroed handles stand out
pub const FIRST_HANDLE: u32 = 19248;

/// Maps handles to in-flight entries
///
/// The lock is held only for the insert, lookup or removal itself. Handle
/// `0` is never issued.
pub struct HandleTable<T> {
    next: AtomicU32,
    entries: Mutex<HashMap<u32, T>>,
}

impl<T> HandleTable<T> {
    pub fn new() -> Self {
        Self {
            next: AtomicU32::new(FIRST_HANDLE),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Allocate a fresh handle and store `entry` under it
    pub fn insert(&self, entry: T) -> u32 {
        let handle = self.allocate();
        self.entries.lock().insert(handle, entry);
        handle
    }

    /// Remove the entry; `None` if it was never issued or already removed
    pub fn remove(&self, handle: u32) -> Option<T> {
        self.entries.lock().remove(&handle)
    }

    pub fn contains(&self, handle: u32) -> bool {
        self.entries.lock().contains_key(&handle)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every entry
    pub fn drain(&self) -> Vec<(u32, T)> {
        self.entries.lock().drain().collect()
    }

    fn allocate(&self) -> u32 {
        loop {
            let handle = self.next.fetch_add(1, Ordering::Relaxed);
            if handle != 0 {
                return handle;
            }
        }
    }
}

impl<T: Clone> HandleTable<T> {
    pub fn get(&self, handle: u32) -> Option<T> {
        self.entries.lock().get(&handle).cloned()
    }

    /// Clone every live entry; the table is left untouched
    pub fn snapshot(&self) -> Vec<T> {
        self.entries.lock().values().cloned().collect()
    }
}

impl<T> Default for HandleTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_handles_start_offset_from_zero() {
        let table = HandleTable::new();
        assert_eq!(table.insert("a"), FIRST_HANDLE);
        assert_eq!(table.insert("b"), FIRST_HANDLE + 1);
    }

    #[test]
    fn test_zero_is_skipped_on_wrap() {
        let table = HandleTable::new();
        table.next.store(u32::MAX, Ordering::Relaxed);
        assert_eq!(table.insert(()), u32::MAX);
        assert_eq!(table.insert(()), 1);
    }

    #[test]
    fn test_remove_is_once() {
        let table = HandleTable::new();
        let handle = table.insert(7);
        assert_eq!(table.get(handle), Some(7));
        assert_eq!(table.remove(handle), Some(7));
        assert_eq!(table.remove(handle), None);
        assert!(table.is_empty());
    }

    #[test]
    fn test_snapshot_keeps_entries() {
        let table = HandleTable::new();
        table.insert(1);
        table.insert(2);
        let mut values = table.snapshot();
        values.sort();
        assert_eq!(values, vec![1, 2]);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_concurrent_inserts_are_unique() {
        let table = Arc::new(HandleTable::new());
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let table = table.clone();
                std::thread::spawn(move || (0..100).map(|i| table.insert(i)).collect::<Vec<_>>())
            })
            .collect();
        let mut seen = HashSet::new();
        for thread in threads {
            for handle in thread.join().unwrap() {
                assert_ne!(handle, 0);
                assert!(seen.insert(handle));
            }
        }
        assert_eq!(table.len(), 800);
    }
}
