//! Snapshot storage boundary.

use parking_lot::Mutex;
use std::collections::HashMap;

/// External store for snapshot baselines, keyed by test name and call-site
/// ordinal. Persistence format is the store's business; the runner only
/// ever hands it canonical strings.
pub trait SnapshotStore: Send + Sync {
    fn load(&self, test: &str, site: u32) -> Option<String>;
    fn store(&self, test: &str, site: u32, serialized: String);
}

/// In-memory store, enough for single-process runs and tests.
#[derive(Default)]
pub struct MemorySnapshots {
    entries: Mutex<HashMap<(String, u32), String>>,
}

impl MemorySnapshots {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl SnapshotStore for MemorySnapshots {
    fn load(&self, test: &str, site: u32) -> Option<String> {
        self.entries.lock().get(&(test.to_string(), site)).cloned()
    }

    fn store(&self, test: &str, site: u32, serialized: String) {
        self.entries
            .lock()
            .insert((test.to_string(), site), serialized);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn baselines_are_keyed_by_test_and_site() {
        let store = MemorySnapshots::new();
        store.store("a", 0, "x".into());
        store.store("a", 1, "y".into());
        store.store("b", 0, "z".into());
        assert_eq!(store.load("a", 0).as_deref(), Some("x"));
        assert_eq!(store.load("a", 1).as_deref(), Some("y"));
        assert_eq!(store.load("b", 0).as_deref(), Some("z"));
        assert_eq!(store.load("b", 1), None);
    }
}
