//! Delivered-id log shared by the mailbox and the tracker

use crate::dedup::RecentSet;
use crate::persistence::Persistence;
use parking_lot::Mutex;
use std::sync::Arc;

/// Bounded record of ids known to be delivered. Mailbox entries are logged
/// by their UUID and tracked frames by their wire message id, both as
/// strings. Cloning shares the same log.
#[derive(Clone)]
pub struct DeliveredLog {
    ids: Arc<Mutex<RecentSet<String>>>,
    persistence: Option<Arc<dyn Persistence>>,
}

impl DeliveredLog {
    pub fn new(capacity: usize, persistence: Option<Arc<dyn Persistence>>) -> Self {
        Self {
            ids: Arc::new(Mutex::new(RecentSet::new(capacity))),
            persistence,
        }
    }

    /// Replace the contents with a persisted list, oldest first
    pub fn restore(&self, ids: impl IntoIterator<Item = String>) {
        let mut guard = self.ids.lock();
        let capacity = guard.capacity();
        *guard = RecentSet::from_ordered(capacity, ids);
    }

    /// Returns `true` if the id was not yet logged
    pub fn record(&self, id: impl Into<String>) -> bool {
        let snapshot = {
            let mut ids = self.ids.lock();
            if !ids.insert(id.into()) {
                return false;
            }
            self.persistence.as_ref().map(|_| ids.to_vec())
        };

        if let (Some(store), Some(ids)) = (&self.persistence, snapshot) {
            store.save_delivered(&ids);
        }
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.lock().contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.lock().is_empty()
    }

    pub fn clear(&self) {
        self.ids.lock().clear();
        if let Some(store) = &self.persistence {
            store.save_delivered(&[]);
        }
    }
}

impl std::fmt::Debug for DeliveredLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveredLog")
            .field("len", &self.len())
            .field("persistent", &self.persistence.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryStore;

    #[test]
    fn test_clones_share_state() {
        let log = DeliveredLog::new(10, None);
        let other = log.clone();

        assert!(log.record("abc"));
        assert!(other.contains("abc"));
        assert!(!other.record("abc"));
    }

    #[test]
    fn test_capacity_bound() {
        let log = DeliveredLog::new(3, None);
        for id in ["a", "b", "c", "d"] {
            log.record(id);
        }
        assert_eq!(log.len(), 3);
        assert!(!log.contains("a"));
        assert!(log.contains("d"));
    }

    #[test]
    fn test_writes_through_only_on_new_ids() {
        let store = Arc::new(MemoryStore::new());
        let log = DeliveredLog::new(10, Some(store.clone()));

        log.record("1");
        log.record("1");
        log.record("2");

        assert_eq!(store.write_count(), 2);
        assert_eq!(store.snapshot().delivered, vec!["1", "2"]);
    }

    #[test]
    fn test_restore_keeps_newest() {
        let log = DeliveredLog::new(2, None);
        log.restore(vec!["x".to_string(), "y".to_string(), "z".to_string()]);
        assert!(!log.contains("x"));
        assert!(log.contains("z"));
    }
}
