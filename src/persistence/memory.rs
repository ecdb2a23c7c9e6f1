//! In-process persistence backend

use crate::delivery::PendingAck;
use crate::persistence::types::{MailboxSnapshot, PersistedState};
use crate::persistence::Persistence;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Keeps the last written copy of each record in memory. Survives a node
/// being dropped and rebuilt, which is what restart tests need.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<PersistedState>,
    writes: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: PersistedState) -> Self {
        Self {
            state: Mutex::new(state),
            writes: AtomicU64::new(0),
        }
    }

    /// Copy of everything written so far
    pub fn snapshot(&self) -> PersistedState {
        self.state.lock().clone()
    }

    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}

impl Persistence for MemoryStore {
    fn save_mailbox(&self, mailbox: &MailboxSnapshot) {
        self.state.lock().mailbox = mailbox.clone();
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    fn save_pending_acks(&self, pending: &[PendingAck]) {
        self.state.lock().pending_acks = pending.to_vec();
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    fn save_delivered(&self, ids: &[String]) {
        self.state.lock().delivered = ids.to_vec();
        self.writes.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_write_wins() {
        let store = MemoryStore::new();
        store.save_delivered(&["a".to_string()]);
        store.save_delivered(&["a".to_string(), "b".to_string()]);

        let state = store.snapshot();
        assert_eq!(state.delivered, vec!["a", "b"]);
        assert_eq!(store.write_count(), 2);
        assert!(state.mailbox.is_empty());
    }
}
