//! Bounded recent-id tracking
//!
//! Keeps the most recent `capacity` ids in insertion order. Used for ledger
//! admission, the delivered-id log and receive-path packet dedup.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::{HashSet, VecDeque};
use std::hash::Hash;

#[derive(Debug, Clone)]
pub struct RecentSet<T: Eq + Hash + Clone> {
    order: VecDeque<T>,
    members: HashSet<T>,
    capacity: usize,
}

impl<T: Eq + Hash + Clone> RecentSet<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity.min(4096)),
            members: HashSet::with_capacity(capacity.min(4096)),
            capacity: capacity.max(1),
        }
    }

    /// Rebuild from a persisted list, oldest first. Only the newest
    /// `capacity` entries survive.
    pub fn from_ordered(capacity: usize, items: impl IntoIterator<Item = T>) -> Self {
        let mut set = Self::new(capacity);
        for item in items {
            set.insert(item);
        }
        set
    }

    /// Returns `true` if the id was new.
    pub fn insert(&mut self, item: T) -> bool {
        if self.members.contains(&item) {
            return false;
        }

        if self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.members.remove(&oldest);
            }
        }

        self.members.insert(item.clone());
        self.order.push_back(item);
        true
    }

    pub fn contains<Q>(&self, item: &Q) -> bool
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.members.contains(item)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.members.clear();
    }

    /// Oldest first
    pub fn to_vec(&self) -> Vec<T> {
        self.order.iter().cloned().collect()
    }
}

/// Identity of a message across the mesh: the originator's 32-bit source
/// hash plus the 32-bit wire message id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageKey {
    pub source: u32,
    pub message_id: u32,
}

impl MessageKey {
    pub fn new(source: u32, message_id: u32) -> Self {
        Self { source, message_id }
    }
}

impl std::fmt::Display for MessageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:08x}-{:08x}", self.source, self.message_id)
    }
}
