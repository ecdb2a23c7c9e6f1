//! Bounded advisory route cache

use crate::relay::types::RouteHint;
use std::collections::{HashMap, VecDeque};

/// Source hash -> latest [`RouteHint`]. When full, the destination that was
/// updated least recently is dropped.
#[derive(Debug, Clone)]
pub struct RouteCache {
    routes: HashMap<u32, RouteHint>,
    recency: VecDeque<u32>,
    capacity: usize,
}

impl RouteCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            routes: HashMap::new(),
            recency: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn record(&mut self, destination: u32, hint: RouteHint) {
        if self.routes.insert(destination, hint).is_some() {
            self.recency.retain(|d| *d != destination);
        } else if self.routes.len() > self.capacity {
            if let Some(stale) = self.recency.pop_front() {
                self.routes.remove(&stale);
            }
        }
        self.recency.push_back(destination);
    }

    pub fn get(&self, destination: u32) -> Option<&RouteHint> {
        self.routes.get(&destination)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
