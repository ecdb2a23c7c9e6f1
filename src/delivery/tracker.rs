//! Pending-ACK table
//!
//! Passive bookkeeping: the tracker never schedules anything itself. The
//! node's maintenance tick polls [`DeliveryTracker::get_messages_needing_retry`],
//! retransmits, then reports back with [`DeliveryTracker::increment_retry`].

use crate::clock::{duration_ms, Clock};
use crate::delivery::log::DeliveredLog;
use crate::delivery::types::{AckEvent, PendingAck, RetryOutcome, TrackerConfig, TrackerStats};
use crate::events::{Listeners, Subscription};
use crate::metrics::recorder;
use crate::persistence::Persistence;
use crate::protocol::{AckType, Priority};
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct DeliveryTracker {
    config: TrackerConfig,
    pending: RwLock<HashMap<u32, PendingAck>>,
    delivered: DeliveredLog,
    clock: Arc<dyn Clock>,
    persistence: Option<Arc<dyn Persistence>>,
    ack_listeners: Listeners<AckEvent>,
    next_seq: AtomicU64,
    tracked: AtomicU64,
    acked: AtomicU64,
    retries: AtomicU64,
    exhausted: AtomicU64,
    evicted: AtomicU64,
}

impl DeliveryTracker {
    pub fn new(
        config: TrackerConfig,
        clock: Arc<dyn Clock>,
        delivered: DeliveredLog,
        persistence: Option<Arc<dyn Persistence>>,
    ) -> Self {
        Self {
            config,
            pending: RwLock::new(HashMap::new()),
            delivered,
            clock,
            persistence,
            ack_listeners: Listeners::new(),
            next_seq: AtomicU64::new(0),
            tracked: AtomicU64::new(0),
            acked: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            exhausted: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
        }
    }

    /// Load a persisted table. Existing entries with the same id are replaced.
    pub fn restore(&self, entries: Vec<PendingAck>) {
        let mut pending = self.pending.write();
        for mut entry in entries {
            entry.seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
            pending.insert(entry.message_id, entry);
        }
        recorder::set_pending_acks(pending.len());
    }

    /// Register a transmitted frame. When the table overflows, the entries
    /// that sort last by (priority, sent_at) are dropped.
    pub fn track_for_ack(
        &self,
        message_id: u32,
        target_peer_id: impl Into<String>,
        frame: Bytes,
        priority: Priority,
    ) {
        let mut entry = PendingAck::new(
            message_id,
            target_peer_id,
            frame,
            priority,
            self.clock.now_ms(),
        );
        entry.seq = self.next_seq.fetch_add(1, Ordering::Relaxed);

        let evicted = {
            let mut pending = self.pending.write();
            pending.insert(message_id, entry);

            if pending.len() > self.config.max_pending {
                let mut order: Vec<_> = pending
                    .values()
                    .map(|p| (p.eviction_key(), p.message_id))
                    .collect();
                order.sort_unstable();

                let doomed: Vec<u32> = order[self.config.max_pending..]
                    .iter()
                    .map(|(_, id)| *id)
                    .collect();
                for id in &doomed {
                    pending.remove(id);
                }
                doomed
            } else {
                Vec::new()
            }
        };

        self.tracked.fetch_add(1, Ordering::Relaxed);
        if !evicted.is_empty() {
            self.evicted.fetch_add(evicted.len() as u64, Ordering::Relaxed);
            recorder::record_pending_ack_evictions(evicted.len());
            debug!(count = evicted.len(), ids = ?evicted, "pending ACK table full, evicted");
        }
        debug!(message_id, ?priority, "tracking for ACK");
        self.persist();
    }

    /// Clear a pending entry. Returns `false` for ids that were not pending.
    pub fn process_ack(&self, message_id: u32, ack_type: AckType, receiver_hash: u32) -> bool {
        let Some(entry) = self.pending.write().remove(&message_id) else {
            debug!(message_id, "ACK for unknown message ignored");
            return false;
        };

        let latency_ms = self.clock.now_ms().saturating_sub(entry.sent_at);
        info!(message_id, ?ack_type, receiver_hash, latency_ms, "ACK received");

        self.persist();
        self.delivered.record(message_id.to_string());
        self.acked.fetch_add(1, Ordering::Relaxed);
        recorder::record_ack_received(ack_type, latency_ms);

        self.ack_listeners.emit(&AckEvent {
            message_id,
            ack_type,
            receiver_hash,
            target_peer_id: entry.target_peer_id,
            latency_ms,
        });
        true
    }

    /// Entries whose ACK window has elapsed and that still have retries
    /// left, most urgent first.
    pub fn get_messages_needing_retry(&self) -> Vec<PendingAck> {
        let now = self.clock.now_ms();
        let timeout = duration_ms(self.config.ack_timeout);

        let mut due: Vec<PendingAck> = self
            .pending
            .read()
            .values()
            .filter(|p| now.saturating_sub(p.sent_at) > timeout)
            .filter(|p| p.retry_count < self.config.max_retries)
            .cloned()
            .collect();
        due.sort_by_key(PendingAck::eviction_key);
        due
    }

    /// Count a retransmission and restart the ACK window
    pub fn increment_retry(&self, message_id: u32) -> RetryOutcome {
        let outcome = {
            let mut pending = self.pending.write();
            let Some(entry) = pending.get_mut(&message_id) else {
                return RetryOutcome::NotPending;
            };

            let next = entry.retry_count + 1;
            if next > self.config.max_retries {
                pending.remove(&message_id);
                RetryOutcome::Exhausted
            } else {
                entry.retry_count = next;
                entry.sent_at = self.clock.now_ms();
                RetryOutcome::Retrying { retry_count: next }
            }
        };

        match outcome {
            RetryOutcome::Exhausted => {
                self.exhausted.fetch_add(1, Ordering::Relaxed);
                warn!(message_id, "message exceeded max retries, removing");
            }
            RetryOutcome::Retrying { retry_count } => {
                self.retries.fetch_add(1, Ordering::Relaxed);
                debug!(message_id, retry_count, "retry recorded");
            }
            RetryOutcome::NotPending => {}
        }
        self.persist();
        outcome
    }

    /// Purge and return entries that timed out with no retries left
    pub fn take_exhausted(&self) -> Vec<PendingAck> {
        let now = self.clock.now_ms();
        let timeout = duration_ms(self.config.ack_timeout);

        let mut gone: Vec<PendingAck> = {
            let mut pending = self.pending.write();
            let ids: Vec<u32> = pending
                .values()
                .filter(|p| p.retry_count >= self.config.max_retries)
                .filter(|p| now.saturating_sub(p.sent_at) > timeout)
                .map(|p| p.message_id)
                .collect();
            ids.iter().filter_map(|id| pending.remove(id)).collect()
        };

        if !gone.is_empty() {
            gone.sort_by_key(PendingAck::eviction_key);
            self.exhausted.fetch_add(gone.len() as u64, Ordering::Relaxed);
            for entry in &gone {
                warn!(
                    message_id = entry.message_id,
                    retries = entry.retry_count,
                    "no ACK after final retry"
                );
            }
            self.persist();
        }
        gone
    }

    pub fn is_delivered(&self, message_id: u32) -> bool {
        self.delivered.contains(&message_id.to_string())
    }

    pub fn is_pending(&self, message_id: u32) -> bool {
        self.pending.read().contains_key(&message_id)
    }

    pub fn get(&self, message_id: u32) -> Option<PendingAck> {
        self.pending.read().get(&message_id).cloned()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.read().len()
    }

    /// Stop tracking without counting a delivery
    pub fn forget(&self, message_id: u32) -> bool {
        let removed = self.pending.write().remove(&message_id).is_some();
        if removed {
            debug!(message_id, "pending ACK dropped");
            self.persist();
        }
        removed
    }

    pub fn on_ack_received<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&AckEvent) + Send + Sync + 'static,
    {
        self.ack_listeners.register(handler)
    }

    pub fn remove_listener(&self, token: Subscription) -> bool {
        self.ack_listeners.unregister(token)
    }

    pub fn clear(&self) {
        self.pending.write().clear();
        self.persist();
    }

    pub fn stats(&self) -> TrackerStats {
        TrackerStats {
            pending: self.pending_count(),
            delivered_ids: self.delivered.len(),
            tracked: self.tracked.load(Ordering::Relaxed),
            acked: self.acked.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
        }
    }

    fn persist(&self) {
        let snapshot = {
            let pending = self.pending.read();
            recorder::set_pending_acks(pending.len());
            if self.persistence.is_none() {
                return;
            }
            let mut entries: Vec<PendingAck> = pending.values().cloned().collect();
            entries.sort_by_key(|p| p.seq);
            entries
        };
        if let Some(store) = &self.persistence {
            store.save_pending_acks(&snapshot);
        }
    }
}
