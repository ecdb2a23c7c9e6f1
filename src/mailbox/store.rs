//! Store-and-forward mailbox
//!
//! Messages are queued per destination until delivered, cancelled, evicted
//! or expired. Queues are kept priority sorted; a full queue sheds its
//! least important, oldest tenth before accepting a new message.

use crate::clock::{duration_ms, Clock};
use crate::delivery::DeliveredLog;
use crate::events::{Listeners, Subscription};
use crate::mailbox::types::{
    MailboxConfig, MailboxStats, MessageDelivered, StoreOptions, StoredMessage,
};
use crate::metrics::recorder;
use crate::persistence::{MailboxSnapshot, Persistence};
use crate::protocol::{MessageType, Priority, BROADCAST};
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

pub struct Mailbox {
    config: MailboxConfig,
    queues: RwLock<HashMap<String, Vec<StoredMessage>>>,
    delivered: DeliveredLog,
    clock: Arc<dyn Clock>,
    persistence: Option<Arc<dyn Persistence>>,
    delivered_listeners: Listeners<MessageDelivered>,
    next_seq: AtomicU64,
    stored: AtomicU64,
    delivered_count: AtomicU64,
    evicted: AtomicU64,
    expired: AtomicU64,
    cancelled: AtomicU64,
}

impl Mailbox {
    pub fn new(
        config: MailboxConfig,
        clock: Arc<dyn Clock>,
        delivered: DeliveredLog,
        persistence: Option<Arc<dyn Persistence>>,
    ) -> Self {
        Self {
            config,
            queues: RwLock::new(HashMap::new()),
            delivered,
            clock,
            persistence,
            delivered_listeners: Listeners::new(),
            next_seq: AtomicU64::new(0),
            stored: AtomicU64::new(0),
            delivered_count: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
            expired: AtomicU64::new(0),
            cancelled: AtomicU64::new(0),
        }
    }

    /// Replace the contents with a persisted snapshot, then drop anything
    /// that expired while the node was down. Returns the number expired.
    pub fn restore(&self, snapshot: MailboxSnapshot) -> usize {
        {
            let mut queues = self.queues.write();
            queues.clear();
            for (destination, mut messages) in snapshot {
                messages.sort_by_key(|m| (m.priority, m.seq));
                for message in &mut messages {
                    message.seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
                }
                if !messages.is_empty() {
                    queues.insert(destination, messages);
                }
            }
        }
        let expired = self.cleanup_expired();
        info!(messages = self.len(), expired, "mailbox restored");
        expired
    }

    /// Queue a message for `target_peer_id`. Returns the local id.
    pub fn store_for_peer(
        &self,
        target_peer_id: &str,
        kind: MessageType,
        payload: impl Into<Bytes>,
        options: StoreOptions,
    ) -> String {
        let now = self.clock.now_ms();
        let expiry_ms = duration_ms(options.expiry.unwrap_or(self.config.default_expiry)).max(1);

        let message = StoredMessage {
            id: Uuid::new_v4().to_string(),
            message_id: options.message_id.unwrap_or_else(rand::random::<u32>),
            sender_id: self.config.local_source,
            target_peer_id: target_peer_id.to_string(),
            kind,
            payload: payload.into(),
            priority: options.priority.unwrap_or_else(|| kind.priority()),
            ttl: options.ttl.unwrap_or(self.config.default_ttl),
            created_at: now,
            expires_at: now.saturating_add(expiry_ms),
            retry_count: 0,
            last_attempt_at: None,
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
        };
        let id = message.id.clone();
        let priority = message.priority;

        let evicted = {
            let mut queues = self.queues.write();
            let queue = queues.entry(target_peer_id.to_string()).or_default();

            let evicted = if queue.len() >= self.config.max_per_destination {
                evict_worst(queue)
            } else {
                0
            };

            queue.push(message);
            queue.sort_by_key(|m| m.priority);
            evicted
        };

        if evicted > 0 {
            self.evicted.fetch_add(evicted as u64, Ordering::Relaxed);
            recorder::record_mailbox_evictions(evicted);
            debug!(destination = target_peer_id, count = evicted, "mailbox full, evicted");
        }
        self.stored.fetch_add(1, Ordering::Relaxed);
        recorder::record_message_stored(priority);
        debug!(%id, destination = target_peer_id, ?kind, ?priority, "message stored");

        self.persist();
        id
    }

    pub fn store_for_broadcast(
        &self,
        kind: MessageType,
        payload: impl Into<Bytes>,
        options: StoreOptions,
    ) -> String {
        self.store_for_peer(BROADCAST, kind, payload, options)
    }

    /// Live messages addressed to `peer_id` or to everyone, priority sorted
    pub fn get_messages_for_peer(&self, peer_id: &str) -> Vec<StoredMessage> {
        let now = self.clock.now_ms();
        let queues = self.queues.read();

        let mut messages: Vec<StoredMessage> = queues
            .get(peer_id)
            .into_iter()
            .chain(queues.get(BROADCAST).filter(|_| peer_id != BROADCAST))
            .flatten()
            .filter(|m| !m.is_expired(now))
            .cloned()
            .collect();
        messages.sort_by_key(|m| m.priority);
        messages
    }

    /// Every live message in submission order within each priority
    pub fn get_all_pending(&self) -> Vec<StoredMessage> {
        let now = self.clock.now_ms();
        let mut messages: Vec<StoredMessage> = self
            .queues
            .read()
            .values()
            .flatten()
            .filter(|m| !m.is_expired(now))
            .cloned()
            .collect();
        messages.sort_by_key(|m| (m.priority, m.seq));
        messages
    }

    pub fn get_critical_messages(&self) -> Vec<StoredMessage> {
        self.get_all_pending()
            .into_iter()
            .filter(|m| m.priority == Priority::Critical)
            .collect()
    }

    /// Live messages that have never been handed to the transport
    pub fn get_unsent(&self) -> Vec<StoredMessage> {
        self.get_all_pending()
            .into_iter()
            .filter(|m| !m.is_attempted())
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<StoredMessage> {
        self.queues
            .read()
            .values()
            .flatten()
            .find(|m| m.id == id)
            .cloned()
    }

    pub fn find_by_message_id(&self, message_id: u32) -> Option<StoredMessage> {
        self.queues
            .read()
            .values()
            .flatten()
            .find(|m| m.message_id == message_id)
            .cloned()
    }

    /// Remove a delivered message and notify listeners. Returns `false` if
    /// the id was neither queued for `peer_id` nor newly logged.
    pub fn mark_delivered(&self, id: &str, peer_id: &str) -> bool {
        let removed = {
            let mut queues = self.queues.write();
            let removed = queues
                .get_mut(peer_id)
                .map(|queue| {
                    let before = queue.len();
                    queue.retain(|m| m.id != id);
                    queue.len() != before
                })
                .unwrap_or(false);
            if queues.get(peer_id).is_some_and(Vec::is_empty) {
                queues.remove(peer_id);
            }
            removed
        };

        if removed {
            self.persist();
        }
        let newly_logged = self.delivered.record(id);
        if !removed && !newly_logged {
            return false;
        }

        self.delivered_count.fetch_add(1, Ordering::Relaxed);
        debug!(id, peer = peer_id, "message delivered");
        self.delivered_listeners.emit(&MessageDelivered {
            id: id.to_string(),
            peer_id: peer_id.to_string(),
        });
        true
    }

    /// Withdraw a message that is still queued
    pub fn cancel(&self, id: &str) -> bool {
        let removed = self.remove_where(|m| m.id == id);
        if removed > 0 {
            self.cancelled.fetch_add(1, Ordering::Relaxed);
            debug!(id, "message cancelled");
            self.persist();
        }
        removed > 0
    }

    /// Note a transmission attempt. Returns the new attempt count.
    pub fn record_attempt(&self, id: &str) -> Option<u32> {
        let now = self.clock.now_ms();
        let count = {
            let mut queues = self.queues.write();
            let message = queues.values_mut().flatten().find(|m| m.id == id)?;
            message.retry_count += 1;
            message.last_attempt_at = Some(now);
            message.retry_count
        };
        self.persist();
        Some(count)
    }

    /// Drop expired messages. Returns how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let removed = self.remove_where(|m| m.is_expired(now));
        if removed > 0 {
            self.expired.fetch_add(removed as u64, Ordering::Relaxed);
            recorder::record_messages_expired(removed);
            info!(count = removed, "cleaned expired messages");
            self.persist();
        }
        removed
    }

    pub fn is_delivered(&self, id: &str) -> bool {
        self.delivered.contains(id)
    }

    pub fn on_message_delivered<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&MessageDelivered) + Send + Sync + 'static,
    {
        self.delivered_listeners.register(handler)
    }

    pub fn remove_listener(&self, token: Subscription) -> bool {
        self.delivered_listeners.unregister(token)
    }

    pub fn len(&self) -> usize {
        self.queues.read().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn queue_len(&self, destination: &str) -> usize {
        self.queues.read().get(destination).map_or(0, Vec::len)
    }

    pub fn clear_all(&self) {
        self.queues.write().clear();
        self.persist();
        info!("mailbox cleared");
    }

    pub fn stats(&self) -> MailboxStats {
        let queues = self.queues.read();
        MailboxStats {
            total_messages: queues.values().map(Vec::len).sum(),
            destinations: queues.len(),
            stored: self.stored.load(Ordering::Relaxed),
            delivered: self.delivered_count.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
        }
    }

    fn remove_where(&self, pred: impl Fn(&StoredMessage) -> bool) -> usize {
        let mut queues = self.queues.write();
        let mut removed = 0;
        for queue in queues.values_mut() {
            let before = queue.len();
            queue.retain(|m| !pred(m));
            removed += before - queue.len();
        }
        queues.retain(|_, queue| !queue.is_empty());
        removed
    }

    fn persist(&self) {
        let snapshot = {
            let queues = self.queues.read();
            recorder::set_mailbox_depth(queues.values().map(Vec::len).sum());
            if self.persistence.is_none() {
                return;
            }
            queues.clone()
        };
        if let Some(store) = &self.persistence {
            store.save_mailbox(&snapshot);
        }
    }
}

/// Drop the worst tenth (at least one) of a full queue: least important
/// first, oldest first within a priority.
fn evict_worst(queue: &mut Vec<StoredMessage>) -> usize {
    queue.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then(a.created_at.cmp(&b.created_at))
            .then(a.seq.cmp(&b.seq))
    });
    let count = (queue.len() / 10).max(1).min(queue.len());
    queue.drain(..count);
    count
}
