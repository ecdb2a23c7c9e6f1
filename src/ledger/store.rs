//! Message ledger
//!
//! Externally visible status of every message this node sent or heard,
//! plus at-most-once admission per `(source, message_id)`. Outgoing messages
//! sit in the outgoing queue until delivered or failed; failed ones are kept
//! until the user retries them.

use crate::clock::Clock;
use crate::dedup::{MessageKey, RecentSet};
use crate::delivery::{AckEvent, DeliveryTracker};
use crate::events::{Listeners, Subscription};
use crate::ledger::error::{LedgerError, LedgerResult};
use crate::ledger::types::{
    DeliveryState, Direction, LedgerMessage, LedgerStats, StatusChange, HISTORY_CAPACITY,
    SEEN_CAPACITY,
};
use crate::protocol::AckType;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

/// Keys in insertion order with O(log n) removal
#[derive(Default)]
struct KeyQueue {
    next: u64,
    by_seq: BTreeMap<u64, MessageKey>,
    index: HashMap<MessageKey, u64>,
}

impl KeyQueue {
    fn push(&mut self, key: MessageKey) {
        if self.index.contains_key(&key) {
            return;
        }
        let seq = self.next;
        self.next += 1;
        self.by_seq.insert(seq, key);
        self.index.insert(key, seq);
    }

    fn remove(&mut self, key: &MessageKey) -> bool {
        match self.index.remove(key) {
            Some(seq) => {
                self.by_seq.remove(&seq);
                true
            }
            None => false,
        }
    }

    fn contains(&self, key: &MessageKey) -> bool {
        self.index.contains_key(key)
    }

    fn len(&self) -> usize {
        self.index.len()
    }

    fn iter(&self) -> impl Iterator<Item = &MessageKey> {
        self.by_seq.values()
    }
}

#[derive(Default)]
struct LedgerState {
    messages: HashMap<MessageKey, LedgerMessage>,
    /// Admission order over every retained message
    admitted: KeyQueue,
    /// Settled messages (incoming, delivered, released), oldest first.
    /// Only these are pruned; each key enters once.
    settled: VecDeque<MessageKey>,
    outgoing: KeyQueue,
    failed: KeyQueue,
}

impl LedgerState {
    fn settle(&mut self, key: MessageKey, capacity: usize) {
        self.settled.push_back(key);
        self.prune(capacity);
    }

    fn prune(&mut self, capacity: usize) {
        while self.messages.len() > capacity {
            let Some(key) = self.settled.pop_front() else {
                break;
            };
            self.messages.remove(&key);
            self.admitted.remove(&key);
        }
    }
}

pub struct MessageLedger {
    /// Source hash of this node; ACKs only carry a message id
    local_source: u32,
    history_capacity: usize,
    clock: Arc<dyn Clock>,
    seen: Mutex<RecentSet<MessageKey>>,
    state: RwLock<LedgerState>,
    status_listeners: Listeners<StatusChange>,
    duplicates: AtomicU64,
}

impl MessageLedger {
    pub fn new(local_source: u32, clock: Arc<dyn Clock>) -> Self {
        Self::with_capacity(local_source, clock, SEEN_CAPACITY, HISTORY_CAPACITY)
    }

    pub fn with_capacity(
        local_source: u32,
        clock: Arc<dyn Clock>,
        seen_capacity: usize,
        history_capacity: usize,
    ) -> Self {
        Self {
            local_source,
            history_capacity: history_capacity.max(1),
            clock,
            seen: Mutex::new(RecentSet::new(seen_capacity)),
            state: RwLock::new(LedgerState::default()),
            status_listeners: Listeners::new(),
            duplicates: AtomicU64::new(0),
        }
    }

    /// Follow ACK events from `tracker`. The subscription holds only a weak
    /// reference to the ledger.
    pub fn attach(self: &Arc<Self>, tracker: &DeliveryTracker) -> Subscription {
        let ledger: Weak<MessageLedger> = Arc::downgrade(self);
        tracker.on_ack_received(move |event| {
            if let Some(ledger) = ledger.upgrade() {
                ledger.apply_ack(event);
            }
        })
    }

    /// Admit a message. Returns `false` if its key was already seen.
    pub fn add_message(&self, message: LedgerMessage) -> bool {
        if !self.record_seen(message.key) {
            self.duplicates.fetch_add(1, Ordering::Relaxed);
            debug!(key = %message.key, "duplicate message rejected");
            return false;
        }

        let mut state = self.state.write();
        let key = message.key;
        let queued =
            message.direction == Direction::Outgoing && message.status == DeliveryState::Pending;
        state.admitted.push(key);
        state.messages.insert(key, message);
        if queued {
            state.outgoing.push(key);
        } else {
            state.settle(key, self.history_capacity);
        }
        true
    }

    /// Take a sent message that expects no ACK off the outgoing queue. Its
    /// status stays `Sent` and it becomes eligible for history pruning.
    pub fn release(&self, key: MessageKey) -> bool {
        let mut state = self.state.write();
        if !state.outgoing.remove(&key) {
            return false;
        }
        state.settle(key, self.history_capacity);
        true
    }

    /// Returns `true` the first time a key is seen
    pub fn record_seen(&self, key: MessageKey) -> bool {
        self.seen.lock().insert(key)
    }

    pub fn has_seen(&self, key: &MessageKey) -> bool {
        self.seen.lock().contains(key)
    }

    /// Move a message along its lifecycle. Delivery states are refused here;
    /// they only come from acknowledgments. Returns the previous state.
    pub fn update_status(&self, key: MessageKey, next: DeliveryState) -> LedgerResult<DeliveryState> {
        if next.is_delivered() {
            return Err(LedgerError::AckOnly(next));
        }
        if next == DeliveryState::Failed {
            let previous = self.status(&key).ok_or(LedgerError::NotFound(key))?;
            self.move_to_failed(key)?;
            return Ok(previous);
        }
        self.transition(key, next)
    }

    /// Give up on an outgoing message; it stays in the failed queue
    pub fn move_to_failed(&self, key: MessageKey) -> LedgerResult<()> {
        let change = {
            let mut state = self.state.write();
            if !state.outgoing.contains(&key) {
                return Err(LedgerError::NotOutgoing(key));
            }
            let message = state
                .messages
                .get_mut(&key)
                .ok_or(LedgerError::NotFound(key))?;

            let from = message.status;
            if !from.can_transition_to(DeliveryState::Failed) {
                return Err(LedgerError::InvalidTransition {
                    key,
                    from,
                    to: DeliveryState::Failed,
                });
            }
            message.status = DeliveryState::Failed;

            state.outgoing.remove(&key);
            state.failed.push(key);
            StatusChange {
                key,
                from,
                to: DeliveryState::Failed,
            }
        };

        debug!(%key, "message moved to failed queue");
        self.status_listeners.emit(&change);
        Ok(())
    }

    /// Requeue a failed message as pending
    pub fn retry_message(&self, key: MessageKey) -> LedgerResult<LedgerMessage> {
        let now = self.clock.now_ms();
        let (message, change) = {
            let mut state = self.state.write();
            if !state.failed.contains(&key) {
                return Err(LedgerError::NotFailed(key));
            }
            let message = state
                .messages
                .get_mut(&key)
                .ok_or(LedgerError::NotFound(key))?;

            let from = message.status;
            message.status = DeliveryState::Pending;
            message.retry_count += 1;
            message.last_retry_at = Some(now);
            let snapshot = message.clone();

            state.failed.remove(&key);
            state.outgoing.push(key);
            (
                snapshot,
                StatusChange {
                    key,
                    from,
                    to: DeliveryState::Pending,
                },
            )
        };

        debug!(%key, retry_count = message.retry_count, "message requeued");
        self.status_listeners.emit(&change);
        Ok(message)
    }

    /// Record an ACK from `receiver`. Repeated ACKs only add the receiver.
    pub(crate) fn mark_delivered(&self, key: MessageKey, receiver: u32) -> LedgerResult<()> {
        self.acknowledge(key, receiver, DeliveryState::Delivered)
    }

    pub(crate) fn mark_read(&self, key: MessageKey, receiver: u32) -> LedgerResult<()> {
        self.acknowledge(key, receiver, DeliveryState::Read)
    }

    fn apply_ack(&self, event: &AckEvent) {
        let key = MessageKey::new(self.local_source, event.message_id);
        let result = match event.ack_type {
            AckType::Received | AckType::Delivered => self.mark_delivered(key, event.receiver_hash),
            AckType::Read => self.mark_read(key, event.receiver_hash),
        };
        if let Err(e) = result {
            debug!(%key, error = %e, "ACK not applied to ledger");
        }
    }

    fn acknowledge(&self, key: MessageKey, receiver: u32, to: DeliveryState) -> LedgerResult<()> {
        let change = {
            let mut state = self.state.write();
            let message = state
                .messages
                .get_mut(&key)
                .ok_or(LedgerError::NotFound(key))?;

            if !message.acks.contains(&receiver) {
                message.acks.push(receiver);
            }

            let from = message.status;
            // A late "delivered" after "read" keeps the stronger state
            if from == DeliveryState::Read || from == to {
                None
            } else if from.can_transition_to(to) {
                message.status = to;
                if state.outgoing.remove(&key) {
                    state.settle(key, self.history_capacity);
                }
                Some(StatusChange { key, from, to })
            } else {
                return Err(LedgerError::InvalidTransition { key, from, to });
            }
        };

        if let Some(change) = change {
            self.status_listeners.emit(&change);
        }
        Ok(())
    }

    fn transition(&self, key: MessageKey, to: DeliveryState) -> LedgerResult<DeliveryState> {
        let change = {
            let mut state = self.state.write();
            let message = state
                .messages
                .get_mut(&key)
                .ok_or(LedgerError::NotFound(key))?;

            let from = message.status;
            if !from.can_transition_to(to) {
                return Err(LedgerError::InvalidTransition { key, from, to });
            }
            if from == to {
                return Ok(from);
            }
            message.status = to;
            StatusChange { key, from, to }
        };

        let from = change.from;
        self.status_listeners.emit(&change);
        Ok(from)
    }

    pub fn get(&self, key: &MessageKey) -> Option<LedgerMessage> {
        self.state.read().messages.get(key).cloned()
    }

    pub fn status(&self, key: &MessageKey) -> Option<DeliveryState> {
        self.state.read().messages.get(key).map(|m| m.status)
    }

    /// Outgoing queue in submission order
    pub fn outgoing(&self) -> Vec<LedgerMessage> {
        let state = self.state.read();
        state
            .outgoing
            .iter()
            .filter_map(|k| state.messages.get(k).cloned())
            .collect()
    }

    pub fn failed(&self) -> Vec<LedgerMessage> {
        let state = self.state.read();
        state
            .failed
            .iter()
            .filter_map(|k| state.messages.get(k).cloned())
            .collect()
    }

    /// All retained messages, oldest first
    pub fn messages(&self) -> Vec<LedgerMessage> {
        let state = self.state.read();
        state
            .admitted
            .iter()
            .filter_map(|k| state.messages.get(k).cloned())
            .collect()
    }

    pub fn on_status_changed<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&StatusChange) + Send + Sync + 'static,
    {
        self.status_listeners.register(handler)
    }

    pub fn remove_listener(&self, token: Subscription) -> bool {
        self.status_listeners.unregister(token)
    }

    /// Drop all messages. The seen set is kept so old floods stay rejected.
    pub fn clear(&self) {
        *self.state.write() = LedgerState::default();
    }

    pub fn stats(&self) -> LedgerStats {
        let state = self.state.read();
        LedgerStats {
            total_messages: state.messages.len(),
            outgoing: state.outgoing.len(),
            failed: state.failed.len(),
            seen_ids: self.seen.lock().len(),
            duplicates_rejected: self.duplicates.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::delivery::{DeliveredLog, TrackerConfig};
    use crate::protocol::{MessageType, Priority};
    use bytes::Bytes;
    use std::time::Duration;

    const LOCAL: u32 = 0xAAAA;

    fn ledger() -> (Arc<MessageLedger>, Arc<ManualClock>) {
        let clock = ManualClock::new(5_000);
        (Arc::new(MessageLedger::new(LOCAL, clock.clone())), clock)
    }

    fn outgoing(id: u32) -> LedgerMessage {
        LedgerMessage::outgoing(
            MessageKey::new(LOCAL, id),
            MessageType::Text,
            "bob",
            Bytes::from_static(b"hi"),
            Priority::Normal,
            0,
        )
    }

    #[test]
    fn test_duplicate_admission_is_noop() {
        let (ledger, _) = ledger();
        assert!(ledger.add_message(outgoing(1)));

        let mut again = outgoing(1);
        again.payload = Bytes::from_static(b"changed");
        assert!(!ledger.add_message(again));

        assert_eq!(ledger.messages().len(), 1);
        assert_eq!(&ledger.get(&MessageKey::new(LOCAL, 1)).unwrap().payload[..], b"hi");
        assert_eq!(ledger.stats().duplicates_rejected, 1);
    }

    #[test]
    fn test_same_id_from_different_sources_is_distinct() {
        let (ledger, _) = ledger();
        let a = LedgerMessage::incoming(MessageKey::new(1, 9), MessageType::Text, Bytes::new(), 0, None);
        let b = LedgerMessage::incoming(MessageKey::new(2, 9), MessageType::Text, Bytes::new(), 0, None);
        assert!(ledger.add_message(a));
        assert!(ledger.add_message(b));
    }

    #[test]
    fn test_seen_set_forgets_oldest() {
        let clock = ManualClock::new(0);
        let ledger = MessageLedger::with_capacity(LOCAL, clock, 3, 10);
        for id in 0..4 {
            ledger.record_seen(MessageKey::new(1, id));
        }
        assert!(!ledger.has_seen(&MessageKey::new(1, 0)));
        assert!(ledger.record_seen(MessageKey::new(1, 0)));
    }

    #[test]
    fn test_happy_path_through_ack() {
        let (ledger, clock) = ledger();
        let tracker = DeliveryTracker::new(
            TrackerConfig::default(),
            clock.clone(),
            DeliveredLog::new(100, None),
            None,
        );
        ledger.attach(&tracker);

        let key = MessageKey::new(LOCAL, 1);
        ledger.add_message(outgoing(1));
        ledger.update_status(key, DeliveryState::Sending).unwrap();
        ledger.update_status(key, DeliveryState::Sent).unwrap();

        tracker.track_for_ack(1, "bob", Bytes::new(), Priority::Normal);
        tracker.process_ack(1, AckType::Received, 0xB0B);

        let msg = ledger.get(&key).unwrap();
        assert_eq!(msg.status, DeliveryState::Delivered);
        assert_eq!(msg.acks, vec![0xB0B]);
        assert!(ledger.outgoing().is_empty());
    }

    #[test]
    fn test_read_ack_and_late_delivered() {
        let (ledger, _) = ledger();
        let key = MessageKey::new(LOCAL, 1);
        ledger.add_message(outgoing(1));

        ledger.mark_read(key, 1).unwrap();
        ledger.mark_delivered(key, 2).unwrap();

        let msg = ledger.get(&key).unwrap();
        assert_eq!(msg.status, DeliveryState::Read);
        assert_eq!(msg.acks, vec![1, 2]);
    }

    #[test]
    fn test_delivery_states_need_an_ack() {
        let (ledger, _) = ledger();
        let key = MessageKey::new(LOCAL, 1);
        ledger.add_message(outgoing(1));

        assert_eq!(
            ledger.update_status(key, DeliveryState::Delivered),
            Err(LedgerError::AckOnly(DeliveryState::Delivered))
        );
        assert_eq!(ledger.status(&key), Some(DeliveryState::Pending));
    }

    #[test]
    fn test_backwards_transition_rejected() {
        let (ledger, _) = ledger();
        let key = MessageKey::new(LOCAL, 1);
        ledger.add_message(outgoing(1));
        ledger.update_status(key, DeliveryState::Sent).unwrap();

        let err = ledger.update_status(key, DeliveryState::Sending).unwrap_err();
        assert_eq!(
            err,
            LedgerError::InvalidTransition {
                key,
                from: DeliveryState::Sent,
                to: DeliveryState::Sending
            }
        );
        // Same state is fine
        assert_eq!(ledger.update_status(key, DeliveryState::Sent), Ok(DeliveryState::Sent));
    }

    #[test]
    fn test_fail_and_retry() {
        let (ledger, clock) = ledger();
        let key = MessageKey::new(LOCAL, 1);
        ledger.add_message(outgoing(1));
        ledger.update_status(key, DeliveryState::Sent).unwrap();

        ledger.move_to_failed(key).unwrap();
        assert!(ledger.outgoing().is_empty());
        assert_eq!(ledger.failed().len(), 1);
        assert_eq!(
            ledger.update_status(key, DeliveryState::Sending),
            Err(LedgerError::InvalidTransition {
                key,
                from: DeliveryState::Failed,
                to: DeliveryState::Sending
            })
        );

        clock.advance(Duration::from_secs(30));
        let retried = ledger.retry_message(key).unwrap();
        assert_eq!(retried.status, DeliveryState::Pending);
        assert_eq!(retried.retry_count, 1);
        assert_eq!(retried.last_retry_at, Some(clock.now_ms()));
        assert!(ledger.failed().is_empty());
        assert_eq!(ledger.outgoing().len(), 1);

        assert_eq!(ledger.retry_message(key), Err(LedgerError::NotFailed(key)));
    }

    #[test]
    fn test_delivered_message_cannot_fail() {
        let (ledger, _) = ledger();
        let key = MessageKey::new(LOCAL, 1);
        ledger.add_message(outgoing(1));
        ledger.mark_delivered(key, 7).unwrap();

        assert_eq!(ledger.move_to_failed(key), Err(LedgerError::NotOutgoing(key)));
    }

    #[test]
    fn test_status_listener_sees_changes() {
        let (ledger, _) = ledger();
        let changes = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = changes.clone();
        ledger.on_status_changed(move |c| sink.lock().push((c.from, c.to)));

        let key = MessageKey::new(LOCAL, 1);
        ledger.add_message(outgoing(1));
        ledger.update_status(key, DeliveryState::Sending).unwrap();
        ledger.update_status(key, DeliveryState::Sending).unwrap();
        ledger.update_status(key, DeliveryState::Failed).unwrap();

        assert_eq!(
            *changes.lock(),
            vec![
                (DeliveryState::Pending, DeliveryState::Sending),
                (DeliveryState::Sending, DeliveryState::Failed)
            ]
        );
    }

    #[test]
    fn test_history_is_pruned_but_queues_kept() {
        let clock = ManualClock::new(0);
        let ledger = MessageLedger::with_capacity(LOCAL, clock, 100, 3);
        ledger.add_message(outgoing(1));
        for id in 10..15 {
            ledger.add_message(LedgerMessage::incoming(
                MessageKey::new(2, id),
                MessageType::Text,
                Bytes::new(),
                0,
                None,
            ));
        }

        assert_eq!(ledger.messages().len(), 3);
        assert!(ledger.get(&MessageKey::new(LOCAL, 1)).is_some());
        assert!(ledger.get(&MessageKey::new(2, 14)).is_some());
    }

    #[test]
    fn test_released_messages_become_prunable() {
        let clock = ManualClock::new(0);
        let ledger = MessageLedger::with_capacity(LOCAL, clock, 100, 2);
        for id in 1..=4 {
            let key = MessageKey::new(LOCAL, id);
            ledger.add_message(outgoing(id));
            ledger.update_status(key, DeliveryState::Sent).unwrap();
            assert!(ledger.release(key));
            assert!(!ledger.release(key));
        }

        let kept: Vec<u32> = ledger.messages().iter().map(|m| m.key.message_id).collect();
        assert_eq!(kept, vec![3, 4]);
        assert_eq!(ledger.stats().outgoing, 0);
        assert_eq!(ledger.status(&MessageKey::new(LOCAL, 4)), Some(DeliveryState::Sent));
        // Off the outgoing queue, so it can no longer fail
        assert_eq!(
            ledger.move_to_failed(MessageKey::new(LOCAL, 4)),
            Err(LedgerError::NotOutgoing(MessageKey::new(LOCAL, 4)))
        );
    }
}
