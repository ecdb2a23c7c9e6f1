//! Mesh node
//!
//! Wires the mailbox, delivery tracker, relay scheduler and ledger to a
//! transport. Three entry points drive it: producer calls
//! ([`MeshNode::send_to_peer`], [`MeshNode::broadcast`]), inbound frames
//! ([`MeshNode::handle_frame`]) and the periodic [`MeshNode::tick`].

use crate::clock::{duration_ms, Clock, Millis, SystemClock};
use crate::dedup::MessageKey;
use crate::delivery::{AckEvent, DeliveredLog, DeliveryTracker, RetryOutcome};
use crate::events::{Listeners, Subscription};
use crate::ledger::{DeliveryState, LedgerMessage, MessageLedger, StatusChange};
use crate::mailbox::{Mailbox, MessageDelivered, StoreOptions, StoredMessage};
use crate::metrics::recorder;
use crate::network::{AirtimeLimiter, InboundFrame, Transport};
use crate::node::config::MeshConfig;
use crate::node::error::{NodeError, NodeResult};
use crate::node::types::{DeliveryFailed, Neighbor, NodeStats, QueuedRelay, Received, TickReport};
use crate::persistence::{PersistedState, Persistence};
use crate::protocol::{
    ack_frame, hash_source, AckPayload, MessageType, Packet, PacketCodec, Priority, SosPayload,
    StoreRequestPayload, WirePayload, BROADCAST,
};
use crate::relay::{RelayScheduler, RouteHint};
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

const HEARTBEAT_PAYLOAD: &[u8] = b"PING";

#[derive(Default)]
struct NodeCounters {
    frames_sent: AtomicU64,
    frames_received: AtomicU64,
    malformed: AtomicU64,
    duplicates: AtomicU64,
    relayed: AtomicU64,
    send_failures: AtomicU64,
    airtime_deferred: AtomicU64,
}

pub struct MeshNode {
    config: MeshConfig,
    local_source: u32,
    clock: Arc<dyn Clock>,
    transport: Arc<dyn Transport>,
    airtime: AirtimeLimiter,
    mailbox: Arc<Mailbox>,
    tracker: Arc<DeliveryTracker>,
    relay: RelayScheduler,
    ledger: Arc<MessageLedger>,
    neighbors: RwLock<HashMap<u32, Neighbor>>,
    /// Relays waiting for their delay, ordered by due time
    relay_queue: Mutex<Vec<QueuedRelay>>,
    last_heartbeat: Mutex<Option<Millis>>,
    received_listeners: Listeners<LedgerMessage>,
    failed_listeners: Listeners<DeliveryFailed>,
    counters: NodeCounters,
}

impl MeshNode {
    pub fn builder(config: MeshConfig) -> MeshNodeBuilder {
        MeshNodeBuilder::new(config)
    }

    pub fn config(&self) -> &MeshConfig {
        &self.config
    }

    /// Wire source id of this device
    pub fn local_source(&self) -> u32 {
        self.local_source
    }

    pub fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    pub fn tracker(&self) -> &DeliveryTracker {
        &self.tracker
    }

    pub fn relay(&self) -> &RelayScheduler {
        &self.relay
    }

    pub fn ledger(&self) -> &MessageLedger {
        &self.ledger
    }

    /// Queue a message for `peer_id` and try to send it right away.
    /// Returns the mailbox id.
    pub fn send_to_peer(
        &self,
        peer_id: &str,
        kind: MessageType,
        payload: impl Into<Bytes>,
        options: StoreOptions,
    ) -> String {
        let id = self.mailbox.store_for_peer(peer_id, kind, payload, options);
        if let Some(stored) = self.mailbox.get(&id) {
            let message = LedgerMessage::outgoing(
                self.key_for(stored.message_id),
                stored.kind,
                peer_id,
                stored.payload.clone(),
                stored.priority,
                stored.created_at,
            )
            .with_local_id(id.clone());
            self.ledger.add_message(message);
            self.transmit_stored(&stored);
        }
        id
    }

    pub fn broadcast(&self, kind: MessageType, payload: impl Into<Bytes>, options: StoreOptions) -> String {
        self.send_to_peer(BROADCAST, kind, payload, options)
    }

    pub fn send_text(&self, peer_id: &str, text: &str) -> String {
        self.send_to_peer(
            peer_id,
            MessageType::Text,
            Bytes::copy_from_slice(text.as_bytes()),
            StoreOptions::default(),
        )
    }

    pub fn send_sos(&self, sos: &SosPayload) -> String {
        self.broadcast(MessageType::Sos, sos.to_bytes(), StoreOptions::default())
    }

    /// Ask neighbors to flush anything they hold for this device
    pub fn request_stored(&self, last_known_message_id: u32) -> NodeResult<()> {
        let payload = StoreRequestPayload {
            target_hash: self.local_source,
            last_known_message_id,
        };
        let frame = PacketCodec::encode(
            MessageType::StoreRequest,
            self.local_source,
            &payload.to_bytes(),
            self.config.default_ttl,
            self.config.q_score,
            None,
        );
        self.send_frame(frame, MessageType::StoreRequest)
    }

    /// Withdraw a message that is still in the mailbox. The ledger keeps it
    /// in the failed queue so it can be retried.
    pub fn cancel(&self, id: &str) -> NodeResult<()> {
        let stored = self
            .mailbox
            .get(id)
            .ok_or_else(|| NodeError::NotQueued(id.to_string()))?;
        self.mailbox.cancel(id);
        self.tracker.forget(stored.message_id);

        let key = self.key_for(stored.message_id);
        if let Err(e) = self.ledger.move_to_failed(key) {
            debug!(%key, error = %e, "cancelled message not moved to failed");
        }
        Ok(())
    }

    /// Requeue a failed message under its original wire id
    pub fn retry_failed(&self, key: MessageKey) -> NodeResult<String> {
        let message = self.ledger.retry_message(key)?;
        let options = StoreOptions::default()
            .with_priority(message.priority)
            .with_message_id(key.message_id);
        let id = self.mailbox.store_for_peer(
            &message.target_peer_id,
            message.kind,
            message.payload.clone(),
            options,
        );
        if let Some(stored) = self.mailbox.get(&id) {
            self.transmit_stored(&stored);
        }
        Ok(id)
    }

    /// Receive path for one frame from the radio
    pub fn handle_frame(&self, frame: InboundFrame) -> Received {
        self.counters.frames_received.fetch_add(1, Ordering::Relaxed);

        let Some(packet) = PacketCodec::decode_with_rssi(&frame.bytes, frame.rssi) else {
            self.counters.malformed.fetch_add(1, Ordering::Relaxed);
            recorder::record_packet_malformed();
            debug!(len = frame.bytes.len(), "malformed frame dropped");
            return Received::Malformed;
        };
        recorder::record_packet_received(packet.kind());

        if packet.header.source_hash == self.local_source {
            self.ledger.record_seen(packet.key());
            return Received::OwnEcho;
        }

        let is_new = self.observe_source(&packet);
        let outcome = self.process(&packet);
        if is_new {
            self.flush_for(packet.header.source_hash);
        }
        outcome
    }

    fn process(&self, packet: &Packet) -> Received {
        let kind = packet.kind();
        let key = packet.key();
        let novel = match kind {
            MessageType::Ack | MessageType::Ping => self.ledger.record_seen(key),
            _ => self.ledger.add_message(
                LedgerMessage::incoming(
                    key,
                    kind,
                    packet.payload.clone(),
                    self.clock.now_ms(),
                    packet.rssi,
                )
                .with_hop_ttl(packet.header.ttl),
            ),
        };
        if !novel {
            self.counters.duplicates.fetch_add(1, Ordering::Relaxed);
            recorder::record_packet_duplicate();
            // Relayed copies arrive with less TTL than the first one. A copy
            // at least as fresh is the sender retrying, so our ACK was lost.
            if packet.requires_ack() && self.is_resend(&key, packet.header.ttl) {
                self.acknowledge(packet);
            }
            return Received::Duplicate;
        }

        let outcome = match kind {
            MessageType::Ack => {
                let matched = AckPayload::parse(&packet.payload).is_some_and(|ack| {
                    self.tracker
                        .process_ack(ack.original_message_id, ack.ack_type, ack.receiver_hash)
                });
                Received::Ack { matched }
            }
            MessageType::Ping => Received::Heartbeat,
            _ => {
                if let Some(message) = self.ledger.get(&key) {
                    self.received_listeners.emit(&message);
                }
                if packet.requires_ack() {
                    self.acknowledge(packet);
                }
                if kind == MessageType::StoreRequest {
                    if let Some(request) = StoreRequestPayload::parse(&packet.payload) {
                        self.flush_for(request.target_hash);
                    }
                }
                Received::Message(key)
            }
        };

        self.schedule_relay(packet);
        self.flush_relays();
        outcome
    }

    /// Periodic maintenance: age neighbors, expire, retry, fail, flush
    pub fn tick(&self) -> TickReport {
        let mut report = TickReport {
            neighbors_lost: self.prune_neighbors(),
            expired: self.mailbox.cleanup_expired(),
            ..TickReport::default()
        };

        for pending in self.tracker.get_messages_needing_retry() {
            if pending.priority != Priority::Critical && !self.airtime.try_acquire() {
                self.counters.airtime_deferred.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            if let Err(e) = self.transport.send(pending.original_payload.clone()) {
                self.counters.send_failures.fetch_add(1, Ordering::Relaxed);
                warn!(message_id = pending.message_id, error = %e, "retransmission failed");
                continue;
            }
            self.counters.frames_sent.fetch_add(1, Ordering::Relaxed);

            match self.tracker.increment_retry(pending.message_id) {
                RetryOutcome::Retrying { retry_count } => {
                    report.retransmitted += 1;
                    recorder::record_retransmission(pending.priority);
                    if let Some(stored) = self.mailbox.find_by_message_id(pending.message_id) {
                        self.mailbox.record_attempt(&stored.id);
                    }
                    debug!(message_id = pending.message_id, retry_count, "retransmitted");
                }
                RetryOutcome::Exhausted => {
                    self.fail_delivery(pending.message_id, &pending.target_peer_id, pending.retry_count);
                    report.failed += 1;
                }
                RetryOutcome::NotPending => {}
            }
        }

        for exhausted in self.tracker.take_exhausted() {
            self.fail_delivery(
                exhausted.message_id,
                &exhausted.target_peer_id,
                exhausted.retry_count,
            );
            report.failed += 1;
        }

        for message in self.mailbox.get_unsent() {
            if self.transmit_stored(&message) {
                report.sent += 1;
            }
        }

        report.heartbeat = self.maybe_heartbeat();
        report.relayed = self.flush_relays();

        recorder::set_mailbox_depth(self.mailbox.len());
        recorder::set_pending_acks(self.tracker.pending_count());
        report
    }

    /// Send every queued relay whose delay has elapsed
    pub fn flush_relays(&self) -> usize {
        let now = self.clock.now_ms();
        let due: Vec<QueuedRelay> = {
            let mut queue = self.relay_queue.lock();
            let split = queue.partition_point(|r| r.due <= now);
            queue.drain(..split).collect()
        };

        let mut sent = 0;
        let mut deferred = Vec::new();
        for relay in due {
            if relay.priority != Priority::Critical && !self.airtime.try_acquire() {
                self.counters.airtime_deferred.fetch_add(1, Ordering::Relaxed);
                deferred.push(relay);
                continue;
            }
            match self.transport.send(relay.frame.clone()) {
                Ok(()) => {
                    self.relay.record_relay();
                    self.counters.relayed.fetch_add(1, Ordering::Relaxed);
                    self.counters.frames_sent.fetch_add(1, Ordering::Relaxed);
                    debug!(key = %relay.key, "relayed");
                    sent += 1;
                }
                Err(e) => {
                    self.counters.send_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(key = %relay.key, error = %e, "relay send failed");
                }
            }
        }

        if !deferred.is_empty() {
            let mut queue = self.relay_queue.lock();
            for relay in deferred {
                insert_relay(&mut queue, relay);
            }
        }
        sent
    }

    pub fn send_heartbeat(&self) -> NodeResult<()> {
        let frame = PacketCodec::encode(
            MessageType::Ping,
            self.local_source,
            HEARTBEAT_PAYLOAD,
            1,
            self.config.q_score,
            None,
        );
        self.send_frame(frame, MessageType::Ping)?;
        *self.last_heartbeat.lock() = Some(self.clock.now_ms());
        Ok(())
    }

    pub fn neighbors(&self) -> Vec<Neighbor> {
        let mut neighbors: Vec<Neighbor> = self.neighbors.read().values().copied().collect();
        neighbors.sort_by_key(|n| n.source_hash);
        neighbors
    }

    /// Fires when a queued message is acknowledged
    pub fn on_message_delivered<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&MessageDelivered) + Send + Sync + 'static,
    {
        self.mailbox.on_message_delivered(handler)
    }

    pub fn on_ack_received<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&AckEvent) + Send + Sync + 'static,
    {
        self.tracker.on_ack_received(handler)
    }

    /// Fires once per novel inbound message
    pub fn on_message_received<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&LedgerMessage) + Send + Sync + 'static,
    {
        self.received_listeners.register(handler)
    }

    pub fn on_delivery_failed<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&DeliveryFailed) + Send + Sync + 'static,
    {
        self.failed_listeners.register(handler)
    }

    pub fn on_status_changed<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&StatusChange) + Send + Sync + 'static,
    {
        self.ledger.on_status_changed(handler)
    }

    pub fn stats(&self) -> NodeStats {
        let c = &self.counters;
        NodeStats {
            mailbox: self.mailbox.stats(),
            tracker: self.tracker.stats(),
            relay: self.relay.stats(),
            ledger: self.ledger.stats(),
            neighbors: self.neighbors.read().len(),
            queued_relays: self.relay_queue.lock().len(),
            frames_sent: c.frames_sent.load(Ordering::Relaxed),
            frames_received: c.frames_received.load(Ordering::Relaxed),
            malformed: c.malformed.load(Ordering::Relaxed),
            duplicates: c.duplicates.load(Ordering::Relaxed),
            relayed: c.relayed.load(Ordering::Relaxed),
            send_failures: c.send_failures.load(Ordering::Relaxed),
            airtime_deferred: c.airtime_deferred.load(Ordering::Relaxed),
        }
    }

    fn key_for(&self, message_id: u32) -> MessageKey {
        MessageKey::new(self.local_source, message_id)
    }

    /// Hand a mailbox entry to the transport. Returns `true` if it went out.
    fn transmit_stored(&self, message: &StoredMessage) -> bool {
        if message.priority != Priority::Critical && !self.airtime.try_acquire() {
            self.counters.airtime_deferred.fetch_add(1, Ordering::Relaxed);
            debug!(id = %message.id, "airtime exhausted, send deferred");
            return false;
        }

        let key = self.key_for(message.message_id);
        let frame = PacketCodec::encode(
            message.kind,
            self.local_source,
            &message.payload,
            message.ttl,
            self.config.q_score,
            Some(message.message_id),
        );

        if self.ledger.status(&key) == Some(DeliveryState::Pending) {
            self.advance(key, DeliveryState::Sending);
        }
        if let Err(e) = self.transport.send(frame.clone()) {
            self.counters.send_failures.fetch_add(1, Ordering::Relaxed);
            warn!(id = %message.id, error = %e, "send failed, message stays queued");
            return false;
        }
        self.counters.frames_sent.fetch_add(1, Ordering::Relaxed);
        recorder::record_packet_sent(message.kind, frame.len());

        self.mailbox.record_attempt(&message.id);
        self.advance(key, DeliveryState::Sent);

        if message.kind.requires_ack() {
            if !self.tracker.is_pending(message.message_id) {
                self.tracker.track_for_ack(
                    message.message_id,
                    message.target_peer_id.clone(),
                    frame,
                    message.priority,
                );
            }
        } else {
            // Fire-and-forget types are done once on the air
            self.mailbox.mark_delivered(&message.id, &message.target_peer_id);
            self.ledger.release(key);
        }
        true
    }

    fn is_resend(&self, key: &MessageKey, ttl: u8) -> bool {
        self.ledger
            .get(key)
            .and_then(|m| m.hop_ttl)
            .is_some_and(|first| ttl >= first)
    }

    fn advance(&self, key: MessageKey, next: DeliveryState) {
        if let Err(e) = self.ledger.update_status(key, next) {
            debug!(%key, error = %e, "status not advanced");
        }
    }

    fn send_frame(&self, frame: Bytes, kind: MessageType) -> NodeResult<()> {
        let len = frame.len();
        self.transport.send(frame).inspect_err(|_| {
            self.counters.send_failures.fetch_add(1, Ordering::Relaxed);
        })?;
        self.counters.frames_sent.fetch_add(1, Ordering::Relaxed);
        recorder::record_packet_sent(kind, len);
        Ok(())
    }

    fn acknowledge(&self, packet: &Packet) {
        let frame = ack_frame(packet, self.local_source);
        if let Err(e) = self.send_frame(frame, MessageType::Ack) {
            warn!(message_id = packet.header.message_id, error = %e, "ACK send failed");
        }
    }

    fn fail_delivery(&self, message_id: u32, target_peer_id: &str, retries: u32) {
        recorder::record_delivery_failure();
        let key = self.key_for(message_id);
        if let Err(e) = self.ledger.move_to_failed(key) {
            debug!(%key, error = %e, "failed message not in outgoing queue");
        }
        if let Some(stored) = self.mailbox.find_by_message_id(message_id) {
            self.mailbox.cancel(&stored.id);
        }
        warn!(message_id, target = target_peer_id, retries, "delivery failed");
        self.failed_listeners.emit(&DeliveryFailed {
            message_id,
            target_peer_id: target_peer_id.to_string(),
            retries,
        });
    }

    /// Refresh the neighbor table. Returns `true` for a first sighting.
    fn observe_source(&self, packet: &Packet) -> bool {
        let now = self.clock.now_ms();
        let source = packet.header.source_hash;
        let neighbor = Neighbor {
            source_hash: source,
            last_seen: now,
            rssi: packet.rssi,
            q_score: packet.header.q_score,
        };

        let (is_new, count) = {
            let mut neighbors = self.neighbors.write();
            let is_new = neighbors.insert(source, neighbor).is_none();
            (is_new, neighbors.len())
        };
        self.relay.set_reachable_peers(count);
        self.relay.record_route(
            source,
            RouteHint {
                hop_count: self.config.default_ttl.saturating_sub(packet.header.ttl),
                q_score: packet.header.q_score,
                rssi: packet.rssi,
                observed_at: now,
            },
        );

        if is_new {
            info!(source = format_args!("{source:08x}"), rssi = ?packet.rssi, "new neighbor");
        }
        is_new
    }

    /// Store-and-forward: push everything queued for `target`, plus
    /// broadcasts. Entries already awaiting an ACK keep their retry timer.
    fn flush_for(&self, target: u32) -> usize {
        let candidates: Vec<StoredMessage> = self
            .mailbox
            .get_all_pending()
            .into_iter()
            .filter(|m| m.target_peer_id == BROADCAST || hash_source(&m.target_peer_id) == target)
            .collect();

        let mut sent = 0;
        for message in candidates {
            if self.transmit_stored(&message) {
                sent += 1;
            }
        }
        if sent > 0 {
            debug!(target = format_args!("{target:08x}"), sent, "flushed stored messages");
        }
        sent
    }

    fn prune_neighbors(&self) -> usize {
        let cutoff = self
            .clock
            .now_ms()
            .saturating_sub(duration_ms(self.config.peer_timeout()));
        let (lost, count) = {
            let mut neighbors = self.neighbors.write();
            let before = neighbors.len();
            neighbors.retain(|_, n| n.last_seen >= cutoff);
            (before - neighbors.len(), neighbors.len())
        };
        self.relay.set_reachable_peers(count);
        if lost > 0 {
            info!(lost, remaining = count, "neighbors timed out");
        }
        lost
    }

    fn schedule_relay(&self, packet: &Packet) {
        let Some(next) = packet.relayed() else {
            return;
        };
        let decision = self.relay.decide_relay(packet);
        if !decision.should_relay {
            return;
        }
        let relay = QueuedRelay {
            due: self.clock.now_ms() + u64::from(decision.delay_ms),
            key: packet.key(),
            priority: packet.priority(),
            frame: PacketCodec::encode_packet(&next),
        };
        insert_relay(&mut self.relay_queue.lock(), relay);
    }

    fn maybe_heartbeat(&self) -> bool {
        let Some(interval) = self.config.heartbeat_interval() else {
            return false;
        };
        let now = self.clock.now_ms();
        let due = self
            .last_heartbeat
            .lock()
            .map_or(true, |last| now.saturating_sub(last) >= duration_ms(interval));
        if !due {
            return false;
        }
        match self.send_heartbeat() {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "heartbeat failed");
                false
            }
        }
    }
}

fn insert_relay(queue: &mut Vec<QueuedRelay>, relay: QueuedRelay) {
    let at = queue.partition_point(|r| r.due <= relay.due);
    queue.insert(at, relay);
}

/// Assembles a [`MeshNode`] from its collaborators
pub struct MeshNodeBuilder {
    config: MeshConfig,
    clock: Option<Arc<dyn Clock>>,
    transport: Option<Arc<dyn Transport>>,
    persistence: Option<Arc<dyn Persistence>>,
    restore: Option<PersistedState>,
    relay_seed: Option<u64>,
}

impl MeshNodeBuilder {
    pub fn new(config: MeshConfig) -> Self {
        Self {
            config,
            clock: None,
            transport: None,
            persistence: None,
            restore: None,
            relay_seed: None,
        }
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn persistence(mut self, persistence: Arc<dyn Persistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// State loaded from the persistence backend at startup
    pub fn restore(mut self, state: PersistedState) -> Self {
        self.restore = Some(state);
        self
    }

    /// Deterministic relay jitter
    pub fn relay_seed(mut self, seed: u64) -> Self {
        self.relay_seed = Some(seed);
        self
    }

    pub fn build(self) -> NodeResult<Arc<MeshNode>> {
        self.config.validate()?;
        let transport = self.transport.ok_or(NodeError::MissingTransport)?;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let config = self.config;
        let local_source = config.source_hash();

        let delivered = DeliveredLog::new(config.delivered_log_capacity, self.persistence.clone());
        let mailbox = Arc::new(Mailbox::new(
            config.mailbox_config(),
            clock.clone(),
            delivered.clone(),
            self.persistence.clone(),
        ));
        let tracker = Arc::new(DeliveryTracker::new(
            config.tracker_config(),
            clock.clone(),
            delivered.clone(),
            self.persistence.clone(),
        ));
        let relay = match self.relay_seed {
            Some(seed) => RelayScheduler::with_seed(config.relay_config(), clock.clone(), seed),
            None => RelayScheduler::new(config.relay_config(), clock.clone()),
        };
        let ledger = Arc::new(MessageLedger::with_capacity(
            local_source,
            clock.clone(),
            config.seen_capacity,
            config.ledger_history,
        ));

        if let Some(state) = self.restore {
            delivered.restore(state.delivered);
            mailbox.restore(state.mailbox);
            tracker.restore(state.pending_acks);
            readmit_queued(&ledger, &mailbox, local_source);
        }

        ledger.attach(&tracker);
        let acked = mailbox.clone();
        tracker.on_ack_received(move |event| {
            if let Some(stored) = acked.find_by_message_id(event.message_id) {
                acked.mark_delivered(&stored.id, &stored.target_peer_id);
            }
        });

        let airtime = AirtimeLimiter::new(config.airtime_frames_per_second, config.airtime_burst);
        info!(
            device = %config.device_id,
            source = format_args!("{local_source:08x}"),
            queued = mailbox.len(),
            pending_acks = tracker.pending_count(),
            "mesh node ready"
        );

        Ok(Arc::new(MeshNode {
            config,
            local_source,
            clock,
            transport,
            airtime,
            mailbox,
            tracker,
            relay,
            ledger,
            neighbors: RwLock::new(HashMap::new()),
            relay_queue: Mutex::new(Vec::new()),
            last_heartbeat: Mutex::new(None),
            received_listeners: Listeners::new(),
            failed_listeners: Listeners::new(),
            counters: NodeCounters::default(),
        }))
    }
}

/// Ledger state is not persisted; rebuild the outgoing queue from the mailbox
fn readmit_queued(ledger: &MessageLedger, mailbox: &Mailbox, local_source: u32) {
    for stored in mailbox.get_all_pending() {
        let key = MessageKey::new(local_source, stored.message_id);
        let message = LedgerMessage::outgoing(
            key,
            stored.kind,
            stored.target_peer_id.clone(),
            stored.payload.clone(),
            stored.priority,
            stored.created_at,
        )
        .with_local_id(stored.id.clone());
        if ledger.add_message(message) && stored.is_attempted() {
            let _ = ledger.update_status(key, DeliveryState::Sent);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::network::RecordingTransport;
    use crate::protocol::{AckType, DEFAULT_Q_SCORE};
    use std::time::Duration;

    struct Fixture {
        node: Arc<MeshNode>,
        transport: RecordingTransport,
        clock: Arc<ManualClock>,
    }

    fn fixture() -> Fixture {
        let clock = ManualClock::new(1_000_000);
        let transport = RecordingTransport::new();
        let config = MeshConfig::builder()
            .device_id("alice")
            .heartbeat_interval(Duration::ZERO)
            .build();
        let node = MeshNode::builder(config)
            .clock(clock.clone())
            .transport(Arc::new(transport.clone()))
            .relay_seed(1)
            .build()
            .unwrap();
        Fixture {
            node,
            transport,
            clock,
        }
    }

    fn frame(kind: MessageType, source: &str, payload: &[u8], ttl: u8, id: u32) -> InboundFrame {
        InboundFrame::new(
            PacketCodec::encode(kind, source, payload, ttl, DEFAULT_Q_SCORE, Some(id)),
            Some(-60),
        )
    }

    fn ack_for(message_id: u32, from: &str) -> InboundFrame {
        let payload = AckPayload {
            original_message_id: message_id,
            ack_type: AckType::Received,
            receiver_hash: hash_source(from),
        };
        frame(MessageType::Ack, from, &payload.to_bytes(), 1, rand::random())
    }

    #[test]
    fn test_build_requires_transport() {
        let result = MeshNode::builder(MeshConfig::default()).build();
        assert!(matches!(result, Err(NodeError::MissingTransport)));
    }

    #[test]
    fn test_send_encodes_and_tracks() {
        let f = fixture();
        let id = f.node.send_text("bob", "hello");

        let sent = f.transport.take();
        assert_eq!(sent.len(), 1);
        let packet = PacketCodec::decode(&sent[0]).unwrap();
        assert_eq!(packet.kind(), MessageType::Text);
        assert_eq!(packet.header.source_hash, hash_source("alice"));
        assert_eq!(&packet.payload[..], b"hello");

        let stored = f.node.mailbox().get(&id).unwrap();
        assert_eq!(stored.message_id, packet.header.message_id);
        assert!(f.node.tracker().is_pending(stored.message_id));

        let key = MessageKey::new(f.node.local_source(), stored.message_id);
        assert_eq!(f.node.ledger().status(&key), Some(DeliveryState::Sent));
    }

    #[test]
    fn test_fire_and_forget_leaves_mailbox() {
        let f = fixture();
        let id = f.node.broadcast(MessageType::Status, Bytes::from_static(b"ok"), StoreOptions::default());
        assert!(f.node.mailbox().get(&id).is_none());
        assert!(f.node.mailbox().is_delivered(&id));
        assert_eq!(f.node.tracker().pending_count(), 0);
    }

    #[test]
    fn test_ack_delivers_everywhere() {
        let f = fixture();
        let delivered = Arc::new(Mutex::new(Vec::new()));
        let sink = delivered.clone();
        f.node.on_message_delivered(move |d| sink.lock().push(d.peer_id.clone()));

        let id = f.node.send_text("bob", "hello");
        let message_id = f.node.mailbox().get(&id).unwrap().message_id;

        let outcome = f.node.handle_frame(ack_for(message_id, "bob"));
        assert_eq!(outcome, Received::Ack { matched: true });

        assert!(f.node.mailbox().get(&id).is_none());
        assert!(f.node.tracker().is_delivered(message_id));
        let key = MessageKey::new(f.node.local_source(), message_id);
        assert_eq!(f.node.ledger().status(&key), Some(DeliveryState::Delivered));
        assert_eq!(*delivered.lock(), vec!["bob".to_string()]);
    }

    #[test]
    fn test_incoming_is_acked_relayed_and_deduplicated() {
        let f = fixture();
        let received = Arc::new(Mutex::new(0usize));
        let counter = received.clone();
        f.node.on_message_received(move |_| *counter.lock() += 1);

        let inbound = frame(MessageType::Sos, "carol", b"help", 3, 77);
        assert!(matches!(f.node.handle_frame(inbound.clone()), Received::Message(_)));

        // ACK reply plus an immediate critical relay
        let sent = f.transport.take();
        assert_eq!(sent.len(), 2);
        let ack = PacketCodec::decode(&sent[0]).unwrap();
        assert_eq!(ack.kind(), MessageType::Ack);
        assert_eq!(AckPayload::parse(&ack.payload).unwrap().original_message_id, 77);
        let relayed = PacketCodec::decode(&sent[1]).unwrap();
        assert_eq!(relayed.header.ttl, 2);
        assert_eq!(relayed.header.message_id, 77);

        assert_eq!(f.node.handle_frame(inbound), Received::Duplicate);
        // Same TTL means carol resent it: ACK again, never relay or deliver
        let sent = f.transport.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(PacketCodec::decode(&sent[0]).unwrap().kind(), MessageType::Ack);
        assert_eq!(*received.lock(), 1);
    }

    #[test]
    fn test_relayed_copies_are_acked_once() {
        let f = fixture();
        for ttl in [3, 2, 2, 1, 1] {
            f.node.handle_frame(frame(MessageType::Text, "carol", b"hi", ttl, 77));
        }

        let acks = f
            .transport
            .take()
            .iter()
            .filter_map(|b| PacketCodec::decode(b))
            .filter(|p| p.kind() == MessageType::Ack)
            .count();
        assert_eq!(acks, 1);
        assert_eq!(f.node.stats().duplicates, 4);
    }

    #[test]
    fn test_fire_and_forget_history_is_bounded() {
        let f = fixture();
        let history = f.node.config().ledger_history;
        for i in 0..(history * 3) {
            f.node.broadcast(
                MessageType::Location,
                Bytes::from(format!("fix {i}")),
                StoreOptions::default(),
            );
        }

        let stats = f.node.ledger().stats();
        assert_eq!(stats.outgoing, 0);
        assert_eq!(stats.total_messages, history);
        assert!(f.node.mailbox().is_empty());
        // Newest kept, still marked as sent
        let newest = f.node.ledger().messages().pop().unwrap();
        assert_eq!(newest.status, DeliveryState::Sent);
        assert_eq!(&newest.payload[..], format!("fix {}", history * 3 - 1).as_bytes());
    }

    #[test]
    fn test_malformed_and_echo() {
        let f = fixture();
        assert_eq!(
            f.node.handle_frame(InboundFrame::new(Bytes::from_static(b"\x00garbage-frame"), None)),
            Received::Malformed
        );
        assert_eq!(
            f.node.handle_frame(frame(MessageType::Text, "alice", b"me", 3, 5)),
            Received::OwnEcho
        );
        assert_eq!(f.node.stats().malformed, 1);
        assert!(f.transport.is_empty());
    }

    #[test]
    fn test_relays_are_spaced() {
        let f = fixture();
        f.node.handle_frame(frame(MessageType::Location, "dave", &[0u8; 13], 3, 9));
        f.clock.advance(Duration::from_millis(60));
        f.node.flush_relays();
        assert_eq!(f.transport.len(), 1);

        // Right after a relay the next one waits out the minimum interval
        f.node.handle_frame(frame(MessageType::Location, "dave", &[0u8; 13], 3, 10));
        assert_eq!(f.transport.len(), 1);
        assert_eq!(f.node.stats().queued_relays, 1);

        f.clock.advance(Duration::from_millis(100));
        assert_eq!(f.node.flush_relays(), 1);
        assert_eq!(f.transport.len(), 2);
        assert_eq!(f.node.stats().relayed, 2);
    }

    #[test]
    fn test_last_hop_is_not_relayed() {
        let f = fixture();
        f.node.handle_frame(frame(MessageType::Location, "dave", &[0u8; 13], 1, 9));
        assert_eq!(f.node.stats().queued_relays, 0);
    }

    #[test]
    fn test_retry_until_failed() {
        let f = fixture();
        let failed = Arc::new(Mutex::new(Vec::new()));
        let sink = failed.clone();
        f.node.on_delivery_failed(move |e| sink.lock().push(e.message_id));

        let id = f.node.send_text("bob", "anyone?");
        let message_id = f.node.mailbox().get(&id).unwrap().message_id;
        f.transport.take();

        let mut retransmissions = 0;
        for _ in 0..10 {
            f.clock.advance(Duration::from_secs(61));
            retransmissions += f.node.tick().retransmitted;
        }

        assert_eq!(retransmissions, 5);
        assert_eq!(*failed.lock(), vec![message_id]);
        assert!(f.node.mailbox().get(&id).is_none());

        let key = MessageKey::new(f.node.local_source(), message_id);
        assert_eq!(f.node.ledger().status(&key), Some(DeliveryState::Failed));
        assert_eq!(f.node.ledger().failed().len(), 1);
    }

    #[test]
    fn test_retry_failed_resends_same_id() {
        let f = fixture();
        let id = f.node.send_text("bob", "again");
        let message_id = f.node.mailbox().get(&id).unwrap().message_id;
        f.node.cancel(&id).unwrap();
        assert!(!f.node.tracker().is_pending(message_id));
        f.transport.take();

        let key = MessageKey::new(f.node.local_source(), message_id);
        f.node.retry_failed(key).unwrap();

        let sent = f.transport.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(PacketCodec::decode(&sent[0]).unwrap().header.message_id, message_id);
        let message = f.node.ledger().get(&key).unwrap();
        assert_eq!(message.retry_count, 1);
        assert_eq!(message.status, DeliveryState::Sent);
    }

    #[test]
    fn test_cancel_unknown_id() {
        let f = fixture();
        assert!(matches!(f.node.cancel("nope"), Err(NodeError::NotQueued(_))));
    }

    #[test]
    fn test_neighbors_age_out() {
        let f = fixture();
        f.node.handle_frame(frame(MessageType::Ping, "erin", b"PING", 1, 1));
        assert_eq!(f.node.neighbors().len(), 1);
        assert_eq!(f.node.relay().reachable_peers(), 1);

        f.clock.advance(Duration::from_secs(61));
        assert_eq!(f.node.tick().neighbors_lost, 1);
        assert_eq!(f.node.relay().reachable_peers(), 0);
    }

    #[test]
    fn test_airtime_defers_routine_but_not_critical() {
        let clock = ManualClock::new(0);
        let transport = RecordingTransport::new();
        let config = MeshConfig::builder()
            .device_id("alice")
            .heartbeat_interval(Duration::ZERO)
            .airtime(1, 1)
            .build();
        let node = MeshNode::builder(config)
            .clock(clock.clone())
            .transport(Arc::new(transport.clone()))
            .build()
            .unwrap();

        node.send_text("bob", "one");
        node.send_text("bob", "two");
        assert_eq!(transport.len(), 1);
        assert_eq!(node.mailbox().get_unsent().len(), 1);
        assert_eq!(node.stats().airtime_deferred, 1);

        node.send_sos(&SosPayload {
            lat: 41.0,
            lon: 29.0,
            status: 1,
        });
        assert_eq!(transport.len(), 2);
    }

    #[test]
    fn test_heartbeat_on_tick() {
        let clock = ManualClock::new(0);
        let transport = RecordingTransport::new();
        let config = MeshConfig::builder()
            .device_id("alice")
            .heartbeat_interval(Duration::from_secs(30))
            .build();
        let node = MeshNode::builder(config)
            .clock(clock.clone())
            .transport(Arc::new(transport.clone()))
            .build()
            .unwrap();

        assert!(node.tick().heartbeat);
        assert!(!node.tick().heartbeat);
        clock.advance(Duration::from_secs(30));
        assert!(node.tick().heartbeat);

        let pings = transport.take();
        assert_eq!(pings.len(), 2);
        let ping = PacketCodec::decode(&pings[0]).unwrap();
        assert_eq!(ping.kind(), MessageType::Ping);
        assert_eq!(ping.header.ttl, 1);
    }

    #[test]
    fn test_store_request_flushes_for_requester() {
        let f = fixture();
        f.node.handle_frame(frame(MessageType::Ping, "bob", b"PING", 1, 1));
        let id = f.node.send_text("bob", "held");
        let message_id = f.node.mailbox().get(&id).unwrap().message_id;
        f.transport.take();

        let request = StoreRequestPayload {
            target_hash: hash_source("bob"),
            last_known_message_id: 0,
        };
        f.node.handle_frame(frame(
            MessageType::StoreRequest,
            "bob",
            &request.to_bytes(),
            1,
            4242,
        ));

        let resent: Vec<Packet> = f
            .transport
            .take()
            .iter()
            .filter_map(|b| PacketCodec::decode(b))
            .filter(|p| p.kind() == MessageType::Text)
            .collect();
        assert_eq!(resent.len(), 1);
        assert_eq!(resent[0].header.message_id, message_id);
        assert!(f.node.tracker().is_pending(message_id));
    }
}
