//! Metrics recorder for mesh reliability operations
//!
//! Thin wrappers over the `metrics` facade. With no recorder installed every
//! call is a no-op.

use crate::protocol::{AckType, MessageType, Priority};
use crate::relay::RelayReason;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::sync::atomic::{AtomicBool, Ordering};

static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Initialize metric descriptions (call once at startup)
pub fn init_metrics() {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }

    // Receive path
    describe_counter!("mesh_packets_received_total", "Frames decoded successfully");
    describe_counter!("mesh_packets_malformed_total", "Frames dropped by the decoder");
    describe_counter!(
        "mesh_packets_duplicate_total",
        "Frames dropped because the message was already seen"
    );
    describe_counter!("mesh_packets_sent_total", "Frames handed to the transport");

    // Mailbox
    describe_counter!("mesh_messages_stored_total", "Messages queued by producers");
    describe_counter!(
        "mesh_mailbox_evictions_total",
        "Messages evicted because a destination queue was full"
    );
    describe_counter!("mesh_messages_expired_total", "Messages dropped after expiry");
    describe_gauge!("mesh_mailbox_depth", "Messages currently held in the mailbox");

    // Delivery
    describe_counter!("mesh_acks_received_total", "ACKs matched to a pending message");
    describe_counter!(
        "mesh_pending_ack_evictions_total",
        "Pending ACK entries evicted because the table was full"
    );
    describe_counter!("mesh_retransmissions_total", "Frames sent again after an ACK timeout");
    describe_counter!(
        "mesh_delivery_failures_total",
        "Messages that exhausted their retries"
    );
    describe_gauge!("mesh_pending_acks", "Messages awaiting an ACK");
    describe_histogram!("mesh_ack_latency_seconds", "Time from send to ACK");

    // Relay
    describe_counter!("mesh_relays_total", "Relay decisions to forward, by reason");
    describe_counter!("mesh_relays_suppressed_total", "Relay decisions to drop, by reason");
}

// ============== Receive Path ==============

pub fn record_packet_received(kind: MessageType) {
    counter!("mesh_packets_received_total", "type" => kind.to_string()).increment(1);
}

pub fn record_packet_malformed() {
    counter!("mesh_packets_malformed_total").increment(1);
}

pub fn record_packet_duplicate() {
    counter!("mesh_packets_duplicate_total").increment(1);
}

pub fn record_packet_sent(kind: MessageType, bytes: usize) {
    counter!("mesh_packets_sent_total", "type" => kind.to_string()).increment(1);
    counter!("mesh_bytes_sent_total").increment(bytes as u64);
}

// ============== Mailbox ==============

pub fn record_message_stored(priority: Priority) {
    counter!("mesh_messages_stored_total", "priority" => priority.as_str()).increment(1);
}

pub fn record_mailbox_evictions(count: usize) {
    counter!("mesh_mailbox_evictions_total").increment(count as u64);
}

pub fn record_messages_expired(count: usize) {
    counter!("mesh_messages_expired_total").increment(count as u64);
}

pub fn set_mailbox_depth(depth: usize) {
    gauge!("mesh_mailbox_depth").set(depth as f64);
}

// ============== Delivery ==============

pub fn record_ack_received(ack_type: AckType, latency_ms: u64) {
    let label = match ack_type {
        AckType::Received => "received",
        AckType::Delivered => "delivered",
        AckType::Read => "read",
    };
    counter!("mesh_acks_received_total", "ack_type" => label).increment(1);
    histogram!("mesh_ack_latency_seconds").record(latency_ms as f64 / 1000.0);
}

pub fn record_pending_ack_evictions(count: usize) {
    counter!("mesh_pending_ack_evictions_total").increment(count as u64);
}

pub fn record_retransmission(priority: Priority) {
    counter!("mesh_retransmissions_total", "priority" => priority.as_str()).increment(1);
}

pub fn record_delivery_failure() {
    counter!("mesh_delivery_failures_total").increment(1);
}

pub fn set_pending_acks(count: usize) {
    gauge!("mesh_pending_acks").set(count as f64);
}

// ============== Relay ==============

pub fn record_relay(reason: RelayReason) {
    counter!("mesh_relays_total", "reason" => reason.as_str()).increment(1);
}

pub fn record_relay_suppressed(reason: RelayReason) {
    counter!("mesh_relays_suppressed_total", "reason" => reason.as_str()).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics() {
        // Should not panic when called multiple times
        init_metrics();
        init_metrics();
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_packet_received(MessageType::Unknown(0x99));
        record_mailbox_evictions(3);
        record_ack_received(AckType::Read, 1_500);
        record_relay(RelayReason::Jitter);
        set_pending_acks(0);
    }
}
