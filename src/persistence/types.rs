use crate::delivery::PendingAck;
use crate::mailbox::StoredMessage;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Destination id -> queued messages
pub type MailboxSnapshot = HashMap<String, Vec<StoredMessage>>;

pub const MAILBOX_KEY: &str = "mailbox";
pub const PENDING_ACKS_KEY: &str = "pending_acks";
pub const DELIVERED_KEY: &str = "delivered";

/// Everything a node writes through, as loaded at startup
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    pub mailbox: MailboxSnapshot,
    pub pending_acks: Vec<PendingAck>,
    /// Oldest first
    pub delivered: Vec<String>,
}

impl PersistedState {
    pub fn is_empty(&self) -> bool {
        self.mailbox.values().all(Vec::is_empty)
            && self.pending_acks.is_empty()
            && self.delivered.is_empty()
    }
}
