//! Delivery tracking
//!
//! Frames that need an acknowledgment are registered after hand-off to the
//! transport and stay pending until an ACK arrives or the retry budget is
//! spent. Ids known to be delivered are kept in a bounded log shared with
//! the mailbox.

pub mod log;
pub mod tracker;
pub mod types;

pub use log::DeliveredLog;
pub use tracker::DeliveryTracker;
pub use types::{
    AckEvent, PendingAck, RetryOutcome, TrackerConfig, TrackerStats, ACK_TIMEOUT,
    DELIVERED_LOG_CAPACITY, MAX_PENDING_ACKS, MAX_RETRIES,
};
