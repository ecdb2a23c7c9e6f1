//! Message status ledger
//!
//! `pending -> sending -> sent -> {delivered -> read} | failed`

pub mod error;
pub mod store;
pub mod types;

pub use error::{LedgerError, LedgerResult};
pub use store::MessageLedger;
pub use types::{
    DeliveryState, Direction, LedgerMessage, LedgerStats, StatusChange, HISTORY_CAPACITY,
    SEEN_CAPACITY,
};
