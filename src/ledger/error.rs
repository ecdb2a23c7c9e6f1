use crate::dedup::MessageKey;
use crate::ledger::types::DeliveryState;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Message not found: {0}")]
    NotFound(MessageKey),

    #[error("Invalid state transition for {key}: {from:?} -> {to:?}")]
    InvalidTransition {
        key: MessageKey,
        from: DeliveryState,
        to: DeliveryState,
    },

    #[error("Message {0} is not in the outgoing queue")]
    NotOutgoing(MessageKey),

    #[error("Message {0} is not in the failed queue")]
    NotFailed(MessageKey),

    #[error("{0:?} is only reachable through an acknowledgment")]
    AckOnly(DeliveryState),
}

pub type LedgerResult<T> = Result<T, LedgerError>;
