use crate::ledger::LedgerError;
use crate::network::NetworkError;
use crate::persistence::PersistenceError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NodeError {
    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfig { field: &'static str, reason: String },

    #[error("Failed to read configuration: {0}")]
    ConfigRead(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] serde_json::Error),

    #[error("No transport configured")]
    MissingTransport,

    #[error("Message {0} is not queued")]
    NotQueued(String),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

pub type NodeResult<T> = Result<T, NodeError>;
