//! Write-through persistence of node state
//!
//! Three records survive restarts: the mailbox, the pending-ACK table and
//! the delivered-id log. Saves are fire-and-forget; a backend that fails to
//! write logs and carries on.

pub mod error;
pub mod memory;
pub mod sqlite;
pub mod types;

pub use error::{PersistenceError, PersistenceResult};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use types::{MailboxSnapshot, PersistedState};

use crate::delivery::PendingAck;

pub trait Persistence: Send + Sync {
    fn save_mailbox(&self, mailbox: &MailboxSnapshot);

    fn save_pending_acks(&self, pending: &[PendingAck]);

    /// Oldest first
    fn save_delivered(&self, ids: &[String]);
}
