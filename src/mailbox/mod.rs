//! Store-and-forward mailbox

pub mod store;
pub mod types;

pub use store::Mailbox;
pub use types::{
    MailboxConfig, MailboxStats, MessageDelivered, StoreOptions, StoredMessage, MAX_MAILBOX_SIZE,
    MESSAGE_EXPIRY,
};
