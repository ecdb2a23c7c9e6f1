//! SQLite persistence backend
//!
//! Each record is a JSON document in a single key/value table. Saves are
//! queued to a writer task so callers never wait on disk.

use crate::delivery::PendingAck;
use crate::persistence::error::{PersistenceError, PersistenceResult};
use crate::persistence::types::{
    MailboxSnapshot, PersistedState, DELIVERED_KEY, MAILBOX_KEY, PENDING_ACKS_KEY,
};
use crate::persistence::Persistence;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

enum WriteOp {
    Put { key: &'static str, value: String },
    Flush(oneshot::Sender<()>),
}

pub struct SqliteStore {
    pool: SqlitePool,
    tx: mpsc::UnboundedSender<WriteOp>,
}

impl SqliteStore {
    /// Open (creating if needed) a database file
    pub async fn open(path: impl AsRef<Path>) -> PersistenceResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Self::init(pool).await
    }

    /// In-memory database (for testing)
    pub async fn new_in_memory() -> PersistenceResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        // A single connection that never recycles, or the database vanishes
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Self::init(pool).await
    }

    async fn init(pool: SqlitePool) -> PersistenceResult<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS records (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(writer_loop(pool.clone(), rx));

        Ok(Self { pool, tx })
    }

    /// Read back every record. Missing records load as empty.
    pub async fn load(&self) -> PersistenceResult<PersistedState> {
        let rows = sqlx::query("SELECT key, value FROM records")
            .fetch_all(&self.pool)
            .await?;

        let mut state = PersistedState::default();
        for row in rows {
            let key: String = row.try_get("key")?;
            let value: String = row.try_get("value")?;
            match key.as_str() {
                MAILBOX_KEY => state.mailbox = serde_json::from_str(&value)?,
                PENDING_ACKS_KEY => state.pending_acks = serde_json::from_str(&value)?,
                DELIVERED_KEY => state.delivered = serde_json::from_str(&value)?,
                other => debug!(key = other, "ignoring unknown record"),
            }
        }
        Ok(state)
    }

    /// Wait until every queued save has been written
    pub async fn flush(&self) -> PersistenceResult<()> {
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(WriteOp::Flush(done_tx))
            .map_err(|_| PersistenceError::WriterClosed)?;
        done_rx.await.map_err(|_| PersistenceError::WriterClosed)
    }

    fn enqueue<T: Serialize + ?Sized>(&self, key: &'static str, value: &T) {
        let value = match serde_json::to_string(value) {
            Ok(v) => v,
            Err(e) => {
                warn!(key, error = %e, "failed to serialize record");
                return;
            }
        };
        if self.tx.send(WriteOp::Put { key, value }).is_err() {
            warn!(key, "persistence writer stopped, dropping save");
        }
    }
}

async fn writer_loop(pool: SqlitePool, mut rx: mpsc::UnboundedReceiver<WriteOp>) {
    while let Some(op) = rx.recv().await {
        match op {
            WriteOp::Put { key, value } => {
                let result = sqlx::query(
                    "INSERT OR REPLACE INTO records (key, value, updated_at) VALUES (?, ?, ?)",
                )
                .bind(key)
                .bind(value)
                .bind(chrono::Utc::now().timestamp())
                .execute(&pool)
                .await;

                if let Err(e) = result {
                    warn!(key, error = %e, "failed to persist record");
                }
            }
            WriteOp::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("persistence writer exiting");
}

impl Persistence for SqliteStore {
    fn save_mailbox(&self, mailbox: &MailboxSnapshot) {
        self.enqueue(MAILBOX_KEY, mailbox);
    }

    fn save_pending_acks(&self, pending: &[PendingAck]) {
        self.enqueue(PENDING_ACKS_KEY, pending);
    }

    fn save_delivered(&self, ids: &[String]) {
        self.enqueue(DELIVERED_KEY, ids);
    }
}
