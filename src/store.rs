//! Backing store adapter.
//!
//! Wraps a blocking `rusqlite::Connection` so the rest of the crate sees a
//! uniform, async, transactional surface. `rusqlite` has no async API of its
//! own; every call that touches the connection is dispatched through
//! [`tokio::task::spawn_blocking`] so a slow disk fsync never stalls the
//! runtime's worker threads.
//!
//! Every mutating filesystem operation runs its SQL inside a single
//! [`SqliteStore::transaction`] call, so each public call executes inside
//! exactly one backing-store transaction. The closure passed to
//! `transaction` receives a live `rusqlite::Transaction`; returning `Err`
//! drops it without committing, which rolls it back.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use crate::error::Result;
use crate::schema;

#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens a private, non-durable in-memory database and runs migrations.
    pub async fn open_memory(block_size: u32) -> Result<Self> {
        let store = Self::from_connection(Connection::open_in_memory()?);
        store.migrate(block_size).await?;
        Ok(store)
    }

    /// Opens (creating if absent) a database file on disk and runs
    /// migrations.
    pub async fn open_file(path: PathBuf, block_size: u32) -> Result<Self> {
        let store = tokio::task::spawn_blocking(move || -> Result<Self> {
            let conn = Connection::open(path)?;
            Ok(Self::from_connection(conn))
        })
        .await??;
        store.migrate(block_size).await?;
        Ok(store)
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    async fn migrate(&self, block_size: u32) -> Result<()> {
        self.transaction(move |tx| schema::migrate(tx, block_size))
            .await
    }

    /// Runs `f` inside a single serializable transaction. Committing on
    /// `Ok`, rolling back on `Err` or panic (the `rusqlite::Transaction`'s
    /// `Drop` impl rolls back if `commit` was never called).
    pub async fn transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&rusqlite::Transaction<'_>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().expect("sqlite connection mutex poisoned");
            let tx = guard.transaction()?;
            let value = f(&tx)?;
            tx.commit()?;
            Ok(value)
        })
        .await?
    }

    /// Runs `f` with read-only access, still inside a transaction so the
    /// call observes a single consistent snapshot.
    pub async fn read<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&rusqlite::Transaction<'_>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.transaction(f).await
    }
}
