//! Instance/handle manager.
//!
//! Names a filesystem instance by an opaque id, shares one backing store
//! and one open-file table across every caller that opens the same id, and
//! runs migrations exactly once per process-level open. Concurrent
//! *external* processes opening the same database file are out of scope —
//! only in-process sharing by id is handled here.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use tokio::sync::Mutex as AsyncMutex;

use crate::config::{Backend, InstanceConfig};
use crate::error::Result;
use crate::fs::Filesystem;
use crate::openfile::OpenFileTable;
use crate::store::SqliteStore;

fn registry() -> &'static AsyncMutex<HashMap<String, Arc<Filesystem>>> {
    static REGISTRY: OnceLock<AsyncMutex<HashMap<String, Arc<Filesystem>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| AsyncMutex::new(HashMap::new()))
}

/// Opens (or returns the already-open) instance named `id`. Multiple calls
/// with the same id share one [`Filesystem`] and therefore one open-file
/// table; the open-file table is process-wide per instance, never shared
/// across instances, which is why it's keyed by instance id here.
pub async fn open(id: &str, config: InstanceConfig) -> Result<Arc<Filesystem>> {
    let mut guard = registry().lock().await;
    if let Some(existing) = guard.get(id) {
        return Ok(Arc::clone(existing));
    }

    let store = match config.backend {
        Backend::Memory => SqliteStore::open_memory(config.block_size).await?,
        Backend::File(path) => SqliteStore::open_file(path, config.block_size).await?,
    };

    // Crash-recovery sweep for inodes a prior process left orphaned with
    // nlink = 0 and no surviving open_refs (that count only ever lived in
    // the process that crashed).
    store
        .transaction(|tx| crate::inode::sweep_orphans(tx).map(|_| ()))
        .await?;

    let fs = Arc::new(Filesystem {
        store,
        open_files: Arc::new(AsyncMutex::new(OpenFileTable::new())),
        block_size: config.block_size,
        cwd: config.cwd,
    });
    guard.insert(id.to_string(), Arc::clone(&fs));
    Ok(fs)
}

/// Drops the instance's registry entry. The `Filesystem` itself only goes
/// away once every `Arc` a caller is still holding is dropped too — `close`
/// does not forcibly invalidate handles in flight.
pub async fn close(id: &str) {
    registry().lock().await.remove(id);
}
