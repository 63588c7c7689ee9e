//! Schema & migrations.
//!
//! Disk layout, translated to SQL tables:
//! `superblock` (singleton row) | `inodes` | `dirents` | `blocks`.
//!
//! Creation is idempotent (`CREATE TABLE IF NOT EXISTS`) so reopening an
//! existing instance is a no-op past the version check. There is, for now,
//! exactly one schema version; `migrate` is still keyed off
//! `superblock.version` so a future on-disk format change has somewhere to
//! hang a migration step.

use rusqlite::{params, OptionalExtension, Transaction};

use crate::error::{Error, Result};

pub const SCHEMA_VERSION: u32 = 1;
pub const ROOT_INODE: u64 = 1;
pub const ROOT_MODE: u16 = 0o755;

const DDL: &str = "
CREATE TABLE IF NOT EXISTS superblock (
    id          INTEGER PRIMARY KEY CHECK (id = 0),
    version     INTEGER NOT NULL,
    block_size  INTEGER NOT NULL,
    next_inode  INTEGER NOT NULL,
    root_inode  INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS inodes (
    ino    INTEGER PRIMARY KEY,
    kind   INTEGER NOT NULL,
    mode   INTEGER NOT NULL,
    nlink  INTEGER NOT NULL,
    size   INTEGER NOT NULL,
    atime  INTEGER NOT NULL,
    mtime  INTEGER NOT NULL,
    ctime  INTEGER NOT NULL,
    uid    INTEGER NOT NULL,
    gid    INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS dirents (
    parent_ino INTEGER NOT NULL,
    name       TEXT NOT NULL,
    child_ino  INTEGER NOT NULL,
    PRIMARY KEY (parent_ino, name)
);
CREATE INDEX IF NOT EXISTS dirents_child_ino ON dirents(child_ino);

CREATE TABLE IF NOT EXISTS blocks (
    ino         INTEGER NOT NULL,
    block_index INTEGER NOT NULL,
    data        BLOB NOT NULL,
    PRIMARY KEY (ino, block_index)
);
";

/// Creates the schema (if absent) and seeds the root inode and superblock
/// row. Rejects reopening with a different `block_size` than the one the
/// instance was created with.
pub fn migrate(tx: &Transaction<'_>, block_size: u32) -> Result<()> {
    tx.execute_batch(DDL)?;

    let existing: Option<(u32, u32)> = tx
        .query_row(
            "SELECT version, block_size FROM superblock WHERE id = 0",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    match existing {
        Some((_version, stored_block_size)) => {
            if stored_block_size != block_size {
                return Err(Error::InvalidArgument(format!(
                    "instance was created with block_size={stored_block_size}, cannot reopen with block_size={block_size}"
                )));
            }
            Ok(())
        }
        None => {
            let now = current_time_seconds(tx)?;
            tx.execute(
                "INSERT INTO superblock (id, version, block_size, next_inode, root_inode) VALUES (0, ?1, ?2, ?3, ?4)",
                params![SCHEMA_VERSION, block_size, ROOT_INODE + 1, ROOT_INODE],
            )?;
            tx.execute(
                "INSERT INTO inodes (ino, kind, mode, nlink, size, atime, mtime, ctime, uid, gid)
                 VALUES (?1, 1, ?2, 2, 0, ?3, ?3, ?3, 0, 0)",
                params![ROOT_INODE, ROOT_MODE, now],
            )?;
            Ok(())
        }
    }
}

/// Seconds since epoch, taken from SQLite rather than `SystemTime::now()` so
/// every timestamp in a single transaction agrees with what's on disk.
pub fn current_time_seconds(tx: &Transaction<'_>) -> Result<i64> {
    let secs: i64 = tx.query_row("SELECT strftime('%s', 'now')", [], |row| row.get(0))?;
    Ok(secs)
}
