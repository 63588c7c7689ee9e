//! Inode layer.
//!
//! An inode describes a single unnamed file: its kind, mode, link count,
//! size and timestamps. Inodes are rows in the `inodes` table; there is no
//! in-memory inode cache — every lookup re-reads the row inside the current
//! transaction, which is the only place a consistent view is guaranteed.
//! What would be the classic in-memory "inode table" guarding concurrent
//! access is instead just SQLite's own transaction isolation.

use rusqlite::{params, OptionalExtension, Transaction};

use crate::error::{Error, Result};
use crate::schema::current_time_seconds;

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum InodeKind {
    Regular,
    Directory,
}

impl InodeKind {
    fn to_db(self) -> i64 {
        match self {
            InodeKind::Regular => 0,
            InodeKind::Directory => 1,
        }
    }

    fn from_db(v: i64) -> Result<Self> {
        match v {
            0 => Ok(InodeKind::Regular),
            1 => Ok(InodeKind::Directory),
            _ => Err(Error::InvalidArgument(format!("unknown inode kind {v}"))),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Inode {
    pub ino: u64,
    pub kind: InodeKind,
    pub mode: u16,
    pub nlink: u32,
    pub size: u64,
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
    pub uid: u32,
    pub gid: u32,
}

/// Which timestamp(s) a mutation should bump.
#[derive(Copy, Clone, PartialEq, Eq)]
pub enum Touch {
    /// Metadata changed (mode, nlink, owner, …): bump `ctime`.
    Meta,
    /// File content changed: bump `mtime` and `ctime`.
    Content,
    /// File was read: bump `atime` only, best-effort.
    Access,
}

/// Allocates a fresh inode number and inserts its row. `nlink` starts at 0;
/// the caller (directory layer or public interface) links it into a
/// directory entry immediately afterward within the same transaction.
pub fn allocate(tx: &Transaction<'_>, kind: InodeKind, mode: u16) -> Result<u64> {
    let ino: u64 = tx.query_row(
        "UPDATE superblock SET next_inode = next_inode + 1 WHERE id = 0 RETURNING next_inode - 1",
        [],
        |row| row.get(0),
    )?;
    let now = current_time_seconds(tx)?;
    tx.execute(
        "INSERT INTO inodes (ino, kind, mode, nlink, size, atime, mtime, ctime, uid, gid)
         VALUES (?1, ?2, ?3, 0, 0, ?4, ?4, ?4, 0, 0)",
        params![ino, kind.to_db(), mode, now],
    )?;
    Ok(ino)
}

/// Loads an inode's metadata, or `Error::NotFound` if it doesn't exist (or
/// was already deleted).
pub fn load(tx: &Transaction<'_>, ino: u64) -> Result<Inode> {
    tx.query_row(
        "SELECT ino, kind, mode, nlink, size, atime, mtime, ctime, uid, gid
         FROM inodes WHERE ino = ?1",
        params![ino],
        |row| {
            Ok((
                row.get::<_, u64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, u16>(2)?,
                row.get::<_, u32>(3)?,
                row.get::<_, u64>(4)?,
                row.get::<_, i64>(5)?,
                row.get::<_, i64>(6)?,
                row.get::<_, i64>(7)?,
                row.get::<_, u32>(8)?,
                row.get::<_, u32>(9)?,
            ))
        },
    )
    .optional()?
    .map(
        |(ino, kind, mode, nlink, size, atime, mtime, ctime, uid, gid)| {
            Ok(Inode {
                ino,
                kind: InodeKind::from_db(kind)?,
                mode,
                nlink,
                size,
                atime,
                mtime,
                ctime,
                uid,
                gid,
            })
        },
    )
    .unwrap_or(Err(Error::NotFound))
}

/// Returns just the `kind` of an inode without loading the rest of the row;
/// used on hot paths like path resolution that only need to know whether a
/// component is a directory.
pub fn kind_of(tx: &Transaction<'_>, ino: u64) -> Result<InodeKind> {
    let kind: i64 = tx
        .query_row("SELECT kind FROM inodes WHERE ino = ?1", params![ino], |row| {
            row.get(0)
        })
        .optional()?
        .ok_or(Error::NotFound)?;
    InodeKind::from_db(kind)
}

/// Writes `size` back and touches the requested timestamp(s).
pub fn set_size(tx: &Transaction<'_>, ino: u64, size: u64, touch: Touch) -> Result<()> {
    let now = current_time_seconds(tx)?;
    let changed = match touch {
        Touch::Content => tx.execute(
            "UPDATE inodes SET size = ?2, mtime = ?3, ctime = ?3 WHERE ino = ?1",
            params![ino, size, now],
        )?,
        Touch::Meta => tx.execute(
            "UPDATE inodes SET size = ?2, ctime = ?3 WHERE ino = ?1",
            params![ino, size, now],
        )?,
        Touch::Access => tx.execute(
            "UPDATE inodes SET size = ?2, atime = ?3 WHERE ino = ?1",
            params![ino, size, now],
        )?,
    };
    if changed == 0 {
        return Err(Error::NotFound);
    }
    Ok(())
}

/// Bumps a timestamp without changing `size`. Every mutation is responsible
/// for touching its own timestamps through this function or `set_size`.
pub fn touch(tx: &Transaction<'_>, ino: u64, touch: Touch) -> Result<()> {
    let now = current_time_seconds(tx)?;
    let changed = match touch {
        Touch::Meta => tx.execute("UPDATE inodes SET ctime = ?2 WHERE ino = ?1", params![ino, now])?,
        Touch::Content => tx.execute(
            "UPDATE inodes SET mtime = ?2, ctime = ?2 WHERE ino = ?1",
            params![ino, now],
        )?,
        Touch::Access => tx.execute("UPDATE inodes SET atime = ?2 WHERE ino = ?1", params![ino, now])?,
    };
    if changed == 0 {
        return Err(Error::NotFound);
    }
    Ok(())
}

/// Adjusts `nlink` by `delta` (may be negative) and touches `ctime`.
/// Never lets `nlink` underflow below zero.
pub fn bump_nlink(tx: &Transaction<'_>, ino: u64, delta: i64) -> Result<u32> {
    let now = current_time_seconds(tx)?;
    let nlink: i64 = tx
        .query_row("SELECT nlink FROM inodes WHERE ino = ?1", params![ino], |row| {
            row.get(0)
        })
        .optional()?
        .ok_or(Error::NotFound)?;
    let updated = nlink + delta;
    debug_assert!(updated >= 0, "nlink underflow on inode {ino}");
    let updated = updated.max(0) as u32;
    tx.execute(
        "UPDATE inodes SET nlink = ?2, ctime = ?3 WHERE ino = ?1",
        params![ino, updated, now],
    )?;
    Ok(updated)
}

/// Deletes the inode and all its blocks iff `nlink = 0` and the caller
/// reports no live open descriptors (the open-unlinked lifetime rule). The
/// open-file table's `open_refs` count is owned by [`crate::openfile`]; this
/// layer never reaches into it, so it's passed in explicitly.
pub fn maybe_delete(tx: &Transaction<'_>, ino: u64, open_refs: u32) -> Result<bool> {
    if ino == crate::schema::ROOT_INODE {
        return Ok(false);
    }
    let nlink: Option<u32> = tx
        .query_row("SELECT nlink FROM inodes WHERE ino = ?1", params![ino], |row| {
            row.get(0)
        })
        .optional()?;
    let Some(nlink) = nlink else {
        return Ok(false);
    };
    if nlink == 0 && open_refs == 0 {
        tx.execute("DELETE FROM blocks WHERE ino = ?1", params![ino])?;
        tx.execute("DELETE FROM inodes WHERE ino = ?1", params![ino])?;
        Ok(true)
    } else {
        Ok(false)
    }
}

/// Startup sweep: reclaims inodes a crashed process left with `nlink = 0`
/// and no chance of ever regaining an `open_refs` entry, since the
/// open-file table that would have held one starts out empty on every
/// process start.
pub fn sweep_orphans(tx: &Transaction<'_>) -> Result<u64> {
    tx.execute("DELETE FROM blocks WHERE ino IN (SELECT ino FROM inodes WHERE nlink = 0)", [])?;
    let deleted = tx.execute("DELETE FROM inodes WHERE nlink = 0 AND ino != 1", [])?;
    Ok(deleted as u64)
}
