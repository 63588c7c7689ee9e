//! Directory layer.
//!
//! A directory is nothing more than a set of `(parent_ino, name) ->
//! child_ino` rows; `.` and `..` are synthesised at `readdir` time rather
//! than stored, which also keeps the dirent table free of cycles.
//! Link-count bookkeeping for the `..` a subdirectory contributes to its
//! parent lives here, next to the dirent mutation that creates it.

use rusqlite::{params, OptionalExtension, Transaction};

use crate::error::{Error, Result};
use crate::inode::{self, InodeKind, Touch};
use crate::schema::ROOT_INODE;

/// One entry as `readdir` returns it; `.`/`..` are synthesized by the
/// caller ([`crate::fs`]), not by this layer.
pub struct Entry {
    pub name: String,
    pub child_ino: u64,
    pub kind: InodeKind,
}

pub fn lookup(tx: &Transaction<'_>, parent: u64, name: &str) -> Result<u64> {
    tx.query_row(
        "SELECT child_ino FROM dirents WHERE parent_ino = ?1 AND name = ?2",
        params![parent, name],
        |row| row.get(0),
    )
    .optional()?
    .ok_or(Error::NotFound)
}

/// Inserts a `(parent, name) -> child` entry, bumping `child`'s `nlink`. If
/// `child` is a directory, also bumps `parent`'s `nlink` for the new `..`.
pub fn link_entry(tx: &Transaction<'_>, parent: u64, name: &str, child: u64) -> Result<()> {
    validate_name(name)?;
    let exists: Option<u64> = tx
        .query_row(
            "SELECT child_ino FROM dirents WHERE parent_ino = ?1 AND name = ?2",
            params![parent, name],
            |row| row.get(0),
        )
        .optional()?;
    if exists.is_some() {
        return Err(Error::Exists);
    }

    tx.execute(
        "INSERT INTO dirents (parent_ino, name, child_ino) VALUES (?1, ?2, ?3)",
        params![parent, name, child],
    )?;
    inode::bump_nlink(tx, child, 1)?;
    if inode::kind_of(tx, child)? == InodeKind::Directory {
        inode::bump_nlink(tx, parent, 1)?;
    }
    Ok(())
}

/// Removes a `(parent, name)` entry and decrements the child's `nlink`,
/// deleting the inode if that drops it to zero with no open descriptors.
///
/// `expect_kind` distinguishes `unlink` (must not target a directory) from
/// `rmdir` (must target an empty directory); each mismatch produces its own
/// error kind.
///
/// `open_refs_of` reports how many live descriptors the open-file table
/// currently holds on a given inode — looked up lazily, inside this same
/// transaction, rather than passed as a pre-fetched number, so a descriptor
/// opened concurrently between resolving the path and running this call
/// can't race the count.
pub fn unlink_entry(
    tx: &Transaction<'_>,
    parent: u64,
    name: &str,
    expect_kind: InodeKind,
    open_refs_of: &dyn Fn(u64) -> u32,
) -> Result<()> {
    if name == "." || name == ".." {
        return Err(Error::InvalidArgument(format!("cannot unlink \"{name}\"")));
    }
    let child = lookup(tx, parent, name)?;
    let child_kind = inode::kind_of(tx, child)?;

    match (expect_kind, child_kind) {
        (InodeKind::Regular, InodeKind::Directory) => return Err(Error::IsDirectory),
        (InodeKind::Directory, InodeKind::Regular) => return Err(Error::NotDirectory),
        _ => {}
    }
    if child_kind == InodeKind::Directory && !is_dir_empty(tx, child)? {
        return Err(Error::NotEmpty);
    }

    tx.execute(
        "DELETE FROM dirents WHERE parent_ino = ?1 AND name = ?2",
        params![parent, name],
    )?;
    inode::bump_nlink(tx, child, -1)?;
    if child_kind == InodeKind::Directory {
        inode::bump_nlink(tx, parent, -1)?;
    }
    inode::maybe_delete(tx, child, open_refs_of(child))?;
    Ok(())
}

/// True if a directory contains no entries of its own (`.`/`..` are
/// synthetic and don't count).
pub fn is_dir_empty(tx: &Transaction<'_>, ino: u64) -> Result<bool> {
    let count: i64 = tx.query_row(
        "SELECT COUNT(*) FROM dirents WHERE parent_ino = ?1",
        params![ino],
        |row| row.get(0),
    )?;
    Ok(count == 0)
}

/// Lists a directory's entries. Order is deterministic within a snapshot
/// (SQLite returns rows in an implementation-defined but stable order for a
/// given table state) but not required to be lexicographic.
pub fn readdir(tx: &Transaction<'_>, parent: u64) -> Result<Vec<Entry>> {
    if inode::kind_of(tx, parent)? != InodeKind::Directory {
        return Err(Error::NotDirectory);
    }
    let mut stmt = tx.prepare("SELECT name, child_ino FROM dirents WHERE parent_ino = ?1")?;
    let rows = stmt.query_map(params![parent], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, u64>(1)?))
    })?;
    let mut entries = Vec::new();
    for row in rows {
        let (name, child_ino) = row?;
        let kind = inode::kind_of(tx, child_ino)?;
        entries.push(Entry { name, child_ino, kind });
    }
    Ok(entries)
}

/// Finds `ino`'s parent by following `..`'s dirent from the opposite
/// direction (the only edge not stored as a forward dirent would be the
/// root's, which is its own parent).
pub(crate) fn parent_of(tx: &Transaction<'_>, ino: u64) -> Result<u64> {
    if ino == ROOT_INODE {
        return Ok(ROOT_INODE);
    }
    tx.query_row(
        "SELECT parent_ino FROM dirents WHERE child_ino = ?1 LIMIT 1",
        params![ino],
        |row| row.get(0),
    )
    .optional()?
    .ok_or(Error::NotFound)
}

/// Renames `(old_parent, old_name)` to `(new_parent, new_name)`, atomically
/// replacing an existing destination if compatible. Moving a directory into
/// its own descendant is rejected with `InvalidArgument`.
pub fn rename(
    tx: &Transaction<'_>,
    old_parent: u64,
    old_name: &str,
    new_parent: u64,
    new_name: &str,
    open_refs_of: &dyn Fn(u64) -> u32,
) -> Result<()> {
    validate_name(new_name)?;
    let source = lookup(tx, old_parent, old_name)?;
    let source_kind = inode::kind_of(tx, source)?;

    if source_kind == InodeKind::Directory {
        reject_if_descendant(tx, new_parent, source)?;
    }

    let destination = lookup(tx, new_parent, new_name).ok();
    if let Some(dest_ino) = destination {
        if dest_ino == source {
            return Ok(());
        }
        let dest_kind = inode::kind_of(tx, dest_ino)?;
        match (source_kind, dest_kind) {
            (InodeKind::Regular, InodeKind::Regular) => {}
            (InodeKind::Directory, InodeKind::Directory) => {
                if !is_dir_empty(tx, dest_ino)? {
                    return Err(Error::NotEmpty);
                }
            }
            _ => return Err(Error::InvalidArgument("incompatible rename target".into())),
        }
        unlink_entry(tx, new_parent, new_name, dest_kind, open_refs_of)?;
    }

    tx.execute(
        "DELETE FROM dirents WHERE parent_ino = ?1 AND name = ?2",
        params![old_parent, old_name],
    )?;
    tx.execute(
        "INSERT INTO dirents (parent_ino, name, child_ino) VALUES (?1, ?2, ?3)",
        params![new_parent, new_name, source],
    )?;

    if old_parent != new_parent && source_kind == InodeKind::Directory {
        inode::bump_nlink(tx, old_parent, -1)?;
        inode::bump_nlink(tx, new_parent, 1)?;
    }
    inode::touch(tx, source, Touch::Meta)?;
    Ok(())
}

/// Walks parents from `start` up to root, failing if it ever reaches
/// `forbidden`. Used by `rename` to verify the destination isn't a
/// descendant of the source.
fn reject_if_descendant(tx: &Transaction<'_>, start: u64, forbidden: u64) -> Result<()> {
    let mut current = start;
    loop {
        if current == forbidden {
            return Err(Error::InvalidArgument(
                "cannot move a directory into its own descendant".into(),
            ));
        }
        if current == ROOT_INODE {
            return Ok(());
        }
        current = parent_of(tx, current)?;
    }
}

pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('/') || name.contains('\0') {
        return Err(Error::InvalidArgument(format!("invalid name: {name:?}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use rusqlite::Connection;

    use super::*;
    use crate::schema::ROOT_INODE;

    fn no_open_refs(_ino: u64) -> u32 {
        0
    }

    #[test]
    fn rename_into_own_descendant_is_rejected() {
        let mut conn = Connection::open_in_memory().unwrap();
        let tx = conn.transaction().unwrap();
        crate::schema::migrate(&tx, 4096).unwrap();

        let parent = inode::allocate(&tx, InodeKind::Directory, 0o755).unwrap();
        link_entry(&tx, ROOT_INODE, "parent", parent).unwrap();
        let child = inode::allocate(&tx, InodeKind::Directory, 0o755).unwrap();
        link_entry(&tx, parent, "child", child).unwrap();

        let err = rename(&tx, ROOT_INODE, "parent", child, "parent", &no_open_refs).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn unlink_respects_live_open_refs() {
        let mut conn = Connection::open_in_memory().unwrap();
        let tx = conn.transaction().unwrap();
        crate::schema::migrate(&tx, 4096).unwrap();

        let file = inode::allocate(&tx, InodeKind::Regular, 0o644).unwrap();
        link_entry(&tx, ROOT_INODE, "f", file).unwrap();

        unlink_entry(&tx, ROOT_INODE, "f", InodeKind::Regular, &|_| 1).unwrap();
        // Still referenced by an open descriptor: the inode row survives.
        assert_eq!(inode::kind_of(&tx, file).unwrap(), InodeKind::Regular);

        assert!(matches!(lookup(&tx, ROOT_INODE, "f"), Err(Error::NotFound)));
    }
}
