//! Block layer.
//!
//! File content is stored as fixed-size blocks keyed by `(ino, block_index)`.
//! A missing row **is** a hole: reading one synthesizes `block_size` zero
//! bytes, and writing one that falls entirely within a skipped region must
//! never materialize it — zero-filled blocks are never stored. The last
//! block of a file may be shorter than `block_size`; every other stored
//! block is full-width.

use rusqlite::{params, OptionalExtension, Transaction};

use crate::error::{Error, Result};
use crate::inode::{self, InodeKind, Touch};

/// Reads `length` bytes starting at `offset`, clamped to the inode's
/// current `size`. Returns fewer bytes than requested (possibly zero) if
/// the range runs past EOF; never errors on short reads.
pub fn read(tx: &Transaction<'_>, ino: u64, block_size: u32, offset: u64, length: u64) -> Result<Vec<u8>> {
    let inode = inode::load(tx, ino)?;
    if inode.kind == InodeKind::Directory {
        return Err(Error::IsDirectory);
    }
    if offset >= inode.size {
        return Ok(Vec::new());
    }
    let length = length.min(inode.size - offset);
    if length == 0 {
        return Ok(Vec::new());
    }

    let block_size = block_size as u64;
    let mut out = Vec::with_capacity(length as usize);
    let mut pos = offset;
    let end = offset + length;
    while pos < end {
        let block_index = pos / block_size;
        let within = (pos % block_size) as usize;
        let take = ((end - pos).min(block_size - within as u64)) as usize;
        let block = load_block(tx, ino, block_index, block_size as u32)?;
        out.extend_from_slice(&block[within..within + take]);
        pos += take as u64;
    }

    inode::touch(tx, ino, Touch::Access).ok();
    Ok(out)
}

/// Overlays `data` onto the file starting at `offset`, extending `size` if
/// necessary. Blocks that straddle the write are read-modify-written; a
/// block fully inside a still-unwritten region of the write is written in
/// full (it's no longer a hole once touched), but ranges the write never
/// touches stay holes.
pub fn write(tx: &Transaction<'_>, ino: u64, block_size: u32, offset: u64, data: &[u8]) -> Result<u64> {
    if data.is_empty() {
        return Ok(0);
    }
    let inode = inode::load(tx, ino)?;
    if inode.kind == InodeKind::Directory {
        return Err(Error::IsDirectory);
    }
    let block_size_u64 = block_size as u64;
    let new_size = inode.size.max(offset + data.len() as u64);
    let last_block = if new_size == 0 { 0 } else { (new_size - 1) / block_size_u64 };

    let mut pos = offset;
    let end = offset + data.len() as u64;
    let mut written = 0usize;
    while pos < end {
        let block_index = pos / block_size_u64;
        let within = (pos % block_size_u64) as usize;
        let take = ((end - pos).min(block_size_u64 - within as u64)) as usize;

        let mut block = load_block(tx, ino, block_index, block_size)?;
        block[within..within + take].copy_from_slice(&data[written..written + take]);

        let stored_len = if block_index == last_block {
            (new_size - block_index * block_size_u64) as usize
        } else {
            block_size as usize
        };
        store_block(tx, ino, block_index, &block[..stored_len])?;

        pos += take as u64;
        written += take;
    }

    inode::set_size(tx, ino, new_size, Touch::Content)?;
    Ok(data.len() as u64)
}

/// Shrinks or extends a file to `new_size`. Shrinking deletes blocks
/// past the new end and shortens the block now straddling it; growing
/// never materializes the newly-exposed region — it stays a hole until
/// written.
pub fn truncate(tx: &Transaction<'_>, ino: u64, block_size: u32, new_size: u64) -> Result<()> {
    let inode = inode::load(tx, ino)?;
    let block_size_u64 = block_size as u64;

    if new_size < inode.size {
        let boundary_block = new_size / block_size_u64;
        let boundary_within = (new_size % block_size_u64) as usize;

        tx.execute(
            "DELETE FROM blocks WHERE ino = ?1 AND block_index > ?2",
            params![ino, boundary_block],
        )?;

        if boundary_within > 0 {
            if let Some(mut block) = fetch_stored_block(tx, ino, boundary_block)? {
                block.truncate(boundary_within);
                store_block(tx, ino, boundary_block, &block)?;
            }
            // else: boundary block was already a hole, stays one.
        } else {
            tx.execute(
                "DELETE FROM blocks WHERE ino = ?1 AND block_index >= ?2",
                params![ino, boundary_block],
            )?;
        }
    }
    // Growing: nothing to materialize, the gap is a hole by construction.

    inode::set_size(tx, ino, new_size, Touch::Content)?;
    Ok(())
}

/// Loads a block for reading/overlay purposes: a stored row, or
/// `block_size` zero bytes if the block is a hole.
fn load_block(tx: &Transaction<'_>, ino: u64, block_index: u64, block_size: u32) -> Result<Vec<u8>> {
    match fetch_stored_block(tx, ino, block_index)? {
        Some(mut bytes) => {
            if bytes.len() < block_size as usize {
                bytes.resize(block_size as usize, 0);
            }
            Ok(bytes)
        }
        None => Ok(vec![0u8; block_size as usize]),
    }
}

fn fetch_stored_block(tx: &Transaction<'_>, ino: u64, block_index: u64) -> Result<Option<Vec<u8>>> {
    let data: Option<Vec<u8>> = tx
        .query_row(
            "SELECT data FROM blocks WHERE ino = ?1 AND block_index = ?2",
            params![ino, block_index],
            |row| row.get(0),
        )
        .optional()?;
    Ok(data)
}

fn store_block(tx: &Transaction<'_>, ino: u64, block_index: u64, data: &[u8]) -> Result<()> {
    tx.execute(
        "INSERT INTO blocks (ino, block_index, data) VALUES (?1, ?2, ?3)
         ON CONFLICT(ino, block_index) DO UPDATE SET data = excluded.data",
        params![ino, block_index, data],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use rusqlite::Connection;

    use super::*;
    use crate::inode::InodeKind;

    fn new_file(tx: &Transaction<'_>) -> u64 {
        inode::allocate(tx, InodeKind::Regular, 0o644).unwrap()
    }

    #[test]
    fn hole_between_writes_stays_unstored() {
        let mut conn = Connection::open_in_memory().unwrap();
        let tx = conn.transaction().unwrap();
        crate::schema::migrate(&tx, 4096).unwrap();
        let ino = new_file(&tx);

        write(&tx, ino, 4096, 0, &[b'A'; 4096]).unwrap();
        write(&tx, ino, 4096, 12288, &[b'B'; 4096]).unwrap();

        let hole_block: Option<Vec<u8>> = tx
            .query_row(
                "SELECT data FROM blocks WHERE ino = ?1 AND block_index = 2",
                rusqlite::params![ino],
                |row| row.get(0),
            )
            .optional()
            .unwrap();
        assert!(hole_block.is_none(), "untouched block must not be materialized");

        let middle = read(&tx, ino, 4096, 4096, 8192).unwrap();
        assert_eq!(middle, vec![0u8; 8192]);
    }

    #[test]
    fn last_block_is_stored_short() {
        let mut conn = Connection::open_in_memory().unwrap();
        let tx = conn.transaction().unwrap();
        crate::schema::migrate(&tx, 4096).unwrap();
        let ino = new_file(&tx);

        write(&tx, ino, 4096, 0, b"hello").unwrap();

        let stored: Vec<u8> = tx
            .query_row(
                "SELECT data FROM blocks WHERE ino = ?1 AND block_index = 0",
                rusqlite::params![ino],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(stored, b"hello");
    }

    #[test]
    fn truncate_shrinks_and_shortens_boundary_block() {
        let mut conn = Connection::open_in_memory().unwrap();
        let tx = conn.transaction().unwrap();
        crate::schema::migrate(&tx, 4096).unwrap();
        let ino = new_file(&tx);

        write(&tx, ino, 4096, 0, &[b'X'; 8192]).unwrap();
        truncate(&tx, ino, 4096, 10).unwrap();

        let data = read(&tx, ino, 4096, 0, 4096).unwrap();
        assert_eq!(data, vec![b'X'; 10]);

        let gone: Option<Vec<u8>> = tx
            .query_row(
                "SELECT data FROM blocks WHERE ino = ?1 AND block_index = 1",
                rusqlite::params![ino],
                |row| row.get(0),
            )
            .optional()
            .unwrap();
        assert!(gone.is_none());
    }
}
