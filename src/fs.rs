//! Public filesystem interface.
//!
//! Two tiers over the same inode/block/directory machinery: a high-level,
//! path-oriented surface (`write_file`, `read_file`, `mkdir`, …) and a
//! low-level, POSIX-like surface (`open`, `read`, `write`, `pread`,
//! `pwrite`, `close`, `fstat`). High-level calls are themselves built out of
//! the low-level ones — `open` + operation + `close`, inside one
//! transaction — so a caller can never observe a half-finished call.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::dir::{self, Entry};
use crate::error::{Error, Result};
use crate::inode::{self, Inode, InodeKind};
use crate::openfile::{OpenFileTable, OpenFlags};
use crate::path;
use crate::store::SqliteStore;

/// Metadata as returned by `stat`/`fstat`. `ino` is stable for the lifetime
/// of an instance (callers may rely on hard links sharing it) and `nlink`
/// always reflects the number of names currently pointing at the inode.
#[derive(Clone, Debug)]
pub struct Metadata {
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

impl From<Inode> for Metadata {
    fn from(i: Inode) -> Self {
        Self {
            ino: i.ino,
            kind: i.kind,
            mode: i.mode,
            nlink: i.nlink,
            size: i.size,
            atime: i.atime,
            mtime: i.mtime,
            ctime: i.ctime,
            uid: i.uid,
            gid: i.gid,
        }
    }
}

pub struct DirListEntry {
    pub name: String,
    pub kind: InodeKind,
    pub ino: u64,
}

/// The filesystem surface bound to one backing store, one open-file table,
/// and one default cwd. The instance manager shares a single value of this
/// type across every caller that opens the same instance id.
pub struct Filesystem {
    pub(crate) store: SqliteStore,
    pub(crate) open_files: Arc<Mutex<OpenFileTable>>,
    pub(crate) block_size: u32,
    pub(crate) cwd: String,
}

impl Filesystem {
    // ---- low-level, POSIX-like surface -------------------------------

    pub async fn open(&self, path: &str, flags: OpenFlags) -> Result<i32> {
        let path = path.to_string();
        let cwd = self.cwd.clone();
        let block_size = self.block_size;
        let ino = self
            .store
            .transaction(move |tx| {
                match path::resolve(tx, &path, &cwd) {
                    Ok(ino) => {
                        if flags.contains(OpenFlags::EXCL) && flags.contains(OpenFlags::CREAT) {
                            return Err(Error::Exists);
                        }
                        if flags.writable() && inode::kind_of(tx, ino)? == InodeKind::Directory {
                            return Err(Error::IsDirectory);
                        }
                        if flags.contains(OpenFlags::TRUNC) {
                            crate::block::truncate(tx, ino, block_size, 0)?;
                        }
                        Ok(ino)
                    }
                    Err(Error::NotFound) if flags.contains(OpenFlags::CREAT) => {
                        let (parent, name) = path::resolve_parent(tx, &path, &cwd)?;
                        let ino = inode::allocate(tx, InodeKind::Regular, 0o644)?;
                        dir::link_entry(tx, parent, &name, ino)?;
                        Ok(ino)
                    }
                    Err(e) => Err(e),
                }
            })
            .await?;

        let mut table = self.open_files.lock().await;
        Ok(table.insert(ino, flags))
    }

    pub async fn close(&self, fd: i32) -> Result<()> {
        let (ino, remaining) = {
            let mut table = self.open_files.lock().await;
            table.remove(fd)?
        };
        if remaining == 0 {
            if let Err(e) = self
                .store
                .transaction(move |tx| inode::maybe_delete(tx, ino, 0).map(|_| ()))
                .await
            {
                // Deletion failures during close are logged, not propagated.
                tracing::warn!(ino, error = %e, "maybe_delete failed during close");
            }
        }
        Ok(())
    }

    pub async fn read(&self, fd: i32, length: u64) -> Result<Vec<u8>> {
        let (ino, offset) = {
            let table = self.open_files.lock().await;
            let file = table.get(fd)?;
            if !file.flags.readable() {
                return Err(Error::BadDescriptor);
            }
            (file.ino, file.cursor)
        };
        let block_size = self.block_size;
        let data = self
            .store
            .transaction(move |tx| crate::block::read(tx, ino, block_size, offset, length))
            .await?;
        let mut table = self.open_files.lock().await;
        table.get_mut(fd)?.cursor += data.len() as u64;
        Ok(data)
    }

    pub async fn write(&self, fd: i32, data: &[u8]) -> Result<u64> {
        let (ino, offset, append) = {
            let table = self.open_files.lock().await;
            let file = table.get(fd)?;
            if !file.flags.writable() {
                return Err(Error::BadDescriptor);
            }
            (file.ino, file.cursor, file.flags.contains(OpenFlags::APPEND))
        };
        let block_size = self.block_size;
        let data = data.to_vec();
        let (start, written) = self
            .store
            .transaction(move |tx| {
                // O_APPEND must position at the current size atomically
                // with the write, so re-read size inside this transaction
                // rather than trusting the cursor.
                let start = if append { inode::load(tx, ino)?.size } else { offset };
                let written = crate::block::write(tx, ino, block_size, start, &data)?;
                Ok((start, written))
            })
            .await?;
        let mut table = self.open_files.lock().await;
        table.get_mut(fd)?.cursor = start + written;
        Ok(written)
    }

    pub async fn pread(&self, fd: i32, offset: u64, length: u64) -> Result<Vec<u8>> {
        let ino = {
            let table = self.open_files.lock().await;
            let file = table.get(fd)?;
            if !file.flags.readable() {
                return Err(Error::BadDescriptor);
            }
            file.ino
        };
        let block_size = self.block_size;
        self.store
            .transaction(move |tx| crate::block::read(tx, ino, block_size, offset, length))
            .await
    }

    pub async fn pwrite(&self, fd: i32, offset: u64, data: &[u8]) -> Result<u64> {
        let ino = {
            let table = self.open_files.lock().await;
            let file = table.get(fd)?;
            if !file.flags.writable() {
                return Err(Error::BadDescriptor);
            }
            file.ino
        };
        let block_size = self.block_size;
        let data = data.to_vec();
        self.store
            .transaction(move |tx| crate::block::write(tx, ino, block_size, offset, &data))
            .await
    }

    pub async fn ftruncate(&self, fd: i32, new_size: u64) -> Result<()> {
        let ino = {
            let table = self.open_files.lock().await;
            let file = table.get(fd)?;
            if !file.flags.writable() {
                return Err(Error::BadDescriptor);
            }
            file.ino
        };
        let block_size = self.block_size;
        self.store
            .transaction(move |tx| crate::block::truncate(tx, ino, block_size, new_size))
            .await
    }

    pub async fn fstat(&self, fd: i32) -> Result<Metadata> {
        let ino = self.open_files.lock().await.get(fd)?.ino;
        let inode = self.store.transaction(move |tx| inode::load(tx, ino)).await?;
        Ok(inode.into())
    }

    // ---- high-level, path-oriented surface ----------------------------

    pub async fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
        let fd = self
            .open(path, OpenFlags::WRONLY | OpenFlags::CREAT | OpenFlags::TRUNC)
            .await?;
        let result = self.write(fd, data).await;
        self.close(fd).await?;
        result.map(|_| ())
    }

    pub async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let fd = self.open(path, OpenFlags::RDONLY).await?;
        let meta = self.fstat(fd).await?;
        if meta.kind == InodeKind::Directory {
            self.close(fd).await?;
            return Err(Error::IsDirectory);
        }
        let result = self.pread(fd, 0, meta.size).await;
        self.close(fd).await?;
        result
    }

    pub async fn mkdir(&self, path: &str, recursive: bool) -> Result<()> {
        let path_owned = path.to_string();
        let cwd = self.cwd.clone();
        if recursive {
            let resolved = path::split(path, &cwd)?;
            let mut prefix = String::new();
            for component in &resolved.components {
                prefix.push('/');
                prefix.push_str(component);
                match self.mkdir_one(&prefix).await {
                    Ok(()) | Err(Error::Exists) => {}
                    Err(e) => return Err(e),
                }
            }
            Ok(())
        } else {
            let _ = path_owned;
            self.mkdir_one(path).await
        }
    }

    async fn mkdir_one(&self, path: &str) -> Result<()> {
        let path = path.to_string();
        let cwd = self.cwd.clone();
        self.store
            .transaction(move |tx| {
                let (parent, name) = path::resolve_parent(tx, &path, &cwd)?;
                let ino = inode::allocate(tx, InodeKind::Directory, 0o755)?;
                dir::link_entry(tx, parent, &name, ino)
            })
            .await
    }

    pub async fn readdir(&self, path: &str) -> Result<Vec<DirListEntry>> {
        let path = path.to_string();
        let cwd = self.cwd.clone();
        self.store
            .transaction(move |tx| {
                let ino = path::resolve(tx, &path, &cwd)?;
                let entries = dir::readdir(tx, ino)?;
                let parent = dir::parent_of(tx, ino)?;
                let mut out = vec![
                    DirListEntry { name: ".".into(), kind: InodeKind::Directory, ino },
                    DirListEntry { name: "..".into(), kind: InodeKind::Directory, ino: parent },
                ];
                out.extend(
                    entries
                        .into_iter()
                        .map(|Entry { name, child_ino, kind }| DirListEntry { name, kind, ino: child_ino }),
                );
                Ok(out)
            })
            .await
    }

    pub async fn stat(&self, path: &str) -> Result<Metadata> {
        let path = path.to_string();
        let cwd = self.cwd.clone();
        let inode = self
            .store
            .transaction(move |tx| {
                let ino = path::resolve(tx, &path, &cwd)?;
                inode::load(tx, ino)
            })
            .await?;
        Ok(inode.into())
    }

    pub async fn exists(&self, path: &str) -> Result<bool> {
        match self.stat(path).await {
            Ok(_) => Ok(true),
            Err(Error::NotFound) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let from = from.to_string();
        let to = to.to_string();
        let cwd = self.cwd.clone();
        let open_files = Arc::clone(&self.open_files);
        self.store
            .transaction(move |tx| {
                let open_refs_of = |ino: u64| open_files.blocking_lock().open_refs(ino);
                let (old_parent, old_name) = path::resolve_parent(tx, &from, &cwd)?;
                let (new_parent, new_name) = path::resolve_parent(tx, &to, &cwd)?;
                dir::rename(tx, old_parent, &old_name, new_parent, &new_name, &open_refs_of)
            })
            .await
    }

    pub async fn unlink(&self, path: &str) -> Result<()> {
        let path = path.to_string();
        let cwd = self.cwd.clone();
        let open_files = Arc::clone(&self.open_files);
        self.store
            .transaction(move |tx| {
                let open_refs_of = |ino: u64| open_files.blocking_lock().open_refs(ino);
                let (parent, name) = path::resolve_parent(tx, &path, &cwd)?;
                dir::unlink_entry(tx, parent, &name, InodeKind::Regular, &open_refs_of)
            })
            .await
    }

    pub async fn rmdir(&self, path: &str) -> Result<()> {
        let path = path.to_string();
        let cwd = self.cwd.clone();
        let open_files = Arc::clone(&self.open_files);
        self.store
            .transaction(move |tx| {
                let open_refs_of = |ino: u64| open_files.blocking_lock().open_refs(ino);
                let (parent, name) = path::resolve_parent(tx, &path, &cwd)?;
                dir::unlink_entry(tx, parent, &name, InodeKind::Directory, &open_refs_of)
            })
            .await
    }

    pub async fn link(&self, old_path: &str, new_path: &str) -> Result<()> {
        let old_path = old_path.to_string();
        let new_path = new_path.to_string();
        let cwd = self.cwd.clone();
        self.store
            .transaction(move |tx| {
                let source = path::resolve(tx, &old_path, &cwd)?;
                if inode::kind_of(tx, source)? == InodeKind::Directory {
                    // Real Unix systems disagree here (EPERM vs EISDIR); callers
                    // should treat either as "can't hard-link a directory".
                    return Err(Error::Permission);
                }
                let (parent, name) = path::resolve_parent(tx, &new_path, &cwd)?;
                dir::link_entry(tx, parent, &name, source)
            })
            .await
    }

    /// Symlinks are explicitly unimplemented; this returns a typed signal
    /// rather than omitting the method entirely, so callers that probe for
    /// the capability get a clear answer instead of a missing method.
    pub async fn symlink(&self, _target: &str, _link_path: &str) -> Result<()> {
        Err(Error::Unsupported("symlink"))
    }

    pub async fn readlink(&self, _path: &str) -> Result<String> {
        Err(Error::Unsupported("readlink"))
    }
}
