//! Open-file table.
//!
//! In-memory only: maps a process-local descriptor to the inode it was
//! opened against, its flags, and its read/write cursor. This is also
//! where `open_refs` lives — the count [`crate::inode::maybe_delete`] needs
//! to decide whether an unlinked-but-open inode may actually be deleted.
//!
//! Guarded by a single [`tokio::sync::Mutex`] per instance: every filesystem
//! operation runs on a single in-process task runner, so there's no need
//! for anything fancier than mutual exclusion across concurrently-awaiting
//! callers.

use std::collections::HashMap;

use bitflags::bitflags;

use crate::error::{Error, Result};

bitflags! {
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        const RDONLY = 0b0000_0001;
        const WRONLY = 0b0000_0010;
        const RDWR   = 0b0000_0100;
        const CREAT  = 0b0000_1000;
        const EXCL   = 0b0001_0000;
        const TRUNC  = 0b0010_0000;
        const APPEND = 0b0100_0000;
    }
}

impl OpenFlags {
    pub fn readable(self) -> bool {
        self.contains(OpenFlags::RDONLY) || self.contains(OpenFlags::RDWR)
    }

    pub fn writable(self) -> bool {
        self.contains(OpenFlags::WRONLY) || self.contains(OpenFlags::RDWR)
    }
}

#[derive(Clone, Debug)]
pub struct OpenFile {
    pub ino: u64,
    pub flags: OpenFlags,
    pub cursor: u64,
}

#[derive(Default)]
pub struct OpenFileTable {
    files: HashMap<i32, OpenFile>,
    open_refs: HashMap<u64, u32>,
}

impl OpenFileTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates the lowest unused descriptor, POSIX-style.
    pub fn insert(&mut self, ino: u64, flags: OpenFlags) -> i32 {
        let fd = (0..).find(|fd| !self.files.contains_key(fd)).expect("fd space exhausted");
        self.files.insert(fd, OpenFile { ino, flags, cursor: 0 });
        *self.open_refs.entry(ino).or_insert(0) += 1;
        fd
    }

    pub fn get(&self, fd: i32) -> Result<&OpenFile> {
        self.files.get(&fd).ok_or(Error::BadDescriptor)
    }

    pub fn get_mut(&mut self, fd: i32) -> Result<&mut OpenFile> {
        self.files.get_mut(&fd).ok_or(Error::BadDescriptor)
    }

    /// Removes `fd` and returns the inode it pointed to along with the
    /// remaining `open_refs` count, so the caller can decide whether to run
    /// `maybe_delete`.
    pub fn remove(&mut self, fd: i32) -> Result<(u64, u32)> {
        let file = self.files.remove(&fd).ok_or(Error::BadDescriptor)?;
        let refs = self.open_refs.get_mut(&file.ino).expect("open_refs missing for open fd");
        *refs -= 1;
        let remaining = *refs;
        if remaining == 0 {
            self.open_refs.remove(&file.ino);
        }
        Ok((file.ino, remaining))
    }

    pub fn open_refs(&self, ino: u64) -> u32 {
        self.open_refs.get(&ino).copied().unwrap_or(0)
    }
}
