//! Path resolver.
//!
//! Splits a path into components by repeatedly stripping leading slashes and
//! taking the run up to the next slash, checking each component against
//! `.`/`..` as it's produced rather than threading raw components back
//! through the caller.

use rusqlite::Transaction;

use crate::dir;
use crate::error::{Error, Result};
use crate::inode::InodeKind;
use crate::schema::ROOT_INODE;

/// A path split into its components, with `.` dropped and `..` collapsed
/// against a fixed starting stack (never above root).
pub struct Resolved {
    pub components: Vec<String>,
    pub trailing_slash: bool,
}

pub fn split(path: &str, cwd: &str) -> Result<Resolved> {
    if path.is_empty() {
        return Err(Error::InvalidArgument("empty path".into()));
    }
    if path.contains('\0') {
        return Err(Error::InvalidArgument("path contains NUL".into()));
    }

    let trailing_slash = path.len() > 1 && path.ends_with('/');
    let absolute = path.starts_with('/');

    let mut stack: Vec<String> = Vec::new();
    if !absolute {
        for part in cwd.split('/') {
            push_component(&mut stack, part);
        }
    }
    for part in path.split('/') {
        push_component(&mut stack, part);
    }

    Ok(Resolved {
        components: stack,
        trailing_slash,
    })
}

fn push_component(stack: &mut Vec<String>, part: &str) {
    match part {
        "" | "." => {}
        ".." => {
            stack.pop();
        }
        name => stack.push(name.to_string()),
    }
}

/// Resolves a path to its final inode number (`namei`-equivalent). A
/// trailing slash requires the final component to be a directory.
pub fn resolve(tx: &Transaction<'_>, path: &str, cwd: &str) -> Result<u64> {
    let resolved = split(path, cwd)?;
    let mut ino = ROOT_INODE;
    for name in &resolved.components {
        if crate::inode::kind_of(tx, ino)? != InodeKind::Directory {
            return Err(Error::NotDirectory);
        }
        ino = dir::lookup(tx, ino, name)?;
    }
    if resolved.trailing_slash && crate::inode::kind_of(tx, ino)? != InodeKind::Directory {
        return Err(Error::NotDirectory);
    }
    Ok(ino)
}

/// Resolves all but the final component, returning `(parent_ino,
/// final_name)` (`nameiparent`-equivalent). Used by every operation that
/// creates or removes a directory entry.
pub fn resolve_parent(tx: &Transaction<'_>, path: &str, cwd: &str) -> Result<(u64, String)> {
    let resolved = split(path, cwd)?;
    let Some((last, init)) = resolved.components.split_last() else {
        return Err(Error::InvalidArgument("path has no final component".into()));
    };
    let mut ino = ROOT_INODE;
    for name in init {
        if crate::inode::kind_of(tx, ino)? != InodeKind::Directory {
            return Err(Error::NotDirectory);
        }
        ino = dir::lookup(tx, ino, name)?;
    }
    if crate::inode::kind_of(tx, ino)? != InodeKind::Directory {
        return Err(Error::NotDirectory);
    }
    Ok((ino, last.clone()))
}
