//! Error kinds surfaced by the filesystem kernel.
//!
//! Mirrors the errno vocabulary a POSIX caller expects: each variant names
//! the condition, not the layer that raised it, so callers don't need to
//! know whether a `NotFound` came from the path resolver or the directory
//! layer.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("no such file or directory")]
    NotFound,

    #[error("file exists")]
    Exists,

    #[error("not a directory")]
    NotDirectory,

    #[error("is a directory")]
    IsDirectory,

    #[error("directory not empty")]
    NotEmpty,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("bad file descriptor")]
    BadDescriptor,

    #[error("operation not supported: {0}")]
    Unsupported(&'static str),

    #[error("permission denied")]
    Permission,

    #[error("backing store error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("backing store task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type Result<T> = core::result::Result<T, Error>;
