//! Instance configuration.
//!
//! Kept separate from [`crate::instance`] so hosts can deserialize it from
//! whatever configuration format they already use (TOML, JSON, environment)
//! without pulling the rest of the crate into their config-loading path.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Where an instance's backing database lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Backend {
    /// A private, non-durable in-memory database. Useful for tests and
    /// scratch instances; nothing survives process exit.
    Memory,
    /// A file on the local filesystem, opened (and created if absent) with
    /// `rusqlite`.
    File(PathBuf),
}

/// Per-instance configuration, provided once at [`crate::instance::open`]
/// time.
///
/// `block_size` only takes effect the first time an instance is created; on
/// every later open it is compared against the stored superblock value and
/// a mismatch is rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceConfig {
    pub backend: Backend,
    /// Block size in bytes used for fresh instances. Default 4096.
    #[serde(default = "default_block_size")]
    pub block_size: u32,
    /// Default working directory used to resolve relative paths.
    #[serde(default = "default_cwd")]
    pub cwd: String,
}

fn default_block_size() -> u32 {
    4096
}

fn default_cwd() -> String {
    "/".to_string()
}

impl InstanceConfig {
    pub fn memory() -> Self {
        Self {
            backend: Backend::Memory,
            block_size: default_block_size(),
            cwd: default_cwd(),
        }
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            backend: Backend::File(path.into()),
            block_size: default_block_size(),
            cwd: default_cwd(),
        }
    }

    pub fn with_block_size(mut self, block_size: u32) -> Self {
        self.block_size = block_size;
        self
    }
}
