//! Configuration structures for LoamDB.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Fallback page size when the OS page size cannot be probed.
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Storage configuration for the database engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path of the database file.
    pub path: PathBuf,
    /// Page size in bytes. New files are laid out with this size; it must be
    /// a power of two.
    pub page_size: usize,
    /// Request direct I/O (bypass the OS page cache).
    pub direct_io: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./local/loam.db"),
            page_size: os_page_size(),
            direct_io: true,
        }
    }
}

impl StorageConfig {
    /// Creates a configuration for the given database file path with the
    /// remaining fields at their defaults.
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }
}

/// Returns the OS memory-page size.
pub fn os_page_size() -> usize {
    #[cfg(unix)]
    {
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if size > 0 {
            return size as usize;
        }
    }
    DEFAULT_PAGE_SIZE
}
