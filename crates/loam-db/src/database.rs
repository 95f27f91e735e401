//! The public database handle.
//!
//! A thin locking wrapper over the storage engine: every operation holds the
//! handle's mutex for its whole span, giving the single-operation-at-a-time
//! semantics the engine expects. Closing takes the engine out of the handle,
//! so later operations (and a second close) report the database as closed.

use bytes::Bytes;
use loam_common::{LoamError, Result, StorageConfig};
use loam_storage::{BTree, UpsertOutcome, MAX_KEY_SIZE, MAX_VALUE_SIZE};
use parking_lot::Mutex;
use std::path::Path;
use tracing::info;

/// An open LoamDB database.
pub struct Database {
    engine: Mutex<Option<BTree>>,
}

impl Database {
    /// Opens the database at `path`, creating the file and missing parent
    /// directories if needed. An empty path selects the default local path.
    pub fn open(path: impl AsRef<Path>) -> Result<Database> {
        let path = path.as_ref();
        let mut config = StorageConfig::default();
        if !path.as_os_str().is_empty() {
            config.path = path.to_path_buf();
        }
        Self::open_with(config)
    }

    /// Opens the database with an explicit storage configuration.
    pub fn open_with(config: StorageConfig) -> Result<Database> {
        let engine = BTree::open(&config)?;
        info!(path = %config.path.display(), "opened database");
        Ok(Database {
            engine: Mutex::new(Some(engine)),
        })
    }

    /// Looks up a key. Absent keys report [`LoamError::KeyNotFound`].
    pub fn find(&self, key: &[u8]) -> Result<Bytes> {
        check_key(key)?;
        let mut guard = self.engine.lock();
        let engine = guard.as_mut().ok_or(LoamError::DatabaseClosed)?;
        engine.find(key)
    }

    /// Inserts a key or replaces its value. The outcome reports whether the
    /// mutation split a node, an advisory signal for metrics and tests.
    pub fn upsert(&self, key: &[u8], value: &[u8]) -> Result<UpsertOutcome> {
        check_key(key)?;
        check_value(value)?;
        let mut guard = self.engine.lock();
        let engine = guard.as_mut().ok_or(LoamError::DatabaseClosed)?;
        engine.upsert(key, value)
    }

    /// Reserved operation: deletion is not implemented yet. The call
    /// validates its argument and succeeds without modifying the tree; a
    /// future revision adds rebalance/merge semantics.
    pub fn remove(&self, key: &[u8]) -> Result<()> {
        check_key(key)?;
        let mut guard = self.engine.lock();
        let engine = guard.as_mut().ok_or(LoamError::DatabaseClosed)?;
        engine.remove(key)
    }

    /// Flushes every dirty node and closes the backing file. A second close
    /// reports [`LoamError::DatabaseClosed`].
    pub fn close(&self) -> Result<()> {
        let mut guard = self.engine.lock();
        let engine = guard.take().ok_or(LoamError::DatabaseClosed)?;
        engine.close()
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        // best-effort flush for handles dropped without a clean close
        let _ = self.close();
    }
}

fn check_key(key: &[u8]) -> Result<()> {
    if key.is_empty() || key.len() > MAX_KEY_SIZE {
        return Err(LoamError::InvalidKeySize { size: key.len() });
    }
    Ok(())
}

fn check_value(value: &[u8]) -> Result<()> {
    if value.is_empty() || value.len() > MAX_VALUE_SIZE {
        return Err(LoamError::InvalidValueSize { size: value.len() });
    }
    Ok(())
}
