//! LoamDB: an embedded, single-file, disk-backed ordered key-value store.
//!
//! A database is one file of fixed-size slotted pages holding a B+Tree.
//! Clients open it by path and perform point lookups and upserts over
//! arbitrary byte-string keys and values:
//!
//! ```no_run
//! use loam_db::Database;
//!
//! # fn main() -> loam_db::Result<()> {
//! let db = Database::open("./local/loam.db")?;
//! db.upsert(b"hello", b"world")?;
//! assert_eq!(db.find(b"hello")?.as_ref(), b"world");
//! db.close()?;
//! # Ok(())
//! # }
//! ```

mod database;

pub use database::Database;
pub use loam_common::{LoamError, Result, StorageConfig};
pub use loam_storage::UpsertOutcome;
