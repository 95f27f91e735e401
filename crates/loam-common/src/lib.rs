//! LoamDB common types, errors, and configuration.
//!
//! This crate provides shared definitions used across all LoamDB components.

pub mod config;
pub mod error;

pub use config::{os_page_size, StorageConfig, DEFAULT_PAGE_SIZE};
pub use error::{LoamError, Result};
