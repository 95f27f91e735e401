//! Error types for LoamDB.

use thiserror::Error;

/// Result type alias using LoamError.
pub type Result<T> = std::result::Result<T, LoamError>;

/// Errors that can occur in LoamDB operations.
#[derive(Debug, Error)]
pub enum LoamError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Handle lifecycle errors
    #[error("Database is closed")]
    DatabaseClosed,

    // Argument errors
    #[error("Invalid key size: {size} bytes (allowed 1..=65529)")]
    InvalidKeySize { size: usize },

    #[error("Invalid value size: {size} bytes (allowed 1..=65529)")]
    InvalidValueSize { size: usize },

    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter { name: String, value: String },

    // Lookup errors
    #[error("Key not found")]
    KeyNotFound,

    // Storage errors
    #[error("Page corrupted: {page_id}, reason: {reason}")]
    PageCorrupted { page_id: u32, reason: String },

    // Reserved surface
    #[error("Not implemented: {0}")]
    NotImplemented(&'static str),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}
