//! Custom error types for the common library
//!
//! This module defines the error types raised by the persisted storage
//! backends shared across the workspace.

use thiserror::Error;

/// Custom error type for storage operations
#[derive(Error, Debug)]
pub enum StorageError {
    /// Error occurred while reading or writing the backing file
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored content could not be encoded or decoded
    #[error("Storage serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The in-memory map was poisoned by a panicking writer
    #[error("Storage lock poisoned")]
    Poisoned,
}

/// Type alias for Result with StorageError
pub type StorageResult<T> = Result<T, StorageError>;
