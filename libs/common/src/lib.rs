//! Common library for the attendance client
//!
//! This crate provides functionality shared by the client crates, currently
//! the persisted key/value storage that holds session credentials and its
//! error type.

pub mod error;
pub mod storage;

pub use error::{StorageError, StorageResult};
pub use storage::{FileStore, KeyValueStore, MemoryStore};

/// Example usage of the storage module
///
/// ```rust,no_run
/// use common::storage::{FileStore, KeyValueStore};
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = FileStore::open(".attendance/session.json")?;
///     store.set("accessToken", "eyJ...")?;
///     println!("Stored token: {:?}", store.get("accessToken")?);
///     Ok(())
/// }
/// ```
pub fn example_usage() {}
