//! Session persistence for the Kanban session client.
//!
//! This crate provides:
//! - The [`SecureStorage`] key/value trait
//! - A private JSON file backend and an in-memory backend
//! - [`SessionVault`], which stores the serialized session per project

mod file;
mod keys;
mod memory;
mod traits;
mod vault;

pub use file::FileStorage;
pub use keys::StorageKeys;
pub use memory::MemoryStorage;
pub use traits::SecureStorage;
pub use vault::SessionVault;

use std::path::Path;
use thiserror::Error;

/// Error type for storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Encoding/decoding error
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Create the default on-disk storage at `path`.
pub fn create_storage(path: &Path) -> StorageResult<Box<dyn SecureStorage>> {
    Ok(Box::new(FileStorage::new(path)?))
}

/// Create a [`SessionVault`] backed by the default on-disk storage.
pub fn create_session_vault(path: &Path, project_ref: &str) -> StorageResult<SessionVault> {
    let storage = create_storage(path)?;
    Ok(SessionVault::new(storage, project_ref))
}
