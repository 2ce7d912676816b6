//! Persistence backends for the vault
//!
//! This module provides two backends:
//! 1. File storage (one JSON document, atomic replace)
//! 2. Memory storage (tests and embedding)

mod file;
mod memory;
mod traits;

pub use file::FileStorage;
pub use memory::MemoryStorage;
pub use traits::VaultPersistence;
