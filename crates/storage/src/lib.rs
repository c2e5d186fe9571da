//! Durable storage for the duration model.
//!
//! A trait-based interface with a JSON-file implementation that replaces
//! files atomically, so readers never observe a partial write.

#![warn(missing_docs)]

pub mod trait_;
pub mod json_storage;

pub use trait_::{Storage, StorageError, Result};
pub use json_storage::JsonStorage;
