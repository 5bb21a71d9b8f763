//! MediaLibrarian File System Layer
//!
//! Provides the file primitives that batch actions are built on:
//! - Chunked copy that honours pause and cancellation between chunks
//! - Move with cross-filesystem fallback, rename, delete
//! - Atomic writes for metadata and downloaded artifacts
//! - Modification-time touching
//! - Same-volume detection for lane classification

mod control;
mod file_operations;
mod volume;

pub use control::OpControl;
pub use file_operations::{FileOpError, FileOperations, MoveMethod, Result};
pub use volume::same_volume;
