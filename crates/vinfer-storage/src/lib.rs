//! Cache store and raw video storage.
//!
//! This crate provides:
//! - The `CacheBackend` abstraction with filesystem and in-memory backends
//! - `CacheStore`, the authoritative record of computed artifacts
//! - Atomic publish (write-then-rename) for artifacts and metadata
//! - `VideoStore`, the raw video input area kept apart from the cache

pub mod backend;
pub mod codec;
pub mod error;
pub mod fs;
pub mod memory;
pub mod store;
pub mod video_store;

pub use backend::CacheBackend;
pub use error::{StorageError, StorageResult};
pub use fs::FsCacheBackend;
pub use memory::MemoryCacheBackend;
pub use store::CacheStore;
pub use video_store::VideoStore;
