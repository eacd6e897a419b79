//! Incremental build cache: remembers the input fingerprint and outputs of
//! every executed build task.

mod error;
mod store;

pub use crate::error::CacheError;
pub use crate::store::{CacheStore, CachedTask, SqliteCacheStore};
