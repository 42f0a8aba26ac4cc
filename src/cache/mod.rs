//! Versioned cache of static responses.
//!
//! Responses are grouped into named generations. The current generation is
//! filled at install; activation deletes every other generation so at most
//! one is ever live.

mod key;
mod manager;
mod storage;

#[cfg(test)]
pub use key::RequestKey;
pub use manager::CacheManager;
pub use storage::{CacheEntry, CacheStorage, SqliteCacheStorage};
