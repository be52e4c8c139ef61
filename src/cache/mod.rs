//! Persistent, versioned request cache.
//!
//! Requests are fingerprinted into a [`CacheKey`] from their endpoint,
//! normalized query parameters and the current schema version. Responses
//! served from the cache do not count towards any rate limits, so keeping
//! the cache enabled virtually increases them.

mod fs;
mod key;
mod store;

pub use fs::FsStore;
pub use key::{CacheKey, RequestDescriptor};
pub use store::{CacheEntry, CacheStore, MemoryStore, StoreInfo};
