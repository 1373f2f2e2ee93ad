//! Cache Module
//!
//! The cache contract, its store-backed engine, entries, filters and the
//! diagnostic report parser.

mod engine;
mod entry;
mod filter;
mod stats;


// Re-export public types
pub use engine::{Cache, CacheEngine, RedisCache};
pub use entry::CacheEntry;
pub use filter::{AcceptAll, EntryFilter, KeyFilter, WildcardFilter};
pub use stats::InfoParser;
