//! Redis Cache - A namespaced cache provider backed by a Redis store
//!
//! Maps a host application's cache contract onto a remote key-value store
//! reached directly or through sentinels, with pooled connections, key
//! namespacing and a pluggable value codec.

pub mod cache;
pub mod codec;
pub mod config;
pub mod error;
pub mod store;

pub use cache::{Cache, CacheEngine, CacheEntry, RedisCache};
pub use config::{CacheConfiguration, Topology};
pub use error::{CacheError, Result};
