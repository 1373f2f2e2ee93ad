//! Store Module
//!
//! The key-value store capability the cache engine talks to, plus the pooled
//! Redis provider and an in-process provider.

mod memory;
mod pool;

use async_trait::async_trait;
use thiserror::Error;

pub use self::memory::{MemoryConnection, MemoryStore};
pub use self::pool::{RedisConnection, RedisConnectionProvider, RedisManager};

// == Store Error ==
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The slot holds a different structure than the command expects
    #[error("{0}")]
    WrongType(String),

    /// Store unreachable, timed out, or pool unavailable
    #[error("{0}")]
    Connection(String),

    /// Any other command failure
    #[error("{0}")]
    Command(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

// == Store Connection ==
/// One borrowed connection. Dropping it returns it to its provider.
#[async_trait]
pub trait StoreConnection: Send {
    async fn get(&mut self, key: &[u8]) -> StoreResult<Option<Vec<u8>>>;

    async fn lpop(&mut self, key: &[u8]) -> StoreResult<Option<Vec<u8>>>;

    async fn set(&mut self, key: &[u8], value: &[u8]) -> StoreResult<()>;

    async fn set_ex(&mut self, key: &[u8], value: &[u8], seconds: u64) -> StoreResult<()>;

    /// Deletes the given keys and returns how many existed.
    async fn del(&mut self, keys: &[Vec<u8>]) -> StoreResult<u64>;

    async fn exists(&mut self, key: &[u8]) -> StoreResult<bool>;

    /// Keys matching a glob pattern.
    async fn keys(&mut self, pattern: &[u8]) -> StoreResult<Vec<Vec<u8>>>;

    /// Values for the given keys; missing keys yield `None`.
    async fn mget(&mut self, keys: &[Vec<u8>]) -> StoreResult<Vec<Option<Vec<u8>>>>;

    /// Free-form diagnostic report.
    async fn info(&mut self) -> StoreResult<String>;
}

// == Connection Provider ==
/// Hands out connections to the store.
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    type Connection: StoreConnection + 'static;

    async fn acquire(&self) -> StoreResult<Self::Connection>;

    /// Topology name for diagnostics.
    fn topology(&self) -> &'static str;
}
