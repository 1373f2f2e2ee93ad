//! Cache Engine Module
//!
//! The cache contract and its store-backed implementation. Every operation
//! encodes the key, borrows one connection for its round trips, and releases
//! it when the connection handle goes out of scope.

use std::collections::BTreeMap;
use std::slice;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::cache::{AcceptAll, CacheEntry, EntryFilter, InfoParser, KeyFilter};
use crate::codec::{KeyCodec, ValueCodec, ValueSerializer};
use crate::config::CacheConfiguration;
use crate::error::{CacheError, Result};
use crate::store::{ConnectionProvider, RedisConnectionProvider, StoreConnection, StoreError};

// == Cache Contract ==
/// Operations the host application uses; it never sees the store protocol.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Fetches an entry, failing with `NotFound` when the key is absent.
    async fn get_entry(&self, key: &str) -> Result<CacheEntry>;

    /// Fetches an entry, returning `default` on any failure.
    async fn get_entry_or(&self, key: &str, default: Option<CacheEntry>) -> Option<CacheEntry> {
        match self.get_entry(key).await {
            Ok(entry) => Some(entry),
            Err(_) => default,
        }
    }

    async fn get_value(&self, key: &str) -> Result<Value> {
        Ok(self.get_entry(key).await?.into_value())
    }

    async fn get_value_or(&self, key: &str, default: Value) -> Value {
        match self.get_entry(key).await {
            Ok(entry) => entry.into_value(),
            Err(_) => default,
        }
    }

    /// Stores a value.
    ///
    /// # Arguments
    /// * `idle_ms` - Idle time in milliseconds; a negative value stores the
    ///   value without any expiry, ignoring the configured default TTL
    /// * `expire_ms` - Expiry in milliseconds, takes precedence over `idle_ms`
    async fn put(
        &self,
        key: &str,
        value: &Value,
        idle_ms: Option<i64>,
        expire_ms: Option<i64>,
    ) -> Result<()>;

    async fn contains(&self, key: &str) -> Result<bool>;

    /// Removes one key, returning whether it existed.
    async fn remove(&self, key: &str) -> Result<bool>;

    async fn remove_matching(&self, filter: &dyn KeyFilter) -> Result<usize>;

    async fn remove_where(&self, filter: &dyn EntryFilter) -> Result<usize>;

    async fn keys(&self) -> Result<Vec<String>> {
        self.keys_matching(&AcceptAll).await
    }

    async fn keys_matching(&self, filter: &dyn KeyFilter) -> Result<Vec<String>>;

    async fn keys_where(&self, filter: &dyn EntryFilter) -> Result<Vec<String>>;

    /// Values of all keys. A key that vanished after the scan yields `None`.
    async fn values(&self) -> Result<Vec<Option<Value>>> {
        self.values_matching(&AcceptAll).await
    }

    async fn values_matching(&self, filter: &dyn KeyFilter) -> Result<Vec<Option<Value>>>;

    async fn values_where(&self, filter: &dyn EntryFilter) -> Result<Vec<Option<Value>>>;

    async fn entries(&self) -> Result<Vec<CacheEntry>> {
        self.entries_matching(&AcceptAll).await
    }

    async fn entries_matching(&self, filter: &dyn KeyFilter) -> Result<Vec<CacheEntry>>;

    async fn entries_where(&self, filter: &dyn EntryFilter) -> Result<Vec<CacheEntry>>;

    fn hit_count(&self) -> u64;

    fn miss_count(&self) -> u64;

    /// Cache info annotated with the store's diagnostic report.
    async fn custom_info(&self) -> Result<BTreeMap<String, String>>;
}

// == Cache Engine ==
/// Cache backed by any connection provider.
pub struct CacheEngine<P: ConnectionProvider> {
    provider: P,
    key_codec: KeyCodec,
    serializer: ValueSerializer,
    config: CacheConfiguration,
}

/// Cache backed by a pooled Redis connection, direct or sentinel.
pub type RedisCache = CacheEngine<RedisConnectionProvider>;

impl CacheEngine<RedisConnectionProvider> {
    /// Creates a Redis-backed cache. No connection is opened until the first
    /// operation.
    pub fn new(config: CacheConfiguration) -> Self {
        let provider = RedisConnectionProvider::new(config.clone());
        Self::with_provider(config, provider)
    }

    /// Creates a Redis-backed cache from the host's option struct.
    pub fn from_arguments(args: &Map<String, Value>) -> Result<Self> {
        Ok(Self::new(CacheConfiguration::from_arguments(args)?))
    }
}

impl<P: ConnectionProvider> CacheEngine<P> {
    pub fn with_provider(config: CacheConfiguration, provider: P) -> Self {
        Self {
            provider,
            key_codec: KeyCodec::new(config.namespace.as_deref()),
            serializer: ValueSerializer::default(),
            config,
        }
    }

    /// Replaces the value codec.
    pub fn with_codec(mut self, codec: Arc<dyn ValueCodec>) -> Self {
        self.serializer = ValueSerializer::new(codec);
        self
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn config(&self) -> &CacheConfiguration {
        &self.config
    }

    pub fn key_codec(&self) -> &KeyCodec {
        &self.key_codec
    }

    /// Stores any serializable value.
    pub async fn put_as<T>(
        &self,
        key: &str,
        value: &T,
        idle_ms: Option<i64>,
        expire_ms: Option<i64>,
    ) -> Result<()>
    where
        T: Serialize + Sync + ?Sized,
    {
        let value =
            serde_json::to_value(value).map_err(|e| CacheError::Serialization(e.to_string()))?;
        self.put(key, &value, idle_ms, expire_ms).await
    }

    /// Reads a value into a concrete type.
    pub async fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let value = self.get_value(key).await?;
        serde_json::from_value(value).map_err(|e| CacheError::Deserialization(e.to_string()))
    }

    // == TTL ==
    /// TTL in seconds for a `put`, or `None` to store without expiry.
    fn effective_ttl(&self, idle_ms: Option<i64>, expire_ms: Option<i64>) -> Option<u64> {
        let seconds = match (expire_ms, idle_ms) {
            (Some(expire), _) => millis_to_seconds(expire),
            (None, Some(idle)) if idle < 0 => return None,
            (None, Some(idle)) => millis_to_seconds(idle),
            (None, None) => self.config.default_ttl.unwrap_or(0),
        };
        (seconds > 0).then_some(seconds)
    }

    async fn connection(&self) -> Result<P::Connection> {
        Ok(self.provider.acquire().await?)
    }

    fn entry_from(&self, wire_key: &[u8], bytes: Vec<u8>) -> Result<CacheEntry> {
        let size = bytes.len() as u64;
        let value = self.serializer.deserialize(&bytes)?;
        Ok(CacheEntry::new(self.key_codec.decode(wire_key), value, size))
    }

    fn decode_value(&self, bytes: Option<Vec<u8>>) -> Result<Option<Value>> {
        bytes.map(|b| self.serializer.deserialize(&b)).transpose()
    }

    /// Wire keys of the namespace whose logical key passes the filter.
    async fn scan(
        &self,
        conn: &mut P::Connection,
        filter: &dyn KeyFilter,
    ) -> Result<Vec<Vec<u8>>> {
        let wire_keys = conn.keys(&self.key_codec.wildcard()).await?;
        if filter.accepts_all() {
            return Ok(wire_keys);
        }
        Ok(wire_keys
            .into_iter()
            .filter(|k| filter.accept(&self.key_codec.decode(k)))
            .collect())
    }

    /// Reads one entry during enumeration. Keys that vanished or hold a
    /// non-scalar value are skipped.
    async fn fetch_quiet(
        &self,
        conn: &mut P::Connection,
        wire_key: &[u8],
    ) -> Result<Option<CacheEntry>> {
        match conn.get(wire_key).await {
            Ok(Some(bytes)) => self.entry_from(wire_key, bytes).map(Some),
            Ok(None) | Err(StoreError::WrongType(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Materializes every entry of the namespace and keeps those passing
    /// the filter.
    async fn filtered_entries(&self, filter: &dyn EntryFilter) -> Result<Vec<CacheEntry>> {
        let mut conn = self.connection().await?;
        let wire_keys = self.scan(&mut conn, &AcceptAll).await?;

        let mut entries = Vec::new();
        for wire_key in &wire_keys {
            if let Some(entry) = self.fetch_quiet(&mut conn, wire_key).await? {
                if filter.accept(&entry) {
                    entries.push(entry);
                }
            }
        }
        Ok(entries)
    }
}

fn millis_to_seconds(ms: i64) -> u64 {
    if ms <= 0 {
        0
    } else {
        (ms as u64).div_ceil(1000)
    }
}

#[async_trait]
impl<P: ConnectionProvider> Cache for CacheEngine<P> {
    async fn get_entry(&self, key: &str) -> Result<CacheEntry> {
        let wire_key = self.key_codec.encode(key);
        let mut conn = self.connection().await?;

        let bytes = match conn.get(&wire_key).await {
            Ok(bytes) => bytes,
            Err(StoreError::WrongType(_)) => {
                // slot written by another subsystem as a list
                warn!("Key {} holds a non-scalar value, popping one element", key);
                conn.lpop(&wire_key).await?
            }
            Err(e) => return Err(e.into()),
        };

        let bytes = bytes.ok_or_else(|| CacheError::NotFound(key.to_string()))?;
        self.entry_from(&wire_key, bytes)
    }

    async fn put(
        &self,
        key: &str,
        value: &Value,
        idle_ms: Option<i64>,
        expire_ms: Option<i64>,
    ) -> Result<()> {
        let bytes = self.serializer.serialize(value)?;
        let wire_key = self.key_codec.encode(key);
        let mut conn = self.connection().await?;

        match self.effective_ttl(idle_ms, expire_ms) {
            Some(seconds) => conn.set_ex(&wire_key, &bytes, seconds).await?,
            None => conn.set(&wire_key, &bytes).await?,
        }
        Ok(())
    }

    async fn contains(&self, key: &str) -> Result<bool> {
        let wire_key = self.key_codec.encode(key);
        let mut conn = self.connection().await?;
        Ok(conn.exists(&wire_key).await?)
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        let wire_key = self.key_codec.encode(key);
        let mut conn = self.connection().await?;
        Ok(conn.del(slice::from_ref(&wire_key)).await? > 0)
    }

    async fn remove_matching(&self, filter: &dyn KeyFilter) -> Result<usize> {
        let mut conn = self.connection().await?;
        let wire_keys = self.scan(&mut conn, filter).await?;

        if filter.accepts_all() {
            let removed = conn.del(&wire_keys).await?;
            debug!("Bulk removed {} of {} keys", removed, wire_keys.len());
            return Ok(removed as usize);
        }

        let mut removed = 0;
        for wire_key in &wire_keys {
            removed += conn.del(slice::from_ref(wire_key)).await?;
        }
        Ok(removed as usize)
    }

    async fn remove_where(&self, filter: &dyn EntryFilter) -> Result<usize> {
        if filter.accepts_all() {
            return self.remove_matching(&AcceptAll).await;
        }

        let mut conn = self.connection().await?;
        let wire_keys = self.scan(&mut conn, &AcceptAll).await?;

        let mut removed = 0;
        for wire_key in &wire_keys {
            let Some(entry) = self.fetch_quiet(&mut conn, wire_key).await? else {
                continue;
            };
            if filter.accept(&entry) {
                removed += conn.del(slice::from_ref(wire_key)).await?;
            }
        }
        Ok(removed as usize)
    }

    async fn keys_matching(&self, filter: &dyn KeyFilter) -> Result<Vec<String>> {
        let mut conn = self.connection().await?;
        let wire_keys = self.scan(&mut conn, filter).await?;
        Ok(wire_keys.iter().map(|k| self.key_codec.decode(k)).collect())
    }

    async fn keys_where(&self, filter: &dyn EntryFilter) -> Result<Vec<String>> {
        if filter.accepts_all() {
            return self.keys().await;
        }
        let entries = self.filtered_entries(filter).await?;
        Ok(entries.into_iter().map(|e| e.key().to_string()).collect())
    }

    async fn values_matching(&self, filter: &dyn KeyFilter) -> Result<Vec<Option<Value>>> {
        let mut conn = self.connection().await?;
        let wire_keys = self.scan(&mut conn, filter).await?;
        if wire_keys.is_empty() {
            return Ok(Vec::new());
        }

        conn.mget(&wire_keys)
            .await?
            .into_iter()
            .map(|bytes| self.decode_value(bytes))
            .collect()
    }

    async fn values_where(&self, filter: &dyn EntryFilter) -> Result<Vec<Option<Value>>> {
        if filter.accepts_all() {
            return self.values().await;
        }
        let entries = self.filtered_entries(filter).await?;
        Ok(entries.into_iter().map(|e| Some(e.into_value())).collect())
    }

    async fn entries_matching(&self, filter: &dyn KeyFilter) -> Result<Vec<CacheEntry>> {
        let mut conn = self.connection().await?;
        let wire_keys = self.scan(&mut conn, filter).await?;
        if wire_keys.is_empty() {
            return Ok(Vec::new());
        }

        let values = conn.mget(&wire_keys).await?;
        if values.len() == wire_keys.len() {
            // keys that expired since the scan come back empty and are skipped
            return wire_keys
                .iter()
                .zip(values)
                .filter_map(|(k, v)| v.map(|bytes| self.entry_from(k, bytes)))
                .collect();
        }

        debug!(
            "Store returned {} values for {} keys, fetching keys one by one",
            values.len(),
            wire_keys.len()
        );
        let mut entries = Vec::with_capacity(wire_keys.len());
        for wire_key in &wire_keys {
            if let Some(entry) = self.fetch_quiet(&mut conn, wire_key).await? {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    async fn entries_where(&self, filter: &dyn EntryFilter) -> Result<Vec<CacheEntry>> {
        if filter.accepts_all() {
            return self.entries().await;
        }
        Ok(self
            .entries()
            .await?
            .into_iter()
            .filter(|e| filter.accept(e))
            .collect())
    }

    fn hit_count(&self) -> u64 {
        0
    }

    fn miss_count(&self) -> u64 {
        0
    }

    async fn custom_info(&self) -> Result<BTreeMap<String, String>> {
        let mut known = BTreeMap::new();
        known.insert("hit_count".to_string(), self.hit_count().to_string());
        known.insert("miss_count".to_string(), self.miss_count().to_string());
        known.insert("topology".to_string(), self.provider.topology().to_string());
        if let Some(namespace) = &self.config.namespace {
            known.insert("namespace".to_string(), namespace.clone());
        }
        if let Some(ttl) = self.config.default_ttl {
            known.insert("default_ttl".to_string(), ttl.to_string());
        }

        let mut conn = self.connection().await?;
        let report = conn.info().await?;
        Ok(InfoParser::parse(&known, &report))
    }
}
