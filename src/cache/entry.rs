//! Cache Entry Module
//!
//! Immutable snapshot of a value read from the store.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

// == Cache Entry ==
/// A key/value/size triple handed back to callers.
///
/// The store tracks no access metadata, so the timestamps are always empty,
/// the hit count is zero and the custom info map is empty.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheEntry {
    key: String,
    value: Value,
    size: u64,
    last_hit: Option<DateTime<Utc>>,
    last_modified: Option<DateTime<Utc>>,
    created: Option<DateTime<Utc>>,
    hit_count: u64,
    custom_info: BTreeMap<String, String>,
}

impl CacheEntry {
    // == Constructor ==
    /// Creates an entry.
    ///
    /// # Arguments
    /// * `key` - Logical key, namespace removed
    /// * `value` - Deserialized payload
    /// * `size` - Length of the stored bytes
    pub fn new(key: impl Into<String>, value: Value, size: u64) -> Self {
        Self {
            key: key.into(),
            value,
            size,
            last_hit: None,
            last_modified: None,
            created: None,
            hit_count: 0,
            custom_info: BTreeMap::new(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Consumes the entry, returning its value.
    pub fn into_value(self) -> Value {
        self.value
    }

    /// Size of the stored bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn last_hit(&self) -> Option<DateTime<Utc>> {
        self.last_hit
    }

    pub fn last_modified(&self) -> Option<DateTime<Utc>> {
        self.last_modified
    }

    pub fn created(&self) -> Option<DateTime<Utc>> {
        self.created
    }

    pub fn hit_count(&self) -> u64 {
        self.hit_count
    }

    /// Configured lifetime in milliseconds; not tracked, always zero.
    pub fn live_time_span(&self) -> u64 {
        0
    }

    /// Configured idle time in milliseconds; not tracked, always zero.
    pub fn idle_time_span(&self) -> u64 {
        0
    }

    pub fn custom_info(&self) -> &BTreeMap<String, String> {
        &self.custom_info
    }
}
