//! Cache Filters
//!
//! Predicates used by the filtered enumeration and removal operations.
//! Key filters see only the logical key; entry filters see a materialized
//! entry.

use regex::Regex;

use crate::cache::CacheEntry;
use crate::codec::glob_regex;
use crate::error::{CacheError, Result};

// == Key Filter ==
pub trait KeyFilter: Send + Sync {
    fn accept(&self, key: &str) -> bool;

    /// When true the engine skips per-key testing and takes the bulk path.
    fn accepts_all(&self) -> bool {
        false
    }
}

// == Entry Filter ==
pub trait EntryFilter: Send + Sync {
    fn accept(&self, entry: &CacheEntry) -> bool;

    /// When true the engine skips per-entry testing and takes the bulk path.
    fn accepts_all(&self) -> bool {
        false
    }
}

impl<F> KeyFilter for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn accept(&self, key: &str) -> bool {
        self(key)
    }
}

impl<F> EntryFilter for F
where
    F: Fn(&CacheEntry) -> bool + Send + Sync,
{
    fn accept(&self, entry: &CacheEntry) -> bool {
        self(entry)
    }
}

// == Accept All ==
/// Marker filter accepting every key and entry.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl KeyFilter for AcceptAll {
    fn accept(&self, _: &str) -> bool {
        true
    }

    fn accepts_all(&self) -> bool {
        true
    }
}

impl EntryFilter for AcceptAll {
    fn accept(&self, _: &CacheEntry) -> bool {
        true
    }

    fn accepts_all(&self) -> bool {
        true
    }
}

// == Wildcard Filter ==
/// Case-insensitive glob pattern over logical keys.
#[derive(Debug, Clone)]
pub struct WildcardFilter {
    pattern: String,
    matcher: Regex,
}

impl WildcardFilter {
    pub fn new(pattern: &str) -> Result<Self> {
        let pattern = pattern.trim().to_string();
        let matcher = glob_regex(&pattern, true)
            .map_err(|e| CacheError::Config(format!("invalid key pattern {}: {}", pattern, e)))?;
        Ok(Self { pattern, matcher })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }
}

impl KeyFilter for WildcardFilter {
    fn accept(&self, key: &str) -> bool {
        self.matcher.is_match(key)
    }

    fn accepts_all(&self) -> bool {
        self.pattern == "*"
    }
}

impl EntryFilter for WildcardFilter {
    fn accept(&self, entry: &CacheEntry) -> bool {
        self.matcher.is_match(entry.key())
    }

    fn accepts_all(&self) -> bool {
        self.pattern == "*"
    }
}
