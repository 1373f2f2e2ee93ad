//! In-Memory Store
//!
//! A process-local provider implementing the same store capability as Redis:
//! string and list slots, expiring keys, glob `KEYS` and an `INFO` report.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{ConnectionProvider, StoreConnection, StoreError, StoreResult};
use crate::codec::glob_regex;

const WRONGTYPE: &str = "WRONGTYPE Operation against a key holding the wrong kind of value";

#[derive(Debug, Clone)]
enum Slot {
    Scalar(Vec<u8>),
    List(VecDeque<Vec<u8>>),
}

#[derive(Debug, Clone)]
struct Stored {
    slot: Slot,
    expires_at: Option<Instant>,
}

impl Stored {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

type Slots = BTreeMap<Vec<u8>, Stored>;

// == Memory Store ==
/// Shared in-process key space. Clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    slots: Arc<RwLock<Slots>>,
    outstanding: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys.
    pub async fn len(&self) -> usize {
        let mut slots = self.slots.write().await;
        purge_expired(&mut slots);
        slots.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Remaining TTL of a wire key in seconds, with the store's conventions:
    /// `-2` when the key is missing and `-1` when it never expires.
    pub async fn ttl(&self, wire_key: &str) -> i64 {
        let mut slots = self.slots.write().await;
        purge_expired(&mut slots);
        match slots.get(wire_key.as_bytes()) {
            None => -2,
            Some(Stored {
                expires_at: None, ..
            }) => -1,
            Some(Stored {
                expires_at: Some(at),
                ..
            }) => {
                let remaining = at.saturating_duration_since(Instant::now());
                ((remaining.as_millis() + 500) / 1000) as i64
            }
        }
    }

    /// Writes raw bytes under a wire key, bypassing the value codec.
    pub async fn set_raw(&self, wire_key: &str, value: impl Into<Vec<u8>>) {
        let mut slots = self.slots.write().await;
        slots.insert(
            wire_key.as_bytes().to_vec(),
            Stored {
                slot: Slot::Scalar(value.into()),
                expires_at: None,
            },
        );
    }

    /// Appends values to a list slot, creating it if needed.
    pub async fn push_list(&self, wire_key: &str, values: Vec<Vec<u8>>) -> StoreResult<usize> {
        let mut slots = self.slots.write().await;
        purge_expired(&mut slots);
        let stored = slots
            .entry(wire_key.as_bytes().to_vec())
            .or_insert_with(|| Stored {
                slot: Slot::List(VecDeque::new()),
                expires_at: None,
            });
        match &mut stored.slot {
            Slot::List(list) => {
                list.extend(values);
                Ok(list.len())
            }
            Slot::Scalar(_) => Err(StoreError::WrongType(WRONGTYPE.to_string())),
        }
    }

    /// Connections currently borrowed and not yet dropped.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }
}

fn purge_expired(slots: &mut Slots) {
    let now = Instant::now();
    slots.retain(|_, stored| !stored.is_expired(now));
}

#[async_trait]
impl ConnectionProvider for MemoryStore {
    type Connection = MemoryConnection;

    async fn acquire(&self) -> StoreResult<MemoryConnection> {
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        Ok(MemoryConnection {
            store: self.clone(),
        })
    }

    fn topology(&self) -> &'static str {
        "memory"
    }
}

// == Memory Connection ==
pub struct MemoryConnection {
    store: MemoryStore,
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.store.outstanding.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MemoryConnection {
    async fn insert(&self, key: &[u8], value: &[u8], ttl: Option<Duration>) {
        let mut slots = self.store.slots.write().await;
        slots.insert(
            key.to_vec(),
            Stored {
                slot: Slot::Scalar(value.to_vec()),
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
    }
}

#[async_trait]
impl StoreConnection for MemoryConnection {
    async fn get(&mut self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        let mut slots = self.store.slots.write().await;
        purge_expired(&mut slots);
        match slots.get(key).map(|s| &s.slot) {
            None => Ok(None),
            Some(Slot::Scalar(value)) => Ok(Some(value.clone())),
            Some(Slot::List(_)) => Err(StoreError::WrongType(WRONGTYPE.to_string())),
        }
    }

    async fn lpop(&mut self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        let mut slots = self.store.slots.write().await;
        purge_expired(&mut slots);
        let popped = match slots.get_mut(key).map(|s| &mut s.slot) {
            None => return Ok(None),
            Some(Slot::Scalar(_)) => return Err(StoreError::WrongType(WRONGTYPE.to_string())),
            Some(Slot::List(list)) => (list.pop_front(), list.is_empty()),
        };
        // an emptied list disappears, as in the real store
        if popped.1 {
            slots.remove(key);
        }
        Ok(popped.0)
    }

    async fn set(&mut self, key: &[u8], value: &[u8]) -> StoreResult<()> {
        self.insert(key, value, None).await;
        Ok(())
    }

    async fn set_ex(&mut self, key: &[u8], value: &[u8], seconds: u64) -> StoreResult<()> {
        if seconds == 0 {
            return Err(StoreError::Command(
                "ERR invalid expire time in 'setex' command".to_string(),
            ));
        }
        self.insert(key, value, Some(Duration::from_secs(seconds))).await;
        Ok(())
    }

    async fn del(&mut self, keys: &[Vec<u8>]) -> StoreResult<u64> {
        let mut slots = self.store.slots.write().await;
        purge_expired(&mut slots);
        Ok(keys.iter().filter(|k| slots.remove(*k).is_some()).count() as u64)
    }

    async fn exists(&mut self, key: &[u8]) -> StoreResult<bool> {
        let mut slots = self.store.slots.write().await;
        purge_expired(&mut slots);
        Ok(slots.contains_key(key))
    }

    async fn keys(&mut self, pattern: &[u8]) -> StoreResult<Vec<Vec<u8>>> {
        let pattern = String::from_utf8_lossy(pattern);
        let matcher = glob_regex(&pattern, false).map_err(|e| StoreError::Command(e.to_string()))?;

        let mut slots = self.store.slots.write().await;
        purge_expired(&mut slots);
        Ok(slots
            .keys()
            .filter(|k| matcher.is_match(&String::from_utf8_lossy(k)))
            .cloned()
            .collect())
    }

    async fn mget(&mut self, keys: &[Vec<u8>]) -> StoreResult<Vec<Option<Vec<u8>>>> {
        let mut slots = self.store.slots.write().await;
        purge_expired(&mut slots);
        Ok(keys
            .iter()
            .map(|k| match slots.get(k).map(|s| &s.slot) {
                Some(Slot::Scalar(value)) => Some(value.clone()),
                _ => None,
            })
            .collect())
    }

    async fn info(&mut self) -> StoreResult<String> {
        let mut slots = self.store.slots.write().await;
        purge_expired(&mut slots);
        let expires = slots.values().filter(|s| s.expires_at.is_some()).count();
        Ok(format!(
            "# Server\r\nredis_mode:memory\r\n\r\n# Clients\r\nconnected_clients:{}\r\n\r\n# Keyspace\r\ndb0:keys={},expires={},avg_ttl=0\r\n",
            self.store.outstanding(),
            slots.len(),
            expires
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_del() {
        let store = MemoryStore::new();
        let mut conn = store.acquire().await.unwrap();

        conn.set(b"k", b"v").await.unwrap();
        assert_eq!(conn.get(b"k").await.unwrap(), Some(b"v".to_vec()));
        assert!(conn.exists(b"k").await.unwrap());

        assert_eq!(conn.del(&[b"k".to_vec(), b"missing".to_vec()]).await.unwrap(), 1);
        assert_eq!(conn.get(b"k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_ex_ttl() {
        let store = MemoryStore::new();
        let mut conn = store.acquire().await.unwrap();

        conn.set_ex(b"k", b"v", 5).await.unwrap();
        conn.set(b"forever", b"v").await.unwrap();

        assert_eq!(store.ttl("k").await, 5);
        assert_eq!(store.ttl("forever").await, -1);
        assert_eq!(store.ttl("missing").await, -2);
        assert!(conn.set_ex(b"k", b"v", 0).await.is_err());
    }

    #[tokio::test]
    async fn test_list_slot_type_drift() {
        let store = MemoryStore::new();
        store
            .push_list("queue", vec![b"a".to_vec(), b"b".to_vec()])
            .await
            .unwrap();
        let mut conn = store.acquire().await.unwrap();

        assert!(matches!(conn.get(b"queue").await, Err(StoreError::WrongType(_))));
        assert_eq!(conn.mget(&[b"queue".to_vec()]).await.unwrap(), vec![None]);
        assert_eq!(conn.lpop(b"queue").await.unwrap(), Some(b"a".to_vec()));
        assert_eq!(conn.lpop(b"queue").await.unwrap(), Some(b"b".to_vec()));
        assert!(!conn.exists(b"queue").await.unwrap());
    }

    #[tokio::test]
    async fn test_keys_glob() {
        let store = MemoryStore::new();
        let mut conn = store.acquire().await.unwrap();
        conn.set(b"app:a", b"1").await.unwrap();
        conn.set(b"app:b", b"2").await.unwrap();
        conn.set(b"other:c", b"3").await.unwrap();

        let keys = conn.keys(b"app:*").await.unwrap();
        assert_eq!(keys, vec![b"app:a".to_vec(), b"app:b".to_vec()]);
        assert_eq!(conn.keys(b"*").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_outstanding_connections_released_on_drop() {
        let store = MemoryStore::new();
        {
            let _a = store.acquire().await.unwrap();
            let _b = store.acquire().await.unwrap();
            assert_eq!(store.outstanding(), 2);
        }
        assert_eq!(store.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_info_report() {
        let store = MemoryStore::new();
        let mut conn = store.acquire().await.unwrap();
        conn.set(b"a", b"1").await.unwrap();

        let info = conn.info().await.unwrap();
        assert!(info.contains("# Keyspace"));
        assert!(info.contains("db0:keys=1,expires=0"));
    }
}
