//! Redis Connection Pool
//!
//! Lazily built deadpool pool of multiplexed Redis connections, for either a
//! direct endpoint or a sentinel-monitored master.

use std::time::Duration;

use async_trait::async_trait;
use deadpool::managed::{Manager, Metrics, Object, Pool, PoolError, RecycleError, RecycleResult};
use deadpool::Runtime;
use redis::aio::MultiplexedConnection;
use redis::sentinel::{SentinelClient, SentinelNodeConnectionInfo, SentinelServerType};
use redis::{
    AsyncConnectionConfig, Client, ConnectionAddr, ConnectionInfo, RedisConnectionInfo, RedisError,
};
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};

use super::{ConnectionProvider, StoreConnection, StoreError, StoreResult};
use crate::config::{CacheConfiguration, Topology};

impl From<RedisError> for StoreError {
    fn from(err: RedisError) -> Self {
        let message = err.to_string();
        if err.code() == Some("WRONGTYPE") || message.starts_with("WRONGTYPE") {
            StoreError::WrongType(message)
        } else if err.is_io_error()
            || err.is_connection_refusal()
            || err.is_connection_dropped()
            || err.is_timeout()
        {
            StoreError::Connection(message)
        } else {
            StoreError::Command(message)
        }
    }
}

// == Manager ==
enum Endpoint {
    Direct(Client),
    Sentinel(Mutex<SentinelClient>),
}

/// Creates and recycles connections for one topology.
///
/// Every connection bounds both connecting and each command reply by the
/// configured timeout.
pub struct RedisManager {
    endpoint: Endpoint,
    timeout: Duration,
}

impl RedisManager {
    pub fn new(config: &CacheConfiguration) -> StoreResult<Self> {
        let credentials = RedisConnectionInfo {
            password: config.password.clone(),
            ..Default::default()
        };

        let endpoint = match &config.topology {
            Topology::Direct { host, port } => {
                let info = ConnectionInfo {
                    addr: ConnectionAddr::Tcp(host.clone(), *port),
                    redis: credentials,
                };
                Endpoint::Direct(Client::open(info)?)
            }
            Topology::Sentinel {
                master_name,
                sentinels,
            } => {
                let urls: Vec<String> = sentinels.iter().map(|s| sentinel_url(s)).collect();
                let node_info = SentinelNodeConnectionInfo {
                    tls_mode: None,
                    redis_connection_info: Some(credentials),
                };
                let client = SentinelClient::build(
                    urls,
                    master_name.clone(),
                    Some(node_info),
                    SentinelServerType::Master,
                )?;
                Endpoint::Sentinel(Mutex::new(client))
            }
        };

        Ok(Self {
            endpoint,
            timeout: config.timeout(),
        })
    }
}

impl Manager for RedisManager {
    type Type = MultiplexedConnection;
    type Error = StoreError;

    async fn create(&self) -> Result<MultiplexedConnection, StoreError> {
        let conn = match &self.endpoint {
            Endpoint::Direct(client) => {
                client
                    .get_multiplexed_tokio_connection_with_response_timeouts(
                        self.timeout,
                        self.timeout,
                    )
                    .await?
            }
            // resolves the current master on every new connection
            Endpoint::Sentinel(client) => {
                let config = AsyncConnectionConfig::new()
                    .set_response_timeout(self.timeout)
                    .set_connection_timeout(self.timeout);
                client
                    .lock()
                    .await
                    .get_async_connection_with_config(&config)
                    .await?
            }
        };
        Ok(conn)
    }

    async fn recycle(
        &self,
        conn: &mut MultiplexedConnection,
        _: &Metrics,
    ) -> RecycleResult<StoreError> {
        match &self.endpoint {
            Endpoint::Direct(_) => {
                redis::cmd("PING")
                    .query_async::<()>(conn)
                    .await
                    .map_err(|e| RecycleError::Backend(e.into()))?;
            }
            Endpoint::Sentinel(_) => {
                let role = redis::cmd("ROLE")
                    .query_async::<Vec<redis::Value>>(conn)
                    .await
                    .map_err(|e| RecycleError::Backend(e.into()))?;
                let is_master = role
                    .first()
                    .and_then(|v| redis::from_redis_value::<String>(v).ok())
                    .is_some_and(|r| r == "master");
                if !is_master {
                    debug!("Dropping pooled connection to a demoted master");
                    return Err(RecycleError::Backend(StoreError::Connection(
                        "connection no longer points at the master".to_string(),
                    )));
                }
            }
        }
        Ok(())
    }
}

fn sentinel_url(endpoint: &str) -> String {
    if endpoint.contains("://") {
        endpoint.to_string()
    } else {
        format!("redis://{}", endpoint)
    }
}

fn pool_error(err: PoolError<StoreError>) -> StoreError {
    match err {
        PoolError::Backend(e) => e,
        PoolError::Timeout(kind) => {
            StoreError::Connection(format!("timed out waiting for a connection ({:?})", kind))
        }
        other => StoreError::Connection(format!("{:?}", other)),
    }
}

// == Provider ==
/// Connection provider backed by a lazily constructed pool.
///
/// The pool is built on the first `acquire` and reused for the provider's
/// lifetime. Concurrent first callers wait on the same initialization.
pub struct RedisConnectionProvider {
    config: CacheConfiguration,
    pool: OnceCell<Pool<RedisManager>>,
}

impl RedisConnectionProvider {
    pub fn new(config: CacheConfiguration) -> Self {
        Self {
            config,
            pool: OnceCell::new(),
        }
    }

    /// Whether the pool has been constructed yet.
    pub fn is_initialized(&self) -> bool {
        self.pool.initialized()
    }

    async fn pool(&self) -> StoreResult<&Pool<RedisManager>> {
        self.pool.get_or_try_init(|| self.build_pool()).await
    }

    async fn build_pool(&self) -> StoreResult<Pool<RedisManager>> {
        let timeout = self.config.timeout();
        let manager = RedisManager::new(&self.config)?;

        let mut builder = Pool::builder(manager)
            .runtime(Runtime::Tokio1)
            .wait_timeout(Some(timeout))
            .create_timeout(Some(timeout))
            .recycle_timeout(Some(timeout));
        if let Some(max_total) = self.config.max_total {
            builder = builder.max_size(max_total);
        }
        let pool: Pool<RedisManager> = builder
            .build()
            .map_err(|e| StoreError::Connection(format!("{:?}", e)))?;

        if let Some(max_idle) = self.config.max_idle {
            warn!("maxIdle={} is not supported by the pool, ignoring", max_idle);
        }

        // Warm the pool; this also surfaces an unreachable store right away.
        let warm = self.config.min_idle.unwrap_or(1).min(pool.status().max_size);
        let mut idle = Vec::with_capacity(warm);
        for _ in 0..warm {
            idle.push(pool.get().await.map_err(pool_error)?);
        }
        drop(idle);

        info!(
            "Connection pool created: topology={}, max_size={}, warm={}",
            self.config.topology.name(),
            pool.status().max_size,
            warm
        );
        Ok(pool)
    }
}

#[async_trait]
impl ConnectionProvider for RedisConnectionProvider {
    type Connection = RedisConnection;

    async fn acquire(&self) -> StoreResult<RedisConnection> {
        let pool = self.pool().await?;
        let inner = pool.get().await.map_err(pool_error)?;
        Ok(RedisConnection { inner })
    }

    fn topology(&self) -> &'static str {
        self.config.topology.name()
    }
}

// == Connection ==
/// Pooled connection; returned to the pool on drop.
pub struct RedisConnection {
    inner: Object<RedisManager>,
}

#[async_trait]
impl StoreConnection for RedisConnection {
    async fn get(&mut self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        Ok(redis::cmd("GET")
            .arg(key)
            .query_async::<Option<Vec<u8>>>(&mut *self.inner)
            .await?)
    }

    async fn lpop(&mut self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        Ok(redis::cmd("LPOP")
            .arg(key)
            .query_async::<Option<Vec<u8>>>(&mut *self.inner)
            .await?)
    }

    async fn set(&mut self, key: &[u8], value: &[u8]) -> StoreResult<()> {
        Ok(redis::cmd("SET")
            .arg(key)
            .arg(value)
            .query_async::<()>(&mut *self.inner)
            .await?)
    }

    async fn set_ex(&mut self, key: &[u8], value: &[u8], seconds: u64) -> StoreResult<()> {
        Ok(redis::cmd("SETEX")
            .arg(key)
            .arg(seconds)
            .arg(value)
            .query_async::<()>(&mut *self.inner)
            .await?)
    }

    async fn del(&mut self, keys: &[Vec<u8>]) -> StoreResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        Ok(redis::cmd("DEL")
            .arg(keys)
            .query_async::<u64>(&mut *self.inner)
            .await?)
    }

    async fn exists(&mut self, key: &[u8]) -> StoreResult<bool> {
        Ok(redis::cmd("EXISTS")
            .arg(key)
            .query_async::<bool>(&mut *self.inner)
            .await?)
    }

    async fn keys(&mut self, pattern: &[u8]) -> StoreResult<Vec<Vec<u8>>> {
        Ok(redis::cmd("KEYS")
            .arg(pattern)
            .query_async::<Vec<Vec<u8>>>(&mut *self.inner)
            .await?)
    }

    async fn mget(&mut self, keys: &[Vec<u8>]) -> StoreResult<Vec<Option<Vec<u8>>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        Ok(redis::cmd("MGET")
            .arg(keys)
            .query_async::<Vec<Option<Vec<u8>>>>(&mut *self.inner)
            .await?)
    }

    async fn info(&mut self) -> StoreResult<String> {
        Ok(redis::cmd("INFO")
            .query_async::<String>(&mut *self.inner)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    use crate::cache::{Cache, RedisCache};
    use crate::error::CacheError;

    // == Stalling Server ==
    /// Replies `+OK` to every command until the first GET, then goes silent.
    async fn spawn_stalling_server() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(serve_until_get(socket));
            }
        });
        port
    }

    async fn serve_until_get(mut socket: TcpStream) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        let mut stalled = false;
        loop {
            let n = match socket.read(&mut chunk).await {
                Ok(0) | Err(_) => return,
                Ok(n) => n,
            };
            buf.extend_from_slice(&chunk[..n]);
            while let Some((name, used)) = parse_command(&buf) {
                buf.drain(..used);
                stalled |= name.eq_ignore_ascii_case("GET");
                if !stalled && socket.write_all(b"+OK\r\n").await.is_err() {
                    return;
                }
            }
        }
    }

    /// Parses one RESP command, returning its name and the bytes consumed.
    fn parse_command(buf: &[u8]) -> Option<(String, usize)> {
        let mut pos = 0;
        let count: usize = read_line(buf, &mut pos)?.strip_prefix('*')?.parse().ok()?;
        let mut name = String::new();
        for i in 0..count {
            let len: usize = read_line(buf, &mut pos)?.strip_prefix('$')?.parse().ok()?;
            let arg = buf.get(pos..pos + len)?;
            if i == 0 {
                name = String::from_utf8_lossy(arg).to_string();
            }
            pos += len + 2;
            if pos > buf.len() {
                return None;
            }
        }
        Some((name, pos))
    }

    fn read_line<'a>(buf: &'a [u8], pos: &mut usize) -> Option<&'a str> {
        let rest = buf.get(*pos..)?;
        let end = rest.windows(2).position(|w| w == b"\r\n")?;
        *pos += end + 2;
        std::str::from_utf8(&rest[..end]).ok()
    }

    fn stalling_config(port: u16) -> CacheConfiguration {
        CacheConfiguration {
            timeout_ms: 300,
            topology: Topology::Direct {
                host: "127.0.0.1".to_string(),
                port,
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_sentinel_url() {
        assert_eq!(sentinel_url("10.0.0.1:26379"), "redis://10.0.0.1:26379");
        assert_eq!(sentinel_url("redis://h:26379"), "redis://h:26379");
    }

    #[test]
    fn test_pool_error_mapping() {
        let err = pool_error(PoolError::Backend(StoreError::Command("boom".to_string())));
        assert_eq!(err, StoreError::Command("boom".to_string()));

        let err = pool_error(PoolError::Closed);
        assert!(matches!(err, StoreError::Connection(_)));
    }

    #[tokio::test]
    async fn test_pool_is_lazy() {
        let provider = RedisConnectionProvider::new(CacheConfiguration::default());
        assert!(!provider.is_initialized());
        assert_eq!(provider.topology(), "direct");
    }

    #[tokio::test]
    async fn test_unreachable_store_fails_on_acquire() {
        let config = CacheConfiguration {
            timeout_ms: 200,
            topology: Topology::Direct {
                host: "127.0.0.1".to_string(),
                port: 1,
            },
            ..Default::default()
        };
        let provider = RedisConnectionProvider::new(config);

        let result = provider.acquire().await;
        assert!(matches!(result, Err(StoreError::Connection(_))));
        assert!(!provider.is_initialized());
    }

    #[tokio::test]
    async fn test_stalled_reply_is_bounded_by_timeout() {
        let port = spawn_stalling_server().await;
        let provider = RedisConnectionProvider::new(stalling_config(port));
        let mut conn = provider.acquire().await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), conn.get(b"k"))
            .await
            .expect("GET outlived the connection timeout");
        assert!(matches!(result, Err(StoreError::Connection(_))));
    }

    #[tokio::test]
    async fn test_cache_get_fails_on_stalled_store() {
        let port = spawn_stalling_server().await;
        let cache = RedisCache::new(stalling_config(port));

        let result = tokio::time::timeout(Duration::from_secs(5), cache.get_entry("k"))
            .await
            .expect("get_entry outlived the connection timeout");
        assert!(matches!(result, Err(CacheError::Connection(_))));
    }
}
