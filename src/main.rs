//! Redis Cache Info - prints the cache's diagnostic info as JSON
//!
//! Reads the configuration from `REDIS_*` environment variables, connects
//! lazily on the first operation and reports the merged info map together
//! with the namespace's key count.

use anyhow::Context;
use serde_json::json;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use redis_cache::{Cache, CacheConfiguration, RedisCache};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "redis_cache=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = CacheConfiguration::from_env().context("invalid cache configuration")?;
    info!(
        "Configuration loaded: topology={}, namespace={:?}, timeout={}ms",
        config.topology.name(),
        config.namespace,
        config.timeout_ms
    );

    let cache = RedisCache::new(config);
    let info = cache
        .custom_info()
        .await
        .context("failed to read store info")?;
    let keys = cache.keys().await.context("failed to list keys")?;

    let report = json!({
        "keys": keys.len(),
        "info": info,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
