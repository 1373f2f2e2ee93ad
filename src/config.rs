//! Configuration Module
//!
//! Captures the cache configuration from the host's option struct or from
//! environment variables.

use std::env;
use std::time::Duration;

use serde_json::{Map, Value};

use crate::error::{CacheError, Result};

/// Default connection timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 2000;
/// Default direct-topology host
pub const DEFAULT_HOST: &str = "localhost";
/// Default direct-topology port
pub const DEFAULT_PORT: u16 = 6379;

// == Topology ==
/// How the store is reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Topology {
    /// One fixed endpoint
    Direct { host: String, port: u16 },
    /// Master resolved through a set of sentinels
    Sentinel {
        master_name: String,
        sentinels: Vec<String>,
    },
}

impl Topology {
    /// Short name used in logs and diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Topology::Direct { .. } => "direct",
            Topology::Sentinel { .. } => "sentinel",
        }
    }
}

// == Cache Configuration ==
/// Immutable configuration captured when the cache is initialized.
///
/// Pool bounds left as `None` defer to the pool's own defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfiguration {
    /// Connection timeout in milliseconds
    pub timeout_ms: u64,
    /// Store credential
    pub password: Option<String>,
    /// Key prefix scope, stored lowercased
    pub namespace: Option<String>,
    /// TTL in seconds applied when `put` supplies none
    pub default_ttl: Option<u64>,
    pub max_total: Option<usize>,
    pub max_idle: Option<usize>,
    pub min_idle: Option<usize>,
    pub topology: Topology,
}

impl CacheConfiguration {
    /// Parses the host application's option struct.
    ///
    /// # Recognized options
    /// - `timeout`, `password`, `timeToLiveSeconds`, `namespace`
    /// - `maxTotal`, `maxIdle`, `minIdle`
    /// - `host`, `port` for the direct topology
    /// - `masterName`, `sentinels` for the sentinel topology
    ///
    /// Numbers may be given as JSON numbers or numeric strings. Blank strings
    /// count as absent. Supplying `masterName` or `sentinels` selects the
    /// sentinel topology.
    pub fn from_arguments(args: &Map<String, Value>) -> Result<Self> {
        let timeout_ms = int_arg(args, "timeout")?
            .filter(|t| *t > 0)
            .map(|t| t as u64)
            .unwrap_or(DEFAULT_TIMEOUT_MS);

        let master_name = string_arg(args, "masterName");
        let sentinels = sentinels_arg(args);

        let topology = if master_name.is_some() || !sentinels.is_empty() {
            let master_name = master_name.ok_or_else(|| {
                CacheError::Config("sentinel topology requires a masterName".to_string())
            })?;
            if sentinels.is_empty() {
                return Err(CacheError::Config(
                    "sentinel topology requires at least one sentinel".to_string(),
                ));
            }
            Topology::Sentinel {
                master_name,
                sentinels,
            }
        } else {
            let port = match int_arg(args, "port")? {
                None => DEFAULT_PORT,
                Some(p) => u16::try_from(p)
                    .ok()
                    .filter(|p| *p > 0)
                    .ok_or_else(|| CacheError::Config(format!("invalid port {}", p)))?,
            };
            Topology::Direct {
                host: string_arg(args, "host").unwrap_or_else(|| DEFAULT_HOST.to_string()),
                port,
            }
        };

        Ok(Self {
            timeout_ms,
            password: string_arg(args, "password"),
            namespace: string_arg(args, "namespace").map(|ns| ns.to_lowercase()),
            default_ttl: positive(int_arg(args, "timeToLiveSeconds")?).map(|ttl| ttl as u64),
            max_total: positive(int_arg(args, "maxTotal")?),
            max_idle: positive(int_arg(args, "maxIdle")?),
            min_idle: positive(int_arg(args, "minIdle")?),
            topology,
        })
    }

    /// Loads the configuration from environment variables.
    ///
    /// # Environment Variables
    /// - `REDIS_HOST`, `REDIS_PORT` - direct endpoint (default: localhost:6379)
    /// - `REDIS_TIMEOUT_MS` - connection timeout (default: 2000)
    /// - `REDIS_PASSWORD`, `REDIS_NAMESPACE`, `REDIS_TTL_SECONDS`
    /// - `REDIS_MAX_TOTAL`, `REDIS_MAX_IDLE`, `REDIS_MIN_IDLE`
    /// - `REDIS_MASTER_NAME`, `REDIS_SENTINELS` - sentinel topology, sentinels
    ///   separated by commas or newlines
    pub fn from_env() -> Result<Self> {
        const VARS: [(&str, &str); 11] = [
            ("REDIS_HOST", "host"),
            ("REDIS_PORT", "port"),
            ("REDIS_TIMEOUT_MS", "timeout"),
            ("REDIS_PASSWORD", "password"),
            ("REDIS_NAMESPACE", "namespace"),
            ("REDIS_TTL_SECONDS", "timeToLiveSeconds"),
            ("REDIS_MAX_TOTAL", "maxTotal"),
            ("REDIS_MAX_IDLE", "maxIdle"),
            ("REDIS_MIN_IDLE", "minIdle"),
            ("REDIS_MASTER_NAME", "masterName"),
            ("REDIS_SENTINELS", "sentinels"),
        ];

        let mut args = Map::new();
        for (var, option) in VARS {
            if let Ok(value) = env::var(var) {
                let value = if option == "sentinels" {
                    value.replace(',', "\n")
                } else {
                    value
                };
                args.insert(option.to_string(), Value::String(value));
            }
        }
        Self::from_arguments(&args)
    }

    /// Connection timeout as a Duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for CacheConfiguration {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            password: None,
            namespace: None,
            default_ttl: None,
            max_total: None,
            max_idle: None,
            min_idle: None,
            topology: Topology::Direct {
                host: DEFAULT_HOST.to_string(),
                port: DEFAULT_PORT,
            },
        }
    }
}

// == Argument Helpers ==

fn string_arg(args: &Map<String, Value>, name: &str) -> Option<String> {
    let value = match args.get(name)? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    (!value.is_empty()).then_some(value)
}

fn int_arg(args: &Map<String, Value>, name: &str) -> Result<Option<i64>> {
    match args.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .map(Some)
            .ok_or_else(|| CacheError::Config(format!("{} is not an integer", name))),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| CacheError::Config(format!("{} is not an integer: {}", name, s))),
        Some(other) => Err(CacheError::Config(format!(
            "{} is not an integer: {}",
            name, other
        ))),
    }
}

fn positive(value: Option<i64>) -> Option<usize> {
    value.filter(|v| *v > 0).map(|v| v as usize)
}

fn sentinels_arg(args: &Map<String, Value>) -> Vec<String> {
    let raw: Vec<String> = match args.get("sentinels") {
        Some(Value::String(s)) => s.lines().map(str::to_string).collect(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    };

    let mut sentinels: Vec<String> = Vec::new();
    for endpoint in raw.iter().map(|s| s.trim()).filter(|s| !s.is_empty()) {
        if !sentinels.iter().any(|s| s == endpoint) {
            sentinels.push(endpoint.to_string());
        }
    }
    sentinels
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_config_default() {
        let config = CacheConfiguration::default();
        assert_eq!(config.timeout_ms, 2000);
        assert_eq!(config.default_ttl, None);
        assert_eq!(
            config.topology,
            Topology::Direct {
                host: "localhost".to_string(),
                port: 6379
            }
        );
    }

    #[test]
    fn test_empty_arguments_match_default() {
        let config = CacheConfiguration::from_arguments(&Map::new()).unwrap();
        assert_eq!(config, CacheConfiguration::default());
    }

    #[test]
    fn test_direct_arguments() {
        let config = CacheConfiguration::from_arguments(&args(json!({
            "host": "cache.internal",
            "port": "6380",
            "timeout": 500,
            "password": "secret",
            "namespace": "App",
            "timeToLiveSeconds": "60",
            "maxTotal": 16,
            "maxIdle": 0,
        })))
        .unwrap();

        assert_eq!(config.timeout_ms, 500);
        assert_eq!(config.password.as_deref(), Some("secret"));
        assert_eq!(config.namespace.as_deref(), Some("app"));
        assert_eq!(config.default_ttl, Some(60));
        assert_eq!(config.max_total, Some(16));
        assert_eq!(config.max_idle, None);
        assert_eq!(
            config.topology,
            Topology::Direct {
                host: "cache.internal".to_string(),
                port: 6380
            }
        );
    }

    #[test]
    fn test_blank_strings_are_absent() {
        let config = CacheConfiguration::from_arguments(&args(json!({
            "password": "   ",
            "namespace": "",
        })))
        .unwrap();
        assert!(config.password.is_none());
        assert!(config.namespace.is_none());
    }

    #[test]
    fn test_sentinel_arguments() {
        let config = CacheConfiguration::from_arguments(&args(json!({
            "masterName": "mymaster",
            "sentinels": "10.0.0.1:26379\r\n10.0.0.2:26379\n\n10.0.0.1:26379",
        })))
        .unwrap();

        assert_eq!(
            config.topology,
            Topology::Sentinel {
                master_name: "mymaster".to_string(),
                sentinels: vec!["10.0.0.1:26379".to_string(), "10.0.0.2:26379".to_string()],
            }
        );
        assert_eq!(config.topology.name(), "sentinel");
    }

    #[test]
    fn test_sentinel_requires_endpoints() {
        let result = CacheConfiguration::from_arguments(&args(json!({ "masterName": "m" })));
        assert!(matches!(result, Err(CacheError::Config(_))));

        let result =
            CacheConfiguration::from_arguments(&args(json!({ "sentinels": ["h:26379"] })));
        assert!(matches!(result, Err(CacheError::Config(_))));
    }

    #[test]
    fn test_invalid_numbers_rejected() {
        let result = CacheConfiguration::from_arguments(&args(json!({ "timeout": "soon" })));
        assert!(matches!(result, Err(CacheError::Config(_))));

        let result = CacheConfiguration::from_arguments(&args(json!({ "port": 70000 })));
        assert!(matches!(result, Err(CacheError::Config(_))));
    }

    #[test]
    fn test_config_from_env_defaults() {
        for var in [
            "REDIS_HOST",
            "REDIS_PORT",
            "REDIS_TIMEOUT_MS",
            "REDIS_PASSWORD",
            "REDIS_NAMESPACE",
            "REDIS_TTL_SECONDS",
            "REDIS_MAX_TOTAL",
            "REDIS_MAX_IDLE",
            "REDIS_MIN_IDLE",
            "REDIS_MASTER_NAME",
            "REDIS_SENTINELS",
        ] {
            env::remove_var(var);
        }

        let config = CacheConfiguration::from_env().unwrap();
        assert_eq!(config, CacheConfiguration::default());
    }
}
