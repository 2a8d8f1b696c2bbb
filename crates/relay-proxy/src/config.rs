//! Runtime configuration.
//!
//! Loaded from a YAML file with camelCase keys. Durations accept humantime
//! strings (`10s`, `1m30s`). Unknown keys are rejected so typos fail loudly
//! at startup instead of silently falling back to defaults.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unable to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("unable to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Config {
    /// Ingress bind address.
    #[serde(default = "defaults::listen")]
    pub listen: SocketAddr,

    /// Metrics exposition bind address.
    #[serde(default = "defaults::listen_metrics")]
    pub listen_metrics: SocketAddr,

    /// Log level used when `RUST_LOG` is unset.
    #[serde(default = "defaults::log_level")]
    pub log_level: String,

    pub backend: BackendConfig,

    /// Per-upstream call and server request timeout.
    #[serde(default = "defaults::timeout", deserialize_with = "duration::parse")]
    pub timeout: Duration,

    /// Drain delay between the liveness flip and the listener close.
    #[serde(
        default = "defaults::timeout_shutdown",
        deserialize_with = "duration::parse"
    )]
    pub timeout_shutdown: Duration,

    /// Maximum concurrently served ingress requests.
    #[serde(default = "defaults::concurrency")]
    pub concurrency: usize,

    /// Forward metadata-only requests to the default tenant.
    #[serde(default)]
    pub metadata: bool,

    /// Idle lifetime of pooled upstream connections; forces rotation.
    #[serde(default, deserialize_with = "duration::parse_opt")]
    pub max_connection_duration: Option<Duration>,

    /// Upstream connection pool size.
    #[serde(default = "defaults::max_connections_per_host")]
    pub max_connections_per_host: usize,

    /// Allow dual-stack upstream dialing.
    #[serde(default)]
    pub ipv6: bool,

    #[serde(default)]
    pub tenant: TenantConfig,

    /// Tenant catalog discovery; without it the index stays empty and every
    /// series falls back to `tenant.default`.
    #[serde(default)]
    pub discovery: Option<DiscoveryConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BackendConfig {
    /// Upstream Remote Write endpoint.
    pub url: String,

    #[serde(default)]
    pub auth: BackendAuth,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BackendAuth {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TenantConfig {
    /// Label names searched for the tenant namespace, in order.
    #[serde(default = "defaults::tenant_labels")]
    pub labels: Vec<String>,

    /// Static prefix prepended to the egress tenant header value.
    #[serde(default)]
    pub prefix: String,

    /// Use the inbound tenant header (plus `-`) as the prefix when present.
    #[serde(default)]
    pub prefix_prefer_source: bool,

    /// Remove the matched tenant label from forwarded series.
    #[serde(default)]
    pub label_remove: bool,

    /// Egress tenant header name.
    #[serde(default = "defaults::tenant_header")]
    pub header: String,

    /// Fallback tenant when classification yields none.
    #[serde(default)]
    pub default: String,

    /// Always answer 204 regardless of upstream outcome.
    #[serde(default)]
    pub accept_all: bool,

    /// Label the request duration histogram with real tenant names.
    /// Off by default to bound metric cardinality.
    #[serde(default)]
    pub per_tenant_durations: bool,
}

impl Default for TenantConfig {
    fn default() -> Self {
        Self {
            labels: defaults::tenant_labels(),
            prefix: String::new(),
            prefix_prefer_source: false,
            label_remove: false,
            header: defaults::tenant_header(),
            default: String::new(),
            accept_all: false,
            per_tenant_durations: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DiscoveryConfig {
    /// YAML tenant catalog file.
    pub file: PathBuf,

    /// Catalog poll interval.
    #[serde(
        default = "defaults::poll_interval",
        deserialize_with = "duration::parse"
    )]
    pub poll_interval: Duration,
}

impl Config {
    /// Loads and validates the configuration from `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;

        Self::from_yaml(&raw)
    }

    /// Parses a configuration document.
    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        let cfg: Config = serde_yaml::from_str(raw)?;

        if cfg.backend.url.is_empty() {
            return Err(ConfigError::Invalid("backend.url must be set".to_string()));
        }

        if cfg.tenant.labels.is_empty() {
            return Err(ConfigError::Invalid(
                "tenant.labels must not be empty".to_string(),
            ));
        }

        Ok(cfg)
    }
}

mod defaults {
    use std::net::SocketAddr;
    use std::time::Duration;

    pub(super) fn listen() -> SocketAddr {
        "0.0.0.0:8080".parse().expect("static address")
    }

    pub(super) fn listen_metrics() -> SocketAddr {
        "0.0.0.0:8081".parse().expect("static address")
    }

    pub(super) fn log_level() -> String {
        "info".to_string()
    }

    pub(super) fn timeout() -> Duration {
        Duration::from_secs(10)
    }

    pub(super) fn timeout_shutdown() -> Duration {
        Duration::from_secs(10)
    }

    pub(super) fn concurrency() -> usize {
        512
    }

    pub(super) fn max_connections_per_host() -> usize {
        64
    }

    pub(super) fn tenant_labels() -> Vec<String> {
        vec!["__tenant__".to_string()]
    }

    pub(super) fn tenant_header() -> String {
        "X-Scope-OrgID".to_string()
    }

    pub(super) fn poll_interval() -> Duration {
        Duration::from_secs(30)
    }
}

mod duration {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub(super) fn parse<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;

        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }

    pub(super) fn parse_opt<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;

        raw.map(|s| humantime::parse_duration(&s).map_err(serde::de::Error::custom))
            .transpose()
    }
}
