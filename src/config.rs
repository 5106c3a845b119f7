//! Configuration management for Gatehouse.
//!
//! Configuration is layered: built-in defaults, then an optional YAML file,
//! then `GATEHOUSE__`-prefixed environment variables.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{GatehouseError, Result};
use crate::ratelimit::{ForwardedPolicy, LimitConfig};

/// Prefix for environment variable overrides.
const ENV_PREFIX: &str = "GATEHOUSE";

/// Main configuration for the Gatehouse service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatehouseConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,

    /// Upstream application configuration
    #[serde(default)]
    pub upstream: UpstreamConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

/// How the `X-Forwarded-For` header is treated when identifying a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForwardedFor {
    /// Honor the header from any peer.
    ///
    /// A direct caller can claim any identity this way.
    #[default]
    TrustAll,
    /// Never consult the header.
    Ignore,
    /// Honor the header only when the peer is listed in `trusted_proxies`.
    TrustedProxies,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Requests allowed per client per window
    #[serde(default = "default_max_requests")]
    pub max_requests: u64,

    /// Window length in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Idle time after which a client's counter may be swept, in seconds
    #[serde(default = "default_idle_retention_secs")]
    pub idle_retention_secs: u64,

    /// Sweep period in seconds
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Forwarded-for header handling
    #[serde(default)]
    pub forwarded_for: ForwardedFor,

    /// Peers allowed to set `X-Forwarded-For` in `trusted_proxies` mode
    #[serde(default)]
    pub trusted_proxies: Vec<IpAddr>,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window_secs: default_window_secs(),
            idle_retention_secs: default_idle_retention_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            forwarded_for: ForwardedFor::default(),
            trusted_proxies: Vec::new(),
        }
    }
}

fn default_max_requests() -> u64 {
    100
}

fn default_window_secs() -> u64 {
    60
}

fn default_idle_retention_secs() -> u64 {
    300
}

fn default_sweep_interval_secs() -> u64 {
    300
}

impl RateLimitingConfig {
    /// Limits applied to every client counter.
    pub fn limit_config(&self) -> LimitConfig {
        LimitConfig {
            limit: self.max_requests,
            window: Duration::from_secs(self.window_secs),
            idle_retention: Duration::from_secs(self.idle_retention_secs),
        }
    }

    /// How often the sweep task runs.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Client identification policy derived from the forwarded-for settings.
    pub fn forwarded_policy(&self) -> ForwardedPolicy {
        match self.forwarded_for {
            ForwardedFor::TrustAll => ForwardedPolicy::TrustAll,
            ForwardedFor::Ignore => ForwardedPolicy::Ignore,
            ForwardedFor::TrustedProxies => {
                ForwardedPolicy::TrustedProxies(self.trusted_proxies.iter().copied().collect())
            }
        }
    }
}

/// Upstream application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL admitted requests are forwarded to
    #[serde(default)]
    pub base_url: Option<String>,

    /// Largest request body forwarded upstream, in bytes
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024
}

impl GatehouseConfig {
    /// Load configuration from a YAML file path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: GatehouseConfig = serde_yaml::from_str(yaml)
            .map_err(|e| GatehouseError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load layered configuration: defaults, optional file, then environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Self::default())?);

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Yaml)
                    .required(true),
            );
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("rate_limiting.trusted_proxies"),
        );

        let config: GatehouseConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the limiter cannot operate with.
    pub fn validate(&self) -> Result<()> {
        let rl = &self.rate_limiting;
        if rl.max_requests == 0 {
            return Err(GatehouseError::Config(
                "rate_limiting.max_requests must be greater than zero".to_string(),
            ));
        }
        if rl.window_secs == 0 {
            return Err(GatehouseError::Config(
                "rate_limiting.window_secs must be greater than zero".to_string(),
            ));
        }
        if rl.sweep_interval_secs == 0 {
            return Err(GatehouseError::Config(
                "rate_limiting.sweep_interval_secs must be greater than zero".to_string(),
            ));
        }
        if rl.forwarded_for == ForwardedFor::TrustedProxies && rl.trusted_proxies.is_empty() {
            return Err(GatehouseError::Config(
                "rate_limiting.trusted_proxies must not be empty when forwarded_for is trusted_proxies"
                    .to_string(),
            ));
        }
        if self.upstream.max_body_bytes == 0 {
            return Err(GatehouseError::Config(
                "upstream.max_body_bytes must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
