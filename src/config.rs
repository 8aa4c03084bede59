//! Service configuration for the gateway binary.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::identity::IdentityExtractor;
use crate::quota;
use crate::rate_limit::WindowAlgorithm;
use crate::server::DEFAULT_MAX_UPLOAD_BYTES;

/// Environment variable that overrides `server.listen_addr`.
pub const LISTEN_ADDR_ENV: &str = "QUOTAGATE_LISTEN_ADDR";

/// Configuration load/validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level gateway configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayConfig {
    pub server: ServerConfig,
    #[serde(default)]
    pub limiter: LimiterConfig,
    /// Quotas installed at startup.
    #[serde(default)]
    pub users: Vec<SeedQuota>,
}

/// Listener and forwarding settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// e.g. "0.0.0.0:8000"
    pub listen_addr: String,
    /// Where admitted uploads are forwarded. Without one they are acknowledged locally.
    #[serde(default)]
    pub upstream: Option<String>,
    /// Uploads larger than this are answered with 413.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

/// Decision and accounting settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LimiterConfig {
    #[serde(default)]
    pub algorithm: WindowAlgorithm,
    #[serde(default = "default_identity_cookie")]
    pub identity_cookie: String,
    #[serde(default = "default_identity_header")]
    pub identity_header: String,
    /// Accounting entries untouched this long are evicted.
    #[serde(default = "default_idle_ttl")]
    pub idle_ttl_secs: u64,
    #[serde(default = "default_eviction_interval")]
    pub eviction_interval_secs: u64,
}

/// A quota installed when the gateway starts.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SeedQuota {
    pub user_id: String,
    pub quota_limit: i64,
    pub limit_per: String,
}

fn default_max_upload_bytes() -> usize {
    DEFAULT_MAX_UPLOAD_BYTES
}

fn default_identity_cookie() -> String {
    "user_id".to_string()
}

fn default_identity_header() -> String {
    "x-user-id".to_string()
}

fn default_idle_ttl() -> u64 {
    3600
}

fn default_eviction_interval() -> u64 {
    300
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            algorithm: WindowAlgorithm::default(),
            identity_cookie: default_identity_cookie(),
            identity_header: default_identity_header(),
            idle_ttl_secs: default_idle_ttl(),
            eviction_interval_secs: default_eviction_interval(),
        }
    }
}

impl LimiterConfig {
    pub fn identity(&self) -> IdentityExtractor {
        IdentityExtractor::new(&self.identity_cookie, &self.identity_header)
    }

    pub fn idle_ttl(&self) -> Duration {
        Duration::from_secs(self.idle_ttl_secs)
    }

    pub fn eviction_interval(&self) -> Duration {
        Duration::from_secs(self.eviction_interval_secs)
    }
}

impl GatewayConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Local development defaults: no upstream, no seeded users.
    pub fn development() -> Self {
        Self {
            server: ServerConfig {
                listen_addr: "127.0.0.1:8000".to_string(),
                upstream: None,
                max_upload_bytes: default_max_upload_bytes(),
            },
            limiter: LimiterConfig::default(),
            users: Vec::new(),
        }
    }

    /// Apply environment overrides.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(addr) = std::env::var(LISTEN_ADDR_ENV) {
            if !addr.trim().is_empty() {
                self.server.listen_addr = addr.trim().to_string();
            }
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.listen_addr.trim().is_empty() {
            return Err(ConfigError::Invalid("server.listen_addr is empty".into()));
        }
        if let Some(upstream) = &self.server.upstream {
            url::Url::parse(upstream)
                .map_err(|e| ConfigError::Invalid(format!("invalid upstream URL '{upstream}': {e}")))?;
        }
        if self.server.max_upload_bytes == 0 {
            return Err(ConfigError::Invalid("server.max_upload_bytes must be > 0".into()));
        }

        let limiter = &self.limiter;
        if limiter.identity_cookie.trim().is_empty() || limiter.identity_header.trim().is_empty() {
            return Err(ConfigError::Invalid("identity cookie and header names must be non-empty".into()));
        }
        if http::HeaderName::from_bytes(limiter.identity_header.as_bytes()).is_err() {
            return Err(ConfigError::Invalid(format!(
                "identity_header '{}' is not a valid header name",
                limiter.identity_header
            )));
        }
        if limiter.idle_ttl_secs == 0 || limiter.eviction_interval_secs == 0 {
            return Err(ConfigError::Invalid("idle_ttl_secs and eviction_interval_secs must be > 0".into()));
        }

        for seed in &self.users {
            quota::validate(&seed.user_id, seed.quota_limit, &seed.limit_per)
                .map_err(|e| ConfigError::Invalid(format!("users[{}]: {e}", seed.user_id)))?;
        }
        Ok(())
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self::development()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn development_config_is_valid() {
        let config = GatewayConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.server.upstream.is_none());
        assert_eq!(config.limiter.algorithm, WindowAlgorithm::FixedWindow);
    }

    #[test]
    fn parses_full_config() {
        let toml = r#"
[server]
listen_addr = "0.0.0.0:8000"
upstream = "http://127.0.0.1:9000"

[limiter]
algorithm = "sliding_window_counter"
identity_cookie = "sid"
idle_ttl_secs = 60

[[users]]
user_id = "user-02"
quota_limit = 3
limit_per = "rps"
"#;
        let config = GatewayConfig::from_toml(toml).unwrap();
        assert_eq!(config.limiter.algorithm, WindowAlgorithm::SlidingWindowCounter);
        assert_eq!(config.limiter.identity_cookie, "sid");
        assert_eq!(config.limiter.identity_header, "x-user-id");
        assert_eq!(config.limiter.idle_ttl(), Duration::from_secs(60));
        assert_eq!(config.users.len(), 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let config = GatewayConfig::from_toml("[server]\nlisten_addr = \"0.0.0.0:80\"\n").unwrap();
        assert_eq!(config.limiter.eviction_interval_secs, 300);
        assert_eq!(config.server.max_upload_bytes, DEFAULT_MAX_UPLOAD_BYTES);
        assert!(config.users.is_empty());
    }

    #[test]
    fn rejects_bad_seed_quota() {
        let mut config = GatewayConfig::development();
        config.users.push(SeedQuota { user_id: "u".into(), quota_limit: 0, limit_per: "rps".into() });
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("users[u]"));
    }

    #[test]
    fn rejects_bad_upstream_and_limiter_settings() {
        let mut config = GatewayConfig::development();
        config.server.upstream = Some("not a url".into());
        assert!(config.validate().is_err());

        let mut config = GatewayConfig::development();
        config.server.max_upload_bytes = 0;
        assert!(config.validate().is_err());

        let mut config = GatewayConfig::development();
        config.limiter.eviction_interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = GatewayConfig::development();
        config.limiter.identity_header = "bad header".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        assert!(matches!(GatewayConfig::from_toml("[server"), Err(ConfigError::Parse(_))));
    }
}
