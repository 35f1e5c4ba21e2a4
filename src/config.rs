//! Configuration module for verge.

use crate::cache::CacheConfig;
use crate::compression::CompressionConfig;
use crate::error::{Result, VergeError};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Main configuration for a verge edge node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VergeConfig {
    /// Edge server configuration.
    pub server: ServerConfig,
    /// Cache configuration.
    pub cache: CacheConfig,
    /// Signed-URL configuration.
    pub signing: SigningConfig,
    /// Origin client configuration.
    pub origin: OriginConfig,
    /// Compression negotiation configuration.
    pub compression: CompressionConfig,
    /// Invalidation coordinator configuration.
    pub invalidation: InvalidationConfig,
    /// Observability configuration.
    pub observability: ObservabilityConfig,
}

impl VergeConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| VergeError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Self = serde_json::from_str(&content)
            .map_err(|e| VergeError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Apply env-style overrides on top of the current values.
    ///
    /// Recognized variables: `VERGE_BIND_ADDR`, `VERGE_ORIGIN_URL`,
    /// `VERGE_SIGNING_SECRET`, `VERGE_CACHE_ENABLED`,
    /// `VERGE_CACHE_MAX_ENTRIES`, `VERGE_CACHE_TTL_SECS`,
    /// `VERGE_COMPRESSION_GZIP`, `VERGE_COMPRESSION_BROTLI`.
    pub fn apply_env(mut self) -> Result<Self> {
        if let Ok(addr) = std::env::var("VERGE_BIND_ADDR") {
            self.server.bind_addr = addr.parse().map_err(|_| VergeError::InvalidConfig {
                field: "VERGE_BIND_ADDR".to_string(),
                reason: format!("not a socket address: {}", addr),
            })?;
        }
        if let Ok(url) = std::env::var("VERGE_ORIGIN_URL") {
            self.origin.base_url = url;
        }
        if let Ok(secret) = std::env::var("VERGE_SIGNING_SECRET") {
            self.signing.secret = secret;
        }
        if let Ok(v) = std::env::var("VERGE_CACHE_ENABLED") {
            self.cache.enabled = parse_bool("VERGE_CACHE_ENABLED", &v)?;
        }
        if let Ok(v) = std::env::var("VERGE_CACHE_MAX_ENTRIES") {
            self.cache.max_entries = v.parse().map_err(|_| VergeError::InvalidConfig {
                field: "VERGE_CACHE_MAX_ENTRIES".to_string(),
                reason: format!("not a number: {}", v),
            })?;
        }
        if let Ok(v) = std::env::var("VERGE_CACHE_TTL_SECS") {
            let secs: u64 = v.parse().map_err(|_| VergeError::InvalidConfig {
                field: "VERGE_CACHE_TTL_SECS".to_string(),
                reason: format!("not a number: {}", v),
            })?;
            self.cache.ttl = Duration::from_secs(secs);
        }
        if let Ok(v) = std::env::var("VERGE_COMPRESSION_GZIP") {
            self.compression.enable_gzip = parse_bool("VERGE_COMPRESSION_GZIP", &v)?;
        }
        if let Ok(v) = std::env::var("VERGE_COMPRESSION_BROTLI") {
            self.compression.enable_brotli = parse_bool("VERGE_COMPRESSION_BROTLI", &v)?;
        }
        Ok(self)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.signing.secret.is_empty() {
            return Err(VergeError::InvalidConfig {
                field: "signing.secret".to_string(),
                reason: "signing secret must not be empty".to_string(),
            });
        }

        if self.origin.base_url.is_empty() {
            return Err(VergeError::InvalidConfig {
                field: "origin.base_url".to_string(),
                reason: "origin base URL must not be empty".to_string(),
            });
        }

        if self.cache.max_entries == 0 {
            return Err(VergeError::InvalidConfig {
                field: "cache.max_entries".to_string(),
                reason: "cache capacity must be non-zero".to_string(),
            });
        }

        Ok(())
    }

    /// Create a minimal development configuration.
    pub fn development() -> Self {
        Self {
            server: ServerConfig {
                bind_addr: "127.0.0.1:8080".parse().expect("valid socket address"),
                admin_addr: Some("127.0.0.1:8081".parse().expect("valid socket address")),
            },
            cache: CacheConfig::default(),
            signing: SigningConfig {
                secret: "dev-secret-do-not-use-in-production".to_string(),
                url_ttl: Duration::from_secs(900),
                base_path: "/cdn".to_string(),
            },
            origin: OriginConfig {
                base_url: "http://127.0.0.1:9000".to_string(),
                ..Default::default()
            },
            compression: CompressionConfig::default(),
            invalidation: InvalidationConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

fn parse_bool(field: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(VergeError::InvalidConfig {
            field: field.to_string(),
            reason: format!("not a boolean: {}", other),
        }),
    }
}

/// Edge HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address for the client-facing delivery surface.
    pub bind_addr: SocketAddr,
    /// Optional address for the origin-side admin surface (purge).
    #[serde(default)]
    pub admin_addr: Option<SocketAddr>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".parse().expect("valid socket address"),
            admin_addr: None,
        }
    }
}

/// Signed-URL configuration.
///
/// Tokens are self-contained; there is no revocation list. Rotating the
/// secret invalidates every outstanding token at once, which is the accepted
/// tradeoff for stateless verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigningConfig {
    /// HMAC secret.
    pub secret: String,
    /// Default validity for generated links.
    #[serde(with = "duration_serde")]
    pub url_ttl: Duration,
    /// Path prefix used when building signed URLs.
    #[serde(default = "default_base_path")]
    pub base_path: String,
}

fn default_base_path() -> String {
    "/cdn".to_string()
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            url_ttl: Duration::from_secs(900),
            base_path: default_base_path(),
        }
    }
}

/// Origin client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OriginConfig {
    /// Base URL of the origin service.
    pub base_url: String,
    /// Connect timeout for origin requests.
    #[serde(with = "duration_serde")]
    pub connect_timeout: Duration,
    /// Timeout for metadata round trips (short).
    #[serde(with = "duration_serde")]
    pub metadata_timeout: Duration,
    /// Timeout for content transfers (long).
    #[serde(with = "duration_serde")]
    pub content_timeout: Duration,
}

impl Default for OriginConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            connect_timeout: Duration::from_secs(2),
            metadata_timeout: Duration::from_secs(5),
            content_timeout: Duration::from_secs(30),
        }
    }
}

/// Invalidation coordinator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidationConfig {
    /// Edge node base URLs to notify on purge.
    #[serde(default)]
    pub edges: Vec<String>,
    /// Per-edge notification timeout; failures are logged, never propagated.
    #[serde(with = "duration_serde")]
    pub notify_timeout: Duration,
}

impl Default for InvalidationConfig {
    fn default() -> Self {
        Self {
            edges: Vec::new(),
            notify_timeout: Duration::from_secs(2),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Enable Prometheus metrics.
    pub metrics_enabled: bool,
    /// Metrics bind address.
    pub metrics_addr: SocketAddr,
    /// Log level.
    pub log_level: String,
    /// Enable JSON logging.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: false,
            metrics_addr: "0.0.0.0:9090".parse().expect("valid socket address"),
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

/// Serde helper for Duration using a humantime-style format.
pub mod duration_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}ms", duration.as_millis()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|e| e.to_string())
        } else if let Some(s_val) = s.strip_suffix('s') {
            s_val
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|e| e.to_string())
        } else if let Some(m) = s.strip_suffix('m') {
            m.parse::<u64>()
                .map(|v| Duration::from_secs(v * 60))
                .map_err(|e| e.to_string())
        } else {
            s.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|e| e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_development_config_is_valid() {
        let config = VergeConfig::development();
        assert!(config.validate().is_ok());
        assert!(config.cache.enabled);
        assert_eq!(config.origin.metadata_timeout, Duration::from_secs(5));
        assert_eq!(config.origin.content_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_validation_rejects_empty_secret() {
        let mut config = VergeConfig::development();
        config.signing.secret = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_zero_capacity() {
        let mut config = VergeConfig::development();
        config.cache.max_entries = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_json_roundtrip() {
        let config = VergeConfig::development();
        let json = serde_json::to_string(&config).unwrap();
        let back: VergeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.cache.max_entries, config.cache.max_entries);
        assert_eq!(back.cache.ttl, config.cache.ttl);
        assert_eq!(back.invalidation.notify_timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_duration_parsing() {
        let json = r#"{"secret":"s","url_ttl":"15m"}"#;
        let signing: SigningConfig = serde_json::from_str(json).unwrap();
        assert_eq!(signing.url_ttl, Duration::from_secs(900));
        assert_eq!(signing.base_path, "/cdn");
    }
}
