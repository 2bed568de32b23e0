//! # Configuration Module
//!
//! Server configuration, layered from lowest to highest precedence:
//!
//! 1. Built-in defaults
//! 2. `partsbin.toml` (path via `--config`)
//! 3. Environment variables
//! 4. CLI flags
//!
//! ## Environment Variables
//!
//! - `PARTSBIN_CORS_ORIGINS`: Comma-separated list of allowed origins, or "*" for all
//! - `PARTSBIN_RATE_LIMIT`: Requests per second (0 to disable)

use clap::ValueEnum;
use partsbin_core::CatalogError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default request body limit: 2 MiB.
pub const DEFAULT_BODY_LIMIT: usize = 2 * 1024 * 1024;

/// Default rate limit: 100 requests per second.
pub const DEFAULT_RATE_LIMIT: u32 = 100;

// =============================================================================
// CONFIG SECTIONS
// =============================================================================

/// Which storage backend holds the catalog.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Volatile in-memory tables.
    Memory,
    /// ACID database file.
    #[default]
    Redb,
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Memory => f.write_str("memory"),
            Self::Redb => f.write_str("redb"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    pub backend: Backend,
    /// Database file of the redb backend.
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Redb,
            path: PathBuf::from("partsbin.redb"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitsConfig {
    /// Requests per second; 0 disables rate limiting.
    pub rate_limit: u32,
    /// Maximum request body size in bytes.
    pub body_limit: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            rate_limit: DEFAULT_RATE_LIMIT,
            body_limit: DEFAULT_BODY_LIMIT,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CorsConfig {
    /// Allowed origins. `None` allows localhost only, `["*"]` allows all.
    pub origins: Option<Vec<String>>,
}

/// The complete server configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub limits: LimitsConfig,
    pub cors: CorsConfig,
}

// =============================================================================
// LOADING
// =============================================================================

impl Config {
    /// Parse a TOML document. Missing sections and keys keep their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, CatalogError> {
        toml::from_str(text)
            .map_err(|e| CatalogError::InvalidArgument(format!("invalid configuration: {}", e)))
    }

    /// Load the configuration file (defaults if `path` is `None`), then apply
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, CatalogError> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|e| {
                    CatalogError::Storage(format!(
                        "cannot read configuration '{}': {}",
                        path.display(),
                        e
                    ))
                })?;
                Self::from_toml_str(&text)?
            }
            None => Self::default(),
        };
        config.apply_env_with(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Apply `PARTSBIN_*` overrides read through `lookup`.
    ///
    /// Unparsable values are logged and ignored.
    pub fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(origins) = lookup("PARTSBIN_CORS_ORIGINS") {
            self.cors.origins = Some(
                origins
                    .split(',')
                    .map(str::trim)
                    .filter(|origin| !origin.is_empty())
                    .map(str::to_string)
                    .collect(),
            );
        }

        if let Some(rate) = lookup("PARTSBIN_RATE_LIMIT") {
            match rate.trim().parse() {
                Ok(rate) => self.limits.rate_limit = rate,
                Err(e) => tracing::warn!("Ignoring PARTSBIN_RATE_LIMIT={:?}: {}", rate, e),
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.storage.backend, Backend::Redb);
        assert_eq!(config.limits.rate_limit, DEFAULT_RATE_LIMIT);
        assert!(config.cors.origins.is_none());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let config = Config::from_toml_str(
            r#"
            [server]
            port = 9000

            [storage]
            backend = "memory"
            "#,
        )
        .expect("parse");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.storage.backend, Backend::Memory);
        assert_eq!(config.limits.body_limit, DEFAULT_BODY_LIMIT);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(Config::from_toml_str("[server]\nhots = \"x\"\n").is_err());
    }

    #[test]
    fn env_overrides_file() {
        let mut config = Config::from_toml_str("[limits]\nrate_limit = 5\n").expect("parse");
        config.apply_env_with(|name| match name {
            "PARTSBIN_RATE_LIMIT" => Some("0".to_string()),
            "PARTSBIN_CORS_ORIGINS" => Some("http://a.test, http://b.test".to_string()),
            _ => None,
        });
        assert_eq!(config.limits.rate_limit, 0);
        assert_eq!(
            config.cors.origins,
            Some(vec!["http://a.test".to_string(), "http://b.test".to_string()])
        );
    }

    #[test]
    fn bad_env_value_is_ignored() {
        let mut config = Config::default();
        config.apply_env_with(|name| (name == "PARTSBIN_RATE_LIMIT").then(|| "fast".to_string()));
        assert_eq!(config.limits.rate_limit, DEFAULT_RATE_LIMIT);
    }
}
