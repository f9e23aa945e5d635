//! Application state and configuration.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use atlas_build::SqliteStore;

use crate::cache::{DEFAULT_TTL, ResponseCache, new_cache};

/// Application configuration loaded from environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address (e.g., "0.0.0.0:8080").
    pub bind_addr: String,

    /// SQLite database written by `atlas-build`.
    pub db_path: PathBuf,

    /// Lifetime of cached responses.
    pub cache_ttl: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            db_path: PathBuf::from("./data/atlas.db"),
            cache_ttl: DEFAULT_TTL,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Optional environment variables:
    /// - `ATLAS_BIND_ADDR`: Server bind address (default: "0.0.0.0:8080")
    /// - `ATLAS_DB_PATH`: Database path (default: "./data/atlas.db")
    /// - `ATLAS_CACHE_TTL_SECS`: Response cache TTL in seconds (default: 300)
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let bind_addr = std::env::var("ATLAS_BIND_ADDR").unwrap_or(defaults.bind_addr);

        let db_path = std::env::var("ATLAS_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.db_path);

        let cache_ttl = match std::env::var("ATLAS_CACHE_TTL_SECS") {
            Ok(raw) => Duration::from_secs(
                raw.trim()
                    .parse()
                    .with_context(|| format!("ATLAS_CACHE_TTL_SECS must be an integer, got '{}'", raw))?,
            ),
            Err(_) => defaults.cache_ttl,
        };

        Ok(Self {
            bind_addr,
            db_path,
            cache_ttl,
        })
    }
}

/// Shared application state available to all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Artifact store.
    pub store: Arc<SqliteStore>,

    /// Application configuration.
    pub config: Arc<Config>,

    /// Serialized responses keyed by endpoint and parameters.
    pub cache: ResponseCache,
}

impl AppState {
    /// Open the store named by the configuration.
    ///
    /// The database must already exist; the server never creates one.
    pub fn new(config: Config) -> anyhow::Result<Self> {
        if !config.db_path.exists() {
            anyhow::bail!(
                "database {} does not exist; run atlas-build first",
                config.db_path.display()
            );
        }
        let store = SqliteStore::open(&config.db_path)
            .with_context(|| format!("Failed to open {}", config.db_path.display()))?;
        tracing::info!("Artifact store opened: {}", config.db_path.display());
        Ok(Self::with_store(Arc::new(store), config))
    }

    /// Build state around an already-open store.
    pub fn with_store(store: Arc<SqliteStore>, config: Config) -> Self {
        Self {
            store,
            cache: new_cache(config.cache_ttl),
            config: Arc::new(config),
        }
    }
}
