//! In-memory response caching with moka.
//!
//! Artifacts only change when `atlas-build` replaces them, so every entry
//! shares one TTL. Keys are the endpoint name plus any query parameter that
//! changes the response (e.g. `diagnosis_icicle:min_count=10`).

use std::future::Future;
use std::time::Duration;

use moka::future::Cache;
use serde::{Serialize, de::DeserializeOwned};

use crate::error::ApiError;

/// Default cache capacity (number of entries).
pub const DEFAULT_CACHE_CAPACITY: u64 = 1000;

/// Default TTL for cached entries.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Cached response with metadata.
#[derive(Clone, Debug)]
pub struct CachedEntry {
    /// Serialized JSON response.
    pub json: String,
    /// When this entry was cached.
    pub cached_at: chrono::DateTime<chrono::Utc>,
}

/// Type alias for the response cache.
pub type ResponseCache = Cache<String, CachedEntry>;

/// Create a response cache whose entries expire after `ttl`.
pub fn new_cache(ttl: Duration) -> ResponseCache {
    Cache::builder()
        .max_capacity(DEFAULT_CACHE_CAPACITY)
        .time_to_live(ttl)
        .build()
}

/// Get a cached value or compute and cache it.
///
/// Errors are returned to the caller and never cached.
pub async fn get_or_compute<T, F, Fut>(
    cache: &ResponseCache,
    key: &str,
    compute: F,
) -> Result<T, ApiError>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    if let Some(entry) = cache.get(key).await {
        match serde_json::from_str(&entry.json) {
            Ok(value) => {
                tracing::debug!(key = %key, cached_at = %entry.cached_at, "cache hit");
                return Ok(value);
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "failed to deserialize cached entry");
            }
        }
    }

    tracing::debug!(key = %key, "cache miss, computing");
    let value = compute().await?;

    match serde_json::to_string(&value) {
        Ok(json) => {
            let entry = CachedEntry {
                json,
                cached_at: chrono::Utc::now(),
            };
            cache.insert(key.to_string(), entry).await;
        }
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "failed to serialize for cache");
        }
    }

    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cache_hit() {
        let cache = new_cache(DEFAULT_TTL);

        let result: u64 = get_or_compute(&cache, "heatmap", || async { Ok(42) })
            .await
            .unwrap();
        assert_eq!(result, 42);

        let result: u64 = get_or_compute(&cache, "heatmap", || async {
            panic!("compute should not be called on cache hit")
        })
        .await
        .unwrap();
        assert_eq!(result, 42);
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let cache = new_cache(DEFAULT_TTL);

        let first: Result<u64, ApiError> = get_or_compute(&cache, "icicle", || async {
            Err(ApiError::NotFound("diagnosis_hierarchy".to_string()))
        })
        .await;
        assert!(matches!(first, Err(ApiError::NotFound(_))));

        let second: u64 = get_or_compute(&cache, "icicle", || async { Ok(7) })
            .await
            .unwrap();
        assert_eq!(second, 7);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let cache = new_cache(DEFAULT_TTL);
        let a: u64 = get_or_compute(&cache, "icicle:min_count=1", || async { Ok(1) })
            .await
            .unwrap();
        let b: u64 = get_or_compute(&cache, "icicle:min_count=2", || async { Ok(2) })
            .await
            .unwrap();
        assert_eq!((a, b), (1, 2));
    }
}
