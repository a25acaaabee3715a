//! Redis-backed user cache

use std::collections::HashMap;
use std::time::Duration;

use deadpool_redis::{Pool, PoolConfig, Runtime, redis::AsyncCommands};

use super::{CacheError, UserCache};

/// Redis connection settings
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis connection URL (e.g., redis://localhost:6379)
    pub url: String,
    /// Maximum pooled connections
    pub pool_size: usize,
    /// Wait/create/recycle timeout in milliseconds
    pub timeout_ms: u64,
}

impl RedisConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            pool_size: 16,
            timeout_ms: 5000,
        }
    }

    /// Set pool size
    pub fn pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }
}

/// Create a Redis pool and check that a connection can be obtained
pub async fn create_redis_pool(config: &RedisConfig) -> Result<Pool, CacheError> {
    tracing::info!(url = %config.url, "Connecting to Redis");

    let pool = build_pool(config)?;
    pool.get().await?;
    tracing::info!("Connected to Redis successfully");

    Ok(pool)
}

/// Build the pool without connecting. `Config::from_url` leaves the pool
/// settings unset, so they are filled in here.
fn build_pool(config: &RedisConfig) -> Result<Pool, CacheError> {
    let timeout = Some(Duration::from_millis(config.timeout_ms));

    let mut redis_config = deadpool_redis::Config::from_url(&config.url);
    let pool_config = redis_config.pool.get_or_insert_with(PoolConfig::default);
    pool_config.max_size = config.pool_size;
    pool_config.timeouts.wait = timeout;
    pool_config.timeouts.create = timeout;
    pool_config.timeouts.recycle = timeout;

    redis_config
        .create_pool(Some(Runtime::Tokio1))
        .map_err(|e| CacheError::Unavailable(e.to_string()))
}

/// User cache over a Redis connection pool
#[derive(Clone)]
pub struct RedisUserCache {
    pool: Pool,
}

impl RedisUserCache {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

impl UserCache for RedisUserCache {
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, CacheError> {
        let mut conn = self.pool.get().await?;
        let keys: Vec<String> = conn.keys(format!("{prefix}*")).await?;
        Ok(keys)
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.pool.get().await?;
        let exists: bool = conn.exists(key).await?;
        Ok(exists)
    }

    async fn get_fields(&self, key: &str) -> Result<HashMap<String, String>, CacheError> {
        let mut conn = self.pool.get().await?;
        let fields: HashMap<String, String> = conn.hgetall(key).await?;
        Ok(fields)
    }

    async fn set_fields(&self, key: &str, fields: &[(&'static str, String)]) -> Result<(), CacheError> {
        let mut conn = self.pool.get().await?;
        let _: () = conn.hset_multiple(key, fields).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.pool.get().await?;
        let _: () = conn.del(key).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cache::user_key;

    #[test]
    fn test_redis_config_defaults() {
        let config = RedisConfig::new("redis://localhost:6379");

        assert_eq!(config.url, "redis://localhost:6379");
        assert_eq!(config.pool_size, 16);
        assert_eq!(config.timeout_ms, 5000);
    }

    #[test]
    fn test_redis_config_pool_size() {
        let config = RedisConfig::new("redis://localhost").pool_size(4);
        assert_eq!(config.pool_size, 4);
    }

    #[tokio::test]
    async fn test_pool_uses_configured_size() {
        let config = RedisConfig::new("redis://localhost:6379").pool_size(3);
        let pool = build_pool(&config).unwrap();

        assert_eq!(pool.status().max_size, 3);
        assert_eq!(pool.status().size, 0);
    }

    #[tokio::test]
    async fn test_pool_uses_configured_timeouts() {
        let mut config = RedisConfig::new("redis://localhost:6379");
        config.timeout_ms = 250;
        let pool = build_pool(&config).unwrap();

        let timeouts = pool.timeouts();
        assert_eq!(timeouts.wait, Some(Duration::from_millis(250)));
        assert_eq!(timeouts.create, Some(Duration::from_millis(250)));
        assert_eq!(timeouts.recycle, Some(Duration::from_millis(250)));
    }

    #[tokio::test]
    #[ignore = "requires running Redis server"]
    async fn test_redis_hash_round_trip() {
        let url = std::env::var("REDIS_URL").expect("REDIS_URL must be set");
        let pool = create_redis_pool(&RedisConfig::new(url)).await.unwrap();
        let cache = RedisUserCache::new(pool);
        let key = user_key(format!("test-{}", uuid::Uuid::new_v4()));

        cache
            .set_fields(&key, &[("username", "ada".to_string())])
            .await
            .unwrap();
        assert!(cache.exists(&key).await.unwrap());
        assert_eq!(
            cache.get_fields(&key).await.unwrap().get("username"),
            Some(&"ada".to_string())
        );

        cache.delete(&key).await.unwrap();
        assert!(!cache.exists(&key).await.unwrap());
    }
}
