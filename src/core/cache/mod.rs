//! Key-value cache in front of the user table
//!
//! The cache is a hash-per-key store. User entries live under `user:<id>`;
//! the relational store stays authoritative and the repository keeps the two
//! in step.

mod memory;
mod redis;

use std::collections::HashMap;
use std::future::Future;

pub use self::memory::MemoryUserCache;
pub use self::redis::{RedisConfig, RedisUserCache, create_redis_pool};

/// Key namespace for user entries
pub const USER_KEY_PREFIX: &str = "user:";

/// Cache key for a user id
pub fn user_key(id: impl std::fmt::Display) -> String {
    format!("{USER_KEY_PREFIX}{id}")
}

/// Cache errors
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Redis error: {0}")]
    Redis(#[from] deadpool_redis::redis::RedisError),

    #[error("Redis pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    #[error("Cache unavailable: {0}")]
    Unavailable(String),
}

/// Hash-per-key cache used by the user repository
pub trait UserCache: Clone + Send + Sync + 'static {
    /// All keys starting with `prefix`
    fn keys_with_prefix(
        &self,
        prefix: &str,
    ) -> impl Future<Output = Result<Vec<String>, CacheError>> + Send;

    fn exists(&self, key: &str) -> impl Future<Output = Result<bool, CacheError>> + Send;

    /// Every field of the hash at `key`; empty when the key is absent
    fn get_fields(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<HashMap<String, String>, CacheError>> + Send;

    /// Write the given fields into the hash at `key`
    fn set_fields(
        &self,
        key: &str,
        fields: &[(&'static str, String)],
    ) -> impl Future<Output = Result<(), CacheError>> + Send;

    fn delete(&self, key: &str) -> impl Future<Output = Result<(), CacheError>> + Send;
}
