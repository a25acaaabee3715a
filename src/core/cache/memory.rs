//! In-process user cache backed by a concurrent map

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;

use super::{CacheError, UserCache};

/// Local-only cache, used when no Redis URL is configured and in tests
#[derive(Clone, Default)]
pub struct MemoryUserCache {
    entries: Arc<DashMap<String, HashMap<String, String>>>,
}

impl MemoryUserCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached keys
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry, as a cache flush would
    pub fn flush(&self) {
        self.entries.clear();
    }
}

impl UserCache for MemoryUserCache {
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, CacheError> {
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.entries.contains_key(key))
    }

    async fn get_fields(&self, key: &str) -> Result<HashMap<String, String>, CacheError> {
        Ok(self
            .entries
            .get(key)
            .map(|entry| entry.value().clone())
            .unwrap_or_default())
    }

    async fn set_fields(&self, key: &str, fields: &[(&'static str, String)]) -> Result<(), CacheError> {
        let mut entry = self.entries.entry(key.to_string()).or_default();
        for (name, value) in fields {
            entry.insert(name.to_string(), value.clone());
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_and_get_fields() {
        let cache = MemoryUserCache::new();

        cache
            .set_fields("user:1", &[("username", "ada".to_string())])
            .await
            .unwrap();

        let fields = cache.get_fields("user:1").await.unwrap();
        assert_eq!(fields.get("username"), Some(&"ada".to_string()));
        assert!(cache.exists("user:1").await.unwrap());
    }

    #[tokio::test]
    async fn test_set_fields_merges_into_existing_hash() {
        let cache = MemoryUserCache::new();

        cache
            .set_fields("user:1", &[("username", "ada".to_string()), ("role", "user".to_string())])
            .await
            .unwrap();
        cache
            .set_fields("user:1", &[("role", "admin".to_string())])
            .await
            .unwrap();

        let fields = cache.get_fields("user:1").await.unwrap();
        assert_eq!(fields.get("username"), Some(&"ada".to_string()));
        assert_eq!(fields.get("role"), Some(&"admin".to_string()));
    }

    #[tokio::test]
    async fn test_missing_key_reads_empty() {
        let cache = MemoryUserCache::new();

        assert!(cache.get_fields("user:404").await.unwrap().is_empty());
        assert!(!cache.exists("user:404").await.unwrap());
    }

    #[tokio::test]
    async fn test_keys_with_prefix_filters_namespace() {
        let cache = MemoryUserCache::new();
        cache.set_fields("user:2", &[]).await.unwrap();
        cache.set_fields("user:1", &[]).await.unwrap();
        cache.set_fields("post:1", &[]).await.unwrap();

        let keys = cache.keys_with_prefix("user:").await.unwrap();
        assert_eq!(keys, vec!["user:1".to_string(), "user:2".to_string()]);
    }

    #[tokio::test]
    async fn test_delete_and_flush() {
        let cache = MemoryUserCache::new();
        cache.set_fields("user:1", &[]).await.unwrap();
        cache.set_fields("user:2", &[]).await.unwrap();

        cache.delete("user:1").await.unwrap();
        assert_eq!(cache.len(), 1);

        cache.flush();
        assert!(cache.is_empty());
    }
}
