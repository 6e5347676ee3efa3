// ABOUTME: Cache factory selecting the backend from configuration
// ABOUTME: Unified Cache front dispatching to in-memory or Redis implementations
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 SellerSync Contributors

use super::{memory::InMemoryCache, redis::RedisCache, CacheConfig, CacheKey, CacheProvider};
use crate::errors::AppResult;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Unified cache interface over the configured backend
///
/// A Redis URL in the configuration selects the distributed backend; otherwise
/// the process-local in-memory cache is used. Multi-worker deployments need
/// Redis for the cross-process refresh-lock guarantee.
#[derive(Clone)]
pub enum Cache {
    /// Process-local backend
    Memory(InMemoryCache),
    /// Distributed backend
    Redis(RedisCache),
}

impl Cache {
    /// Create new cache instance based on configuration
    ///
    /// # Errors
    ///
    /// Returns an error if cache initialization fails
    pub async fn new(config: CacheConfig) -> AppResult<Self> {
        if config.redis_url.is_some() {
            tracing::info!("Initializing Redis cache backend");
            Ok(Self::Redis(RedisCache::new(config).await?))
        } else {
            tracing::info!(
                "Initializing in-memory cache (max entries: {})",
                config.max_entries
            );
            Ok(Self::Memory(InMemoryCache::new(config).await?))
        }
    }

    /// Create cache from environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if cache initialization fails
    pub async fn from_env() -> AppResult<Self> {
        Self::new(CacheConfig::from_env()).await
    }

    /// Store value in cache with TTL
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or storage fails
    pub async fn set<T: Serialize + Send + Sync>(
        &self,
        key: &CacheKey,
        value: &T,
        ttl: Duration,
    ) -> AppResult<()> {
        match self {
            Self::Memory(inner) => inner.set(key, value, ttl).await,
            Self::Redis(inner) => inner.set(key, value, ttl).await,
        }
    }

    /// Retrieve value from cache
    ///
    /// # Errors
    ///
    /// Returns an error if deserialization fails
    pub async fn get<T: for<'de> Deserialize<'de>>(&self, key: &CacheKey) -> AppResult<Option<T>> {
        match self {
            Self::Memory(inner) => inner.get(key).await,
            Self::Redis(inner) => inner.get(key).await,
        }
    }

    /// Store a raw string value only if the key is absent
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails
    pub async fn set_nx(&self, key: &CacheKey, value: &str, ttl: Duration) -> AppResult<bool> {
        match self {
            Self::Memory(inner) => inner.set_nx(key, value, ttl).await,
            Self::Redis(inner) => inner.set_nx(key, value, ttl).await,
        }
    }

    /// Delete the key only if its stored value equals `expected`
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails
    pub async fn compare_and_delete(&self, key: &CacheKey, expected: &str) -> AppResult<bool> {
        match self {
            Self::Memory(inner) => inner.compare_and_delete(key, expected).await,
            Self::Redis(inner) => inner.compare_and_delete(key, expected).await,
        }
    }

    /// Remove single cache entry
    ///
    /// # Errors
    ///
    /// Returns an error if invalidation fails
    pub async fn invalidate(&self, key: &CacheKey) -> AppResult<()> {
        match self {
            Self::Memory(inner) => inner.invalidate(key).await,
            Self::Redis(inner) => inner.invalidate(key).await,
        }
    }

    /// Remove all cache entries matching pattern
    ///
    /// # Errors
    ///
    /// Returns an error if pattern invalidation fails
    pub async fn invalidate_pattern(&self, pattern: &str) -> AppResult<u64> {
        match self {
            Self::Memory(inner) => inner.invalidate_pattern(pattern).await,
            Self::Redis(inner) => inner.invalidate_pattern(pattern).await,
        }
    }

    /// Check if key exists in cache
    ///
    /// # Errors
    ///
    /// Returns an error if existence check fails
    pub async fn exists(&self, key: &CacheKey) -> AppResult<bool> {
        match self {
            Self::Memory(inner) => inner.exists(key).await,
            Self::Redis(inner) => inner.exists(key).await,
        }
    }

    /// Get remaining TTL for key
    ///
    /// # Errors
    ///
    /// Returns an error if TTL check fails
    pub async fn ttl(&self, key: &CacheKey) -> AppResult<Option<Duration>> {
        match self {
            Self::Memory(inner) => inner.ttl(key).await,
            Self::Redis(inner) => inner.ttl(key).await,
        }
    }

    /// Verify cache backend is healthy
    ///
    /// # Errors
    ///
    /// Returns an error if health check fails
    pub async fn health_check(&self) -> AppResult<()> {
        match self {
            Self::Memory(inner) => inner.health_check().await,
            Self::Redis(inner) => inner.health_check().await,
        }
    }

    /// Clear all cache entries in this crate's namespace
    ///
    /// # Errors
    ///
    /// Returns an error if clear operation fails
    pub async fn clear_all(&self) -> AppResult<()> {
        match self {
            Self::Memory(inner) => inner.clear_all().await,
            Self::Redis(inner) => inner.clear_all().await,
        }
    }
}
