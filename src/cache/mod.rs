// ABOUTME: Cache abstraction layer shared by token brokering, locking, and credential caching
// ABOUTME: Pluggable backend support (in-memory, Redis) with TTL and atomic primitives
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 SellerSync Contributors

/// Cache factory for creating cache backends
pub mod factory;
/// In-memory cache implementation
pub mod memory;
/// Redis cache implementation
pub mod redis;

use crate::config::RedisConnectionConfig;
use crate::constants::cache::{DEFAULT_CACHE_MAX_ENTRIES, DEFAULT_CLEANUP_INTERVAL_SECS};
use crate::constants::tokens::REFRESH_TOKEN_PREFIX_LEN;
use crate::errors::AppResult;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Cache provider trait for pluggable backend implementations
///
/// Beyond plain TTL'd get/set, backends expose two atomic primitives the
/// distributed lock layer is built on: `set_nx` (store only if the key is
/// absent) and `compare_and_delete` (delete only while the stored value still
/// matches). Readers must treat every entry as advisory and re-validate
/// freshness; the cache is shared and mutated by any broker instance.
#[async_trait::async_trait]
pub trait CacheProvider: Send + Sync + Clone {
    /// Create new cache instance with configuration
    ///
    /// # Errors
    ///
    /// Returns an error if cache initialization fails
    async fn new(config: CacheConfig) -> AppResult<Self>
    where
        Self: Sized;

    /// Store value in cache with TTL, overwriting any existing entry
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or storage fails
    async fn set<T: Serialize + Send + Sync>(
        &self,
        key: &CacheKey,
        value: &T,
        ttl: Duration,
    ) -> AppResult<()>;

    /// Retrieve value from cache
    ///
    /// # Errors
    ///
    /// Returns an error if deserialization fails
    async fn get<T: for<'de> Deserialize<'de>>(&self, key: &CacheKey) -> AppResult<Option<T>>;

    /// Store a raw string value only if the key is absent. Returns true when
    /// the write won the key.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails
    async fn set_nx(&self, key: &CacheKey, value: &str, ttl: Duration) -> AppResult<bool>;

    /// Delete the key only if its stored value equals `expected`. Returns true
    /// when the entry was deleted by this call.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails
    async fn compare_and_delete(&self, key: &CacheKey, expected: &str) -> AppResult<bool>;

    /// Remove single cache entry
    ///
    /// # Errors
    ///
    /// Returns an error if invalidation fails
    async fn invalidate(&self, key: &CacheKey) -> AppResult<()>;

    /// Remove all cache entries matching pattern (e.g., `token:client-1:*`)
    ///
    /// # Errors
    ///
    /// Returns an error if pattern invalidation fails
    async fn invalidate_pattern(&self, pattern: &str) -> AppResult<u64>;

    /// Check if key exists in cache
    ///
    /// # Errors
    ///
    /// Returns an error if existence check fails
    async fn exists(&self, key: &CacheKey) -> AppResult<bool>;

    /// Get remaining TTL for key
    ///
    /// # Errors
    ///
    /// Returns an error if TTL check fails
    async fn ttl(&self, key: &CacheKey) -> AppResult<Option<Duration>>;

    /// Verify cache backend is healthy
    ///
    /// # Errors
    ///
    /// Returns an error if health check fails
    async fn health_check(&self) -> AppResult<()>;

    /// Clear all cache entries in this crate's namespace (for testing/admin)
    ///
    /// # Errors
    ///
    /// Returns an error if clear operation fails
    async fn clear_all(&self) -> AppResult<()>;
}

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of entries (for in-memory cache)
    pub max_entries: usize,
    /// Redis connection URL; presence selects the Redis backend
    pub redis_url: Option<String>,
    /// Cleanup interval for expired entries
    pub cleanup_interval: Duration,
    /// Enable background cleanup task (should be false in tests to avoid runtime conflicts)
    pub enable_background_cleanup: bool,
    /// Redis connection and retry configuration
    pub redis_connection: RedisConnectionConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_CACHE_MAX_ENTRIES,
            redis_url: None,
            cleanup_interval: Duration::from_secs(DEFAULT_CLEANUP_INTERVAL_SECS),
            enable_background_cleanup: true,
            redis_connection: RedisConnectionConfig::default(),
        }
    }
}

impl CacheConfig {
    /// Create cache configuration from environment variables
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            max_entries: crate::config::env_parse("CACHE_MAX_ENTRIES", DEFAULT_CACHE_MAX_ENTRIES),
            redis_url: std::env::var("REDIS_URL").ok(),
            cleanup_interval: Duration::from_secs(crate::config::env_parse(
                "CACHE_CLEANUP_INTERVAL_SECS",
                DEFAULT_CLEANUP_INTERVAL_SECS,
            )),
            enable_background_cleanup: true,
            redis_connection: RedisConnectionConfig::default(),
        }
    }
}

/// Structured cache key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Specific resource being cached
    pub resource: CacheResource,
}

impl CacheKey {
    /// Key for a cached access token. Only a short prefix of the refresh token
    /// is mixed in; the full secret never appears in a key.
    #[must_use]
    pub fn access_token(client_id: &str, refresh_token: &str) -> Self {
        Self {
            resource: CacheResource::AccessToken {
                client_id: client_id.to_owned(),
                refresh_token_prefix: refresh_token
                    .chars()
                    .take(REFRESH_TOKEN_PREFIX_LEN)
                    .collect(),
            },
        }
    }

    /// Key for a cached signing credential, one per role ARN
    #[must_use]
    pub fn signing_credential(role_arn: &str) -> Self {
        Self {
            resource: CacheResource::SigningCredential {
                role_arn: role_arn.to_owned(),
            },
        }
    }

    /// Key for a distributed lock lease
    #[must_use]
    pub fn lock(name: &str) -> Self {
        Self {
            resource: CacheResource::LockLease {
                name: name.to_owned(),
            },
        }
    }

    /// Pattern matching every access-token entry for a client, any prefix
    #[must_use]
    pub fn client_token_pattern(client_id: &str) -> String {
        format!("token:{client_id}:*")
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.resource)
    }
}

/// Cache resource types
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheResource {
    /// Short-lived access token, keyed by client and refresh-token prefix
    AccessToken {
        /// OAuth client identifier
        client_id: String,
        /// Short prefix of the refresh token used for the exchange
        refresh_token_prefix: String,
    },
    /// Temporary signing credential for a delegated role
    SigningCredential {
        /// Role ARN the credential was assumed for
        role_arn: String,
    },
    /// Mutual-exclusion lease owned by a single lock holder
    LockLease {
        /// Lock name, usually derived from the resource being guarded
        name: String,
    },
}

impl fmt::Display for CacheResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AccessToken {
                client_id,
                refresh_token_prefix,
            } => write!(f, "token:{client_id}:{refresh_token_prefix}"),
            Self::SigningCredential { role_arn } => write!(f, "role:{role_arn}"),
            Self::LockLease { name } => write!(f, "lock:{name}"),
        }
    }
}
