// ABOUTME: Environment-driven configuration for upstream endpoints, Redis, and the engine
// ABOUTME: Typed config structs with defaults and from_env() constructors
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 SellerSync Contributors

use crate::cache::CacheConfig;
use crate::queue::QueueConfig;
use crate::scheduler::SchedulerConfig;
use std::env;

/// Redis connection and retry configuration
#[derive(Debug, Clone)]
pub struct RedisConnectionConfig {
    /// Timeout for establishing a connection
    pub connection_timeout_secs: u64,
    /// Timeout for individual command responses
    pub response_timeout_secs: u64,
    /// Retries during initial connection establishment
    pub initial_connection_retries: usize,
    /// Delay before the first reconnect attempt
    pub initial_retry_delay_ms: u64,
    /// Cap on reconnect delay growth
    pub max_retry_delay_ms: u64,
    /// Retries the connection manager performs per lost connection
    pub reconnection_retries: usize,
    /// Exponent base for the connection manager's backoff
    pub retry_exponent_base: u64,
}

impl Default for RedisConnectionConfig {
    fn default() -> Self {
        Self {
            connection_timeout_secs: 5,
            response_timeout_secs: 5,
            initial_connection_retries: 3,
            initial_retry_delay_ms: 500,
            max_retry_delay_ms: 10_000,
            reconnection_retries: 6,
            retry_exponent_base: 2,
        }
    }
}

/// Upstream endpoints for token exchange, role assumption, and signed resource calls
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// OAuth2 token endpoint (refresh-token grant)
    pub token_endpoint: String,
    /// Role assumption endpoint issuing temporary signing credentials
    pub identity_endpoint: String,
    /// Base URL of the signed resource API
    pub api_endpoint: String,
    /// Region used in the signing credential scope
    pub region: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            token_endpoint: "https://api.amazon.com/auth/o2/token".to_owned(),
            identity_endpoint: "https://sts.amazonaws.com/".to_owned(),
            api_endpoint: "https://sellingpartnerapi-na.amazon.com".to_owned(),
            region: "us-east-1".to_owned(),
        }
    }
}

impl UpstreamConfig {
    /// Create upstream configuration from environment variables
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            token_endpoint: env::var("PARTNER_TOKEN_ENDPOINT").unwrap_or(defaults.token_endpoint),
            identity_endpoint: env::var("PARTNER_IDENTITY_ENDPOINT")
                .unwrap_or(defaults.identity_endpoint),
            api_endpoint: env::var("PARTNER_API_ENDPOINT").unwrap_or(defaults.api_endpoint),
            region: env::var("PARTNER_REGION").unwrap_or(defaults.region),
        }
    }
}

/// Top-level engine configuration aggregating every subsystem
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Shared cache configuration
    pub cache: CacheConfig,
    /// Work queue configuration
    pub queue: QueueConfig,
    /// Sync scheduler configuration
    pub scheduler: SchedulerConfig,
    /// Upstream endpoint configuration
    pub upstream: UpstreamConfig,
}

impl EngineConfig {
    /// Create engine configuration from environment variables
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            cache: CacheConfig::from_env(),
            queue: QueueConfig::from_env(),
            scheduler: SchedulerConfig::from_env(),
            upstream: UpstreamConfig::from_env(),
        }
    }
}

/// Parse an environment variable, falling back to a default when unset or invalid
pub(crate) fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
