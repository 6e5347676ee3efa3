// ABOUTME: Centralized constants for cache TTLs, lock leases, retry budgets, and queue defaults
// ABOUTME: Single place to tune timing behavior without hunting through modules
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 SellerSync Contributors

/// Cache-related constants
pub mod cache {
    /// Namespace prefix for every key this crate writes to a shared backend
    pub const CACHE_KEY_PREFIX: &str = "sellersync:";

    /// Default maximum entries for the in-memory backend
    pub const DEFAULT_CACHE_MAX_ENTRIES: usize = 10_000;

    /// Default interval between background sweeps of expired entries
    pub const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 300;
}

/// Token lifecycle constants
pub mod tokens {
    /// A cached token with less remaining life than this is treated as expired
    pub const EXPIRY_BUFFER_MS: i64 = 60_000;

    /// Number of refresh-token characters mixed into the cache key.
    /// Long enough to distinguish rotations, short enough to never leak the secret.
    pub const REFRESH_TOKEN_PREFIX_LEN: usize = 10;

    /// Timeout for the upstream token exchange call
    pub const TOKEN_EXCHANGE_TIMEOUT_SECS: u64 = 10;

    /// Delegated role session duration requested from the identity upstream
    pub const ROLE_SESSION_DURATION_SECS: u64 = 3600;
}

/// Distributed lock constants
pub mod locks {
    /// Lease TTL for a refresh lock; a crashed holder frees the key after this
    pub const REFRESH_LOCK_TTL_SECS: u64 = 30;

    /// How long a contender polls the cache before refreshing anyway
    pub const CONTENTION_WAIT_MS: u64 = 5_000;

    /// Poll interval while waiting on another holder's refresh
    pub const CONTENTION_POLL_INTERVAL_MS: u64 = 500;
}

/// Upstream gateway constants
pub mod gateway {
    /// Timeout for signed upstream resource calls
    pub const REQUEST_TIMEOUT_SECS: u64 = 30;

    /// Default transport-level retry attempts within one logical call
    pub const DEFAULT_RETRY_COUNT: u32 = 3;

    /// Base delay for 429 backoff when no Retry-After hint is present
    pub const RATE_LIMIT_BASE_DELAY_MS: u64 = 5_000;

    /// Cap for 429 backoff
    pub const RATE_LIMIT_MAX_DELAY_MS: u64 = 30_000;

    /// Base delay for 5xx/network backoff
    pub const SERVER_ERROR_BASE_DELAY_MS: u64 = 1_000;

    /// Signing service name used in the credential scope
    pub const SIGNING_SERVICE: &str = "execute-api";
}

/// Queue and scheduler defaults
pub mod queue {
    /// Workers pulling jobs concurrently per queue
    pub const DEFAULT_CONCURRENCY: usize = 5;

    /// Jobs per second across the whole worker pool
    pub const DEFAULT_RATE_LIMIT_PER_SEC: u32 = 10;

    /// Native attempt budget when a job specifies none
    pub const DEFAULT_JOB_ATTEMPTS: u32 = 3;

    /// Priority assigned to manual (user-triggered) syncs
    pub const MANUAL_SYNC_PRIORITY: i32 = 10;

    /// Minutes between scheduler ticks
    pub const DEFAULT_SCHEDULER_INTERVAL_MINS: u64 = 15;

    /// Maximum characters of an error message copied into a dead-letter record
    pub const DEAD_LETTER_ERROR_EXCERPT_LEN: usize = 500;
}

/// Service identity
pub mod service {
    /// Service name for structured logging
    pub const SERVICE_NAME: &str = "sellersync";
}
