// ABOUTME: Cache-backed distributed lock with owner-token-gated release
// ABOUTME: Advisory mutual exclusion for serializing credential refreshes across workers
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 SellerSync Contributors

use crate::cache::{factory::Cache, CacheKey};
use crate::errors::AppResult;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Lease held by a successful lock acquisition
///
/// Release goes through compare-and-delete with the owner token, so a lease
/// that expired and was re-acquired by another holder cannot be deleted by
/// the original (slow) holder.
#[derive(Debug)]
pub struct LockGuard {
    /// Cache key the lease lives under
    pub key: CacheKey,
    /// Token identifying this holder; required to release
    pub owner_token: String,
    /// Lease TTL granted at acquisition
    pub ttl: Duration,
}

/// Distributed mutual-exclusion lease built on the shared cache
///
/// The lock is advisory. Holders can crash without releasing; the lease TTL
/// frees the key, and contenders are expected to re-validate cached state
/// rather than trust the lock's mere existence.
#[derive(Clone)]
pub struct DistributedLock {
    cache: Cache,
}

impl DistributedLock {
    /// Create a lock manager over the shared cache
    #[must_use]
    pub const fn new(cache: Cache) -> Self {
        Self { cache }
    }

    /// Try to acquire the lease named `name` for `ttl`. Returns `None` when
    /// another holder currently owns it.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache backend fails
    pub async fn acquire(&self, name: &str, ttl: Duration) -> AppResult<Option<LockGuard>> {
        let key = CacheKey::lock(name);
        let owner_token = Uuid::new_v4().to_string();

        if self.cache.set_nx(&key, &owner_token, ttl).await? {
            debug!(lock = %key, "Acquired distributed lock");
            Ok(Some(LockGuard {
                key,
                owner_token,
                ttl,
            }))
        } else {
            debug!(lock = %key, "Distributed lock contended");
            Ok(None)
        }
    }

    /// Release a held lease. A lease that expired and was taken over by
    /// another holder is left untouched and logged at warn level; this is an
    /// expected outcome for slow holders, not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache backend fails
    pub async fn release(&self, guard: LockGuard) -> AppResult<()> {
        let released = self
            .cache
            .compare_and_delete(&guard.key, &guard.owner_token)
            .await?;

        if released {
            debug!(lock = %guard.key, "Released distributed lock");
        } else {
            warn!(
                lock = %guard.key,
                "Lock lease expired or was taken over before release"
            );
        }

        Ok(())
    }
}
