// ABOUTME: Exchanges long-lived refresh credentials for short-lived access tokens
// ABOUTME: Serializes concurrent refreshes with a distributed lock and persists rotations
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 SellerSync Contributors

use super::{AccessTokenGrant, CachedAccessToken, SellerCredential};
use crate::cache::{factory::Cache, CacheKey};
use crate::constants::locks::{
    CONTENTION_POLL_INTERVAL_MS, CONTENTION_WAIT_MS, REFRESH_LOCK_TTL_SECS,
};
use crate::constants::tokens::{EXPIRY_BUFFER_MS, TOKEN_EXCHANGE_TIMEOUT_SECS};
use crate::errors::{AppError, AppResult};
use crate::lock::DistributedLock;
use crate::storage::CredentialStore;
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Upstream token endpoint response
#[derive(Debug, Deserialize)]
struct TokenExchangeResponse {
    access_token: String,
    #[allow(dead_code)]
    token_type: Option<String>,
    expires_in: u64,
    refresh_token: Option<String>,
}

/// Broker exchanging refresh credentials for cached short-lived access tokens
///
/// At most one upstream exchange is in flight per (client, refresh-token
/// prefix): the winner of the distributed lock refreshes and caches, every
/// contender polls the cache and reuses the result. The lock is advisory; a
/// contender that waits out the poll window refreshes anyway rather than
/// deadlocking on a crashed holder.
pub struct TokenBroker {
    http: reqwest::Client,
    cache: Cache,
    lock: DistributedLock,
    credentials: Arc<dyn CredentialStore>,
    token_endpoint: String,
}

impl TokenBroker {
    /// Create a token broker
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed
    pub fn new(
        cache: Cache,
        credentials: Arc<dyn CredentialStore>,
        token_endpoint: impl Into<String>,
    ) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(TOKEN_EXCHANGE_TIMEOUT_SECS))
            .build()
            .map_err(|e| AppError::internal(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            lock: DistributedLock::new(cache.clone()),
            http,
            cache,
            credentials,
            token_endpoint: token_endpoint.into(),
        })
    }

    /// Resolve a usable access token for the credential, refreshing upstream
    /// only when the cached token is missing, stale, or a refresh is forced
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for unusable credentials, `AuthInvalid` when the
    /// upstream rejects the exchange, and `ExternalServiceError` for transient
    /// upstream failures
    pub async fn get_access_token(
        &self,
        credential: &SellerCredential,
        force_refresh: bool,
    ) -> AppResult<AccessTokenGrant> {
        if credential.client_id.is_empty() {
            return Err(AppError::invalid_input("credential is missing client_id"));
        }
        if credential.refresh_token.is_empty() {
            return Err(AppError::invalid_input(
                "credential is missing refresh_token",
            ));
        }

        let key = CacheKey::access_token(&credential.client_id, &credential.refresh_token);

        if !force_refresh {
            if let Some(grant) = self.cached_grant(&key).await? {
                return Ok(grant);
            }
        }

        let lock_name = key.to_string();
        let lease_ttl = Duration::from_secs(REFRESH_LOCK_TTL_SECS);

        match self.lock.acquire(&lock_name, lease_ttl).await? {
            Some(guard) => {
                // Another holder may have refreshed between our cache miss and
                // the lock grant; re-check before calling upstream.
                if !force_refresh {
                    if let Some(grant) = self.cached_grant(&key).await? {
                        self.release_quietly(guard).await;
                        return Ok(grant);
                    }
                }

                let result = self.refresh_and_cache(credential, &key).await;
                self.release_quietly(guard).await;
                result
            }
            None => {
                // Poll for the winner's result, bounded. The lock is advisory:
                // after the window we refresh anyway so a crashed holder can
                // never wedge every contender.
                if !force_refresh {
                    let deadline =
                        Instant::now() + Duration::from_millis(CONTENTION_WAIT_MS);
                    while Instant::now() < deadline {
                        tokio::time::sleep(Duration::from_millis(CONTENTION_POLL_INTERVAL_MS))
                            .await;
                        if let Some(grant) = self.cached_grant(&key).await? {
                            return Ok(grant);
                        }
                    }
                    debug!(
                        client_id = %credential.client_id,
                        "Lock contention wait exhausted; refreshing without the lock"
                    );
                }

                self.refresh_and_cache(credential, &key).await
            }
        }
    }

    /// Drop every cached access token for a client, any refresh-token prefix.
    /// Called when a credential is replaced or revoked so stale tokens cannot
    /// outlive the credential that produced them. Returns the entry count.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache backend fails the pattern invalidation
    pub async fn invalidate_client_tokens(&self, client_id: &str) -> AppResult<u64> {
        let removed = self
            .cache
            .invalidate_pattern(&CacheKey::client_token_pattern(client_id))
            .await?;
        if removed > 0 {
            info!(client_id = %client_id, removed, "Invalidated cached access tokens");
        }
        Ok(removed)
    }

    /// Return the cached token if it has more than the buffer of life left
    async fn cached_grant(&self, key: &CacheKey) -> AppResult<Option<AccessTokenGrant>> {
        let Some(cached) = self.cache.get::<CachedAccessToken>(key).await? else {
            return Ok(None);
        };

        let now_ms = Utc::now().timestamp_millis();
        if !cached.is_fresh(now_ms) {
            return Ok(None);
        }

        Ok(Some(AccessTokenGrant {
            expires_in: cached.remaining_secs(now_ms),
            access_token: cached.token,
            rotated_refresh_token: None,
        }))
    }

    /// Perform the upstream exchange, handle rotation, overwrite the cache
    async fn refresh_and_cache(
        &self,
        credential: &SellerCredential,
        key: &CacheKey,
    ) -> AppResult<AccessTokenGrant> {
        let response = self.exchange(credential).await?;

        let now_ms = Utc::now().timestamp_millis();
        let expires_in_ms = i64::try_from(response.expires_in.saturating_mul(1000))
            .map_err(|_| AppError::internal("token expires_in out of range"))?;
        let expires_at_ms = now_ms + expires_in_ms - EXPIRY_BUFFER_MS;

        let cached = CachedAccessToken {
            token: response.access_token.clone(),
            expires_at_ms,
        };
        let cache_ttl = Duration::from_millis(expires_in_ms.max(0) as u64);

        let rotated = response
            .refresh_token
            .filter(|token| token != &credential.refresh_token);

        if let Some(new_refresh_token) = &rotated {
            info!(
                account_id = %credential.id,
                client_id = %credential.client_id,
                "Upstream rotated the refresh token"
            );

            // The rotation must reach durable storage before the grant is
            // returned; losing it disconnects the seller on next restart.
            // Persistence failure is logged CRITICAL but the in-flight grant
            // is still used (availability over consistency, known risk).
            if let Err(e) = self
                .credentials
                .update_refresh_token(credential.id, new_refresh_token)
                .await
            {
                error!(
                    account_id = %credential.id,
                    error = %e,
                    "CRITICAL: failed to persist rotated refresh token; the \
                     durable record and the live token are now out of sync"
                );
            }

            // Stale entries keyed on the old prefix become unreachable
            if let Err(e) = self.cache.invalidate(key).await {
                warn!(error = %e, "Failed to invalidate pre-rotation token cache entry");
            }

            let new_key =
                CacheKey::access_token(&credential.client_id, new_refresh_token);
            if let Err(e) = self.cache.set(&new_key, &cached, cache_ttl).await {
                warn!(error = %e, "Failed to cache token under rotated refresh-token key");
            }
        } else if let Err(e) = self.cache.set(key, &cached, cache_ttl).await {
            // A cache write failure degrades to refresh-per-call, nothing worse
            warn!(error = %e, "Failed to cache refreshed access token");
        }

        Ok(AccessTokenGrant {
            access_token: response.access_token,
            expires_in: response.expires_in,
            rotated_refresh_token: rotated,
        })
    }

    /// Call the upstream token endpoint
    async fn exchange(&self, credential: &SellerCredential) -> AppResult<TokenExchangeResponse> {
        let mut params: Vec<(&str, &str)> = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", &credential.refresh_token),
            ("client_id", &credential.client_id),
        ];
        // Some credential types have no secret; the field is omitted entirely
        if let Some(secret) = &credential.client_secret {
            params.push(("client_secret", secret));
        }

        let response = self
            .http
            .post(&self.token_endpoint)
            .form(&params)
            .send()
            .await
            .map_err(|e| {
                AppError::external_service("token endpoint", format!("request failed: {e}"))
                    .with_source(e)
            })?;

        let status = response.status();

        if status.as_u16() == 400 || status.as_u16() == 401 {
            let body = response.text().await.unwrap_or_default();
            let hint = if credential.client_secret.is_none() {
                "; this credential type may require a client secret that was not supplied"
            } else {
                ""
            };
            return Err(AppError::auth_invalid(format!(
                "Token exchange rejected ({status}): {body}{hint}"
            )));
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::external_service(
                "token endpoint",
                format!("unexpected status {status}: {body}"),
            ));
        }

        response.json::<TokenExchangeResponse>().await.map_err(|e| {
            AppError::external_service("token endpoint", format!("invalid response body: {e}"))
        })
    }

    /// Release the refresh lock; failures here are logged, never propagated
    async fn release_quietly(&self, guard: crate::lock::LockGuard) {
        if let Err(e) = self.lock.release(guard).await {
            warn!(error = %e, "Failed to release refresh lock");
        }
    }
}
