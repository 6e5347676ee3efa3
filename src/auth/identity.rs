// ABOUTME: Assumes a delegated role to obtain temporary signing credentials
// ABOUTME: Caches per role ARN with proactive expiry-aware refresh
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 SellerSync Contributors

use super::SigningCredential;
use crate::cache::{factory::Cache, CacheKey};
use crate::constants::tokens::{
    EXPIRY_BUFFER_MS, ROLE_SESSION_DURATION_SECS, TOKEN_EXCHANGE_TIMEOUT_SECS,
};
use crate::errors::{AppError, AppResult};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

const SESSION_NAME: &str = "sellersync-api";

/// Role assumption request body
#[derive(Debug, Serialize)]
struct AssumeRoleRequest<'a> {
    role_arn: &'a str,
    role_session_name: &'a str,
    duration_seconds: u64,
}

/// Role assumption response body
#[derive(Debug, Deserialize)]
struct AssumeRoleResponse {
    access_key_id: String,
    secret_access_key: String,
    session_token: String,
    expiration: chrono::DateTime<Utc>,
}

/// Broker for temporary signing credentials, cached per role ARN
///
/// Role assumption is idempotent and cheap relative to the token exchange, so
/// this broker caches with the same expiry-minus-buffer rule as the token
/// broker but takes no distributed lock; a duplicate assumption now and then
/// is harmless.
pub struct IdentityBroker {
    http: reqwest::Client,
    cache: Cache,
    identity_endpoint: String,
}

impl IdentityBroker {
    /// Create an identity broker
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed
    pub fn new(cache: Cache, identity_endpoint: impl Into<String>) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(TOKEN_EXCHANGE_TIMEOUT_SECS))
            .build()
            .map_err(|e| AppError::internal(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            cache,
            identity_endpoint: identity_endpoint.into(),
        })
    }

    /// Obtain temporary signing credentials for the role, from cache when the
    /// cached credential has more than the refresh buffer of life left
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for a malformed ARN, `PermissionDenied` or
    /// `InvalidInput` for fatal upstream rejections, and
    /// `ExternalServiceError` for transient upstream failures
    pub async fn assume_role(
        &self,
        role_arn: &str,
        force_refresh: bool,
    ) -> AppResult<SigningCredential> {
        validate_role_arn(role_arn)?;

        let key = CacheKey::signing_credential(role_arn);

        if !force_refresh {
            if let Some(cached) = self.cache.get::<SigningCredential>(&key).await? {
                if !cached.needs_refresh(Utc::now()) {
                    return Ok(cached);
                }
                debug!(role_arn, "Cached signing credential inside refresh window");
            }
        }

        let credential = self.call_assume_role(role_arn).await?;

        let remaining_ms = (credential.expiration - Utc::now()).num_milliseconds();
        let cache_ttl_ms = remaining_ms - EXPIRY_BUFFER_MS;
        // Sub-second leftovers are not worth a cache entry, and the Redis
        // backend rejects a zero-second expiry
        if cache_ttl_ms >= 1000 {
            if let Err(e) = self
                .cache
                .set(&key, &credential, Duration::from_millis(cache_ttl_ms as u64))
                .await
            {
                // Degrades to assume-per-call, same as a cache miss
                warn!(role_arn, error = %e, "Failed to cache signing credential");
            }
        }

        Ok(credential)
    }

    /// Call the upstream role-assumption endpoint
    async fn call_assume_role(&self, role_arn: &str) -> AppResult<SigningCredential> {
        let request = AssumeRoleRequest {
            role_arn,
            role_session_name: SESSION_NAME,
            duration_seconds: ROLE_SESSION_DURATION_SECS,
        };

        let response = self
            .http
            .post(&self.identity_endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                AppError::external_service("identity endpoint", format!("request failed: {e}"))
                    .with_source(e)
            })?;

        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();

            // Access denial and malformed policies are fatal, never retried
            if status.as_u16() == 403 || body.contains("AccessDenied") {
                return Err(AppError::permission_denied(format!(
                    "Role assumption denied for {role_arn}: {body}"
                )));
            }
            if body.contains("MalformedPolicyDocument") {
                return Err(AppError::invalid_input(format!(
                    "Role {role_arn} has a malformed policy: {body}"
                )));
            }

            return Err(AppError::external_service(
                "identity endpoint",
                format!("unexpected status {status}: {body}"),
            ));
        }

        let parsed = response.json::<AssumeRoleResponse>().await.map_err(|e| {
            AppError::external_service("identity endpoint", format!("invalid response body: {e}"))
        })?;

        Ok(SigningCredential {
            access_key_id: parsed.access_key_id,
            secret_access_key: parsed.secret_access_key,
            session_token: parsed.session_token,
            expiration: parsed.expiration,
        })
    }
}

/// Validate the shape of a role ARN before calling upstream
///
/// # Errors
///
/// Returns `InvalidInput` when the ARN is not `arn:<partition>:iam::<12-digit
/// account>:role/<name>`
pub fn validate_role_arn(role_arn: &str) -> AppResult<()> {
    let parts: Vec<&str> = role_arn.split(':').collect();

    let valid = parts.len() == 6
        && parts[0] == "arn"
        && !parts[1].is_empty()
        && parts[2] == "iam"
        && parts[3].is_empty()
        && parts[4].len() == 12
        && parts[4].chars().all(|c| c.is_ascii_digit())
        && parts[5]
            .strip_prefix("role/")
            .is_some_and(|name| !name.is_empty());

    if valid {
        Ok(())
    } else {
        Err(AppError::invalid_input(format!(
            "malformed role ARN: {role_arn}"
        )))
    }
}
