// ABOUTME: Credential and token data types shared by the token and identity brokers
// ABOUTME: Centralizes seller credentials, cached tokens, and signing credential shapes
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 SellerSync Contributors

/// Delegated-role signing credential broker
pub mod identity;
/// Refresh-token-for-access-token exchange broker
pub mod token_broker;

use crate::constants::tokens::EXPIRY_BUFFER_MS;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Long-lived seller credential, persisted by the collaborating store
///
/// The refresh token is the only field this crate ever mutates, and only when
/// the upstream rotates it. That mutation must be durably persisted before the
/// rotated grant is handed out; losing it disconnects the seller permanently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SellerCredential {
    /// Stable identifier in the credential store
    pub id: Uuid,
    /// OAuth client identifier
    pub client_id: String,
    /// OAuth client secret; some credential types do not require one
    pub client_secret: Option<String>,
    /// Long-lived refresh token
    pub refresh_token: String,
    /// Delegated role for request signing, when the integration uses one
    pub role_arn: Option<String>,
    /// Upstream region for this seller
    pub region: String,
}

/// Result of a successful access-token resolution
#[derive(Debug, Clone)]
pub struct AccessTokenGrant {
    /// Short-lived bearer token
    pub access_token: String,
    /// Seconds of usable life remaining
    pub expires_in: u64,
    /// Present when the upstream rotated the refresh token during this exchange
    pub rotated_refresh_token: Option<String>,
}

/// Access token as stored in the shared cache
///
/// Always overwritten whole on refresh, never merged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedAccessToken {
    /// The bearer token value
    pub token: String,
    /// Expiry as epoch milliseconds, already discounted by the refresh buffer
    pub expires_at_ms: i64,
}

impl CachedAccessToken {
    /// A token is fresh only while more than the expiry buffer remains.
    /// Anything closer to expiry triggers a refresh instead of being returned.
    #[must_use]
    pub const fn is_fresh(&self, now_ms: i64) -> bool {
        self.expires_at_ms - now_ms > EXPIRY_BUFFER_MS
    }

    /// Seconds of usable life remaining at `now_ms`
    #[must_use]
    pub const fn remaining_secs(&self, now_ms: i64) -> u64 {
        let remaining_ms = self.expires_at_ms - now_ms;
        if remaining_ms <= 0 {
            0
        } else {
            (remaining_ms / 1000) as u64
        }
    }
}

/// Temporary signing credential obtained by assuming a delegated role
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigningCredential {
    /// Temporary access key identifier
    pub access_key_id: String,
    /// Temporary secret key
    pub secret_access_key: String,
    /// Session token bound to the assumed role
    pub session_token: String,
    /// When the credential expires upstream
    pub expiration: DateTime<Utc>,
}

impl SigningCredential {
    /// Whether this credential is within the proactive-refresh window
    #[must_use]
    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        (self.expiration - now).num_milliseconds() <= EXPIRY_BUFFER_MS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cached_token_freshness_window() {
        let now_ms = Utc::now().timestamp_millis();
        let fresh = CachedAccessToken {
            token: "tok".into(),
            expires_at_ms: now_ms + EXPIRY_BUFFER_MS + 5_000,
        };
        let stale = CachedAccessToken {
            token: "tok".into(),
            expires_at_ms: now_ms + EXPIRY_BUFFER_MS - 1,
        };

        assert!(fresh.is_fresh(now_ms));
        assert!(!stale.is_fresh(now_ms));
    }

    #[test]
    fn test_remaining_secs_never_negative() {
        let now_ms = Utc::now().timestamp_millis();
        let expired = CachedAccessToken {
            token: "tok".into(),
            expires_at_ms: now_ms - 10_000,
        };
        assert_eq!(expired.remaining_secs(now_ms), 0);
    }

    #[test]
    fn test_signing_credential_refresh_window() {
        let now = Utc::now();
        let healthy = SigningCredential {
            access_key_id: "AKIA".into(),
            secret_access_key: "secret".into(),
            session_token: "session".into(),
            expiration: now + chrono::Duration::minutes(30),
        };
        let closing = SigningCredential {
            expiration: now + chrono::Duration::seconds(30),
            ..healthy.clone()
        };

        assert!(!healthy.needs_refresh(now));
        assert!(closing.needs_refresh(now));
    }
}
