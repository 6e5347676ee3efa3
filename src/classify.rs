// ABOUTME: Maps error text into a fixed taxonomy carrying per-kind retry policies
// ABOUTME: Single authority for retry-vs-dead-letter decisions across the system
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 SellerSync Contributors

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Error taxonomy driving all recovery decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Upstream throttling; retried patiently
    RateLimit,
    /// Credential problems; few retries, then an operator must act
    Authentication,
    /// Connectivity failures; retried with moderate backoff
    Network,
    /// Upstream 5xx; retried with longer backoff
    ServerError,
    /// Missing resources; never retried
    NotFound,
    /// Bad requests; never retried
    Validation,
    /// Unrecoverable conditions; never retried, operator must act
    Permanent,
    /// Anything unrecognized; retried conservatively
    Transient,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::RateLimit => "rate_limit",
            Self::Authentication => "authentication",
            Self::Network => "network",
            Self::ServerError => "server_error",
            Self::NotFound => "not_found",
            Self::Validation => "validation",
            Self::Permanent => "permanent",
            Self::Transient => "transient",
        };
        write!(f, "{name}")
    }
}

/// Retry policy attached to a classified error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorClassification {
    /// Taxonomy kind
    pub kind: ErrorKind,
    /// Whether job-level retry is permitted at all
    pub should_retry: bool,
    /// Maximum retry attempts for this kind
    pub max_retries: u32,
    /// Base delay for the exponential backoff curve
    pub base_delay_ms: u64,
    /// Cap on the backoff curve
    pub max_delay_ms: u64,
    /// Whether exhausting the budget needs an operator
    pub requires_manual_intervention: bool,
}

/// Static policy for a taxonomy kind
#[must_use]
pub const fn policy_for(kind: ErrorKind) -> ErrorClassification {
    match kind {
        ErrorKind::RateLimit => ErrorClassification {
            kind,
            should_retry: true,
            max_retries: 10,
            base_delay_ms: 5_000,
            max_delay_ms: 300_000,
            requires_manual_intervention: false,
        },
        ErrorKind::Authentication => ErrorClassification {
            kind,
            should_retry: true,
            max_retries: 2,
            base_delay_ms: 60_000,
            max_delay_ms: 300_000,
            requires_manual_intervention: true,
        },
        ErrorKind::Network => ErrorClassification {
            kind,
            should_retry: true,
            max_retries: 5,
            base_delay_ms: 2_000,
            max_delay_ms: 60_000,
            requires_manual_intervention: false,
        },
        ErrorKind::ServerError => ErrorClassification {
            kind,
            should_retry: true,
            max_retries: 5,
            base_delay_ms: 10_000,
            max_delay_ms: 120_000,
            requires_manual_intervention: false,
        },
        ErrorKind::NotFound | ErrorKind::Validation => ErrorClassification {
            kind,
            should_retry: false,
            max_retries: 0,
            base_delay_ms: 0,
            max_delay_ms: 0,
            requires_manual_intervention: false,
        },
        ErrorKind::Permanent => ErrorClassification {
            kind,
            should_retry: false,
            max_retries: 0,
            base_delay_ms: 0,
            max_delay_ms: 0,
            requires_manual_intervention: true,
        },
        ErrorKind::Transient => ErrorClassification {
            kind,
            should_retry: true,
            max_retries: 3,
            base_delay_ms: 5_000,
            max_delay_ms: 60_000,
            requires_manual_intervention: false,
        },
    }
}

const RATE_LIMIT_PATTERNS: &[&str] = &[
    "rate limit",
    "too many requests",
    "429",
    "quota exceeded",
    "throttl",
];

const AUTHENTICATION_PATTERNS: &[&str] = &[
    "unauthorized",
    "401",
    "403",
    "forbidden",
    "invalid_grant",
    "invalid client",
    "access token",
    "refresh token",
    "authentication",
    "access denied",
];

const NETWORK_PATTERNS: &[&str] = &[
    "timeout",
    "timed out",
    "econnrefused",
    "econnreset",
    "enotfound",
    "socket hang up",
    "network",
    "dns",
    "connection refused",
    "connection reset",
];

const SERVER_ERROR_PATTERNS: &[&str] = &[
    "internal server error",
    "500",
    "502",
    "503",
    "504",
    "bad gateway",
    "service unavailable",
    "gateway timeout",
];

const NOT_FOUND_PATTERNS: &[&str] = &["not found", "404", "no such", "does not exist"];

const VALIDATION_PATTERNS: &[&str] = &[
    "validation",
    "invalid request",
    "bad request",
    "400",
    "missing required",
    "malformed",
    "invalid input",
];

const PERMANENT_PATTERNS: &[&str] = &[
    "unrecoverable",
    "permanent failure",
    "account closed",
    "not supported",
];

/// Classify an error message into a taxonomy entry with its retry policy
///
/// Pure, deterministic text matching over the lowercased message, checked in
/// a fixed priority order. The order is load-bearing: an error mentioning
/// both a timeout and a 500 resolves to `Network`, the higher-priority kind.
#[must_use]
pub fn classify(error_text: &str) -> ErrorClassification {
    let text = error_text.to_lowercase();

    let matches = |patterns: &[&str]| patterns.iter().any(|p| text.contains(p));

    // Priority: rate limit > authentication > network > server error >
    // not found > validation > permanent > default transient
    let kind = if matches(RATE_LIMIT_PATTERNS) {
        ErrorKind::RateLimit
    } else if matches(AUTHENTICATION_PATTERNS) {
        ErrorKind::Authentication
    } else if matches(NETWORK_PATTERNS) {
        ErrorKind::Network
    } else if matches(SERVER_ERROR_PATTERNS) {
        ErrorKind::ServerError
    } else if matches(NOT_FOUND_PATTERNS) {
        ErrorKind::NotFound
    } else if matches(VALIDATION_PATTERNS) {
        ErrorKind::Validation
    } else if matches(PERMANENT_PATTERNS) {
        ErrorKind::Permanent
    } else {
        ErrorKind::Transient
    };

    policy_for(kind)
}

/// Backoff delay before retry attempt `attempt` (1-based): exponential from
/// the kind's base, capped, with up to 30% additive jitter
#[must_use]
pub fn backoff_delay(classification: &ErrorClassification, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    let raw = classification
        .base_delay_ms
        .saturating_mul(1u64 << exponent)
        .min(classification.max_delay_ms);

    let jitter = if raw > 0 {
        rand::thread_rng().gen_range(0..=raw * 3 / 10)
    } else {
        0
    };

    Duration::from_millis(raw + jitter)
}
