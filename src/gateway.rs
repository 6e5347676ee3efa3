// ABOUTME: Issues one authenticated, signed call to the upstream partner API
// ABOUTME: Transport-level retry on rate limits and server errors within a logical call
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 SellerSync Contributors

use crate::auth::{identity::IdentityBroker, token_broker::TokenBroker, SellerCredential};
use crate::config::UpstreamConfig;
use crate::constants::gateway::{
    DEFAULT_RETRY_COUNT, RATE_LIMIT_BASE_DELAY_MS, RATE_LIMIT_MAX_DELAY_MS, REQUEST_TIMEOUT_SECS,
    SERVER_ERROR_BASE_DELAY_MS, SIGNING_SERVICE,
};
use crate::errors::{AppError, AppResult};
use crate::signing::{sign_request, SignableRequest};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// One upstream API request
#[derive(Debug, Clone)]
pub struct ApiRequest {
    /// HTTP method, uppercase
    pub method: String,
    /// Path relative to the API endpoint, e.g. `/orders/v0/orders`
    pub path: String,
    /// Query parameters
    pub query: Vec<(String, String)>,
    /// JSON body for write requests
    pub body: Option<serde_json::Value>,
    /// Transport-level retry budget for this call
    pub retry_count: u32,
}

impl ApiRequest {
    /// A GET request with the default retry budget
    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: "GET".to_owned(),
            path: path.into(),
            query: Vec::new(),
            body: None,
            retry_count: DEFAULT_RETRY_COUNT,
        }
    }

    /// Add a query parameter
    #[must_use]
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }
}

/// Response from a signed upstream call
#[derive(Debug, Clone)]
pub struct ApiResponse {
    /// HTTP status code
    pub status: u16,
    /// Parsed JSON body; `null` when the body was empty or not JSON
    pub body: serde_json::Value,
}

/// Client composing token resolution, role assumption, and request signing
/// into one authenticated upstream call
///
/// Retries happen at two layers and only two: 429 and 5xx/transport failures
/// are retried here within the logical call; every other failure propagates
/// for job-level classification. 4xx other than 429 never retries here.
pub struct ApiGatewayClient {
    http: reqwest::Client,
    tokens: Arc<TokenBroker>,
    identity: Arc<IdentityBroker>,
    endpoint: Url,
    region: String,
}

impl ApiGatewayClient {
    /// Create a gateway client
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint URL is invalid or the HTTP client
    /// cannot be constructed
    pub fn new(
        tokens: Arc<TokenBroker>,
        identity: Arc<IdentityBroker>,
        upstream: &UpstreamConfig,
    ) -> AppResult<Self> {
        let endpoint = Url::parse(&upstream.api_endpoint)
            .map_err(|e| AppError::config(format!("invalid API endpoint: {e}")))?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| AppError::internal(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            tokens,
            identity,
            endpoint,
            region: upstream.region.clone(),
        })
    }

    /// Issue one authenticated call, retrying rate limits and server errors
    /// within this call's budget
    ///
    /// # Errors
    ///
    /// Returns a typed error carrying the last HTTP status once the retry
    /// budget is exhausted, or immediately for non-retryable failures
    pub async fn call(
        &self,
        credential: &SellerCredential,
        request: &ApiRequest,
    ) -> AppResult<ApiResponse> {
        let role_arn = credential.role_arn.as_deref().ok_or_else(|| {
            AppError::invalid_input("credential has no role ARN for request signing")
        })?;

        let mut last_status: u16 = 0;

        for attempt in 0..=request.retry_count {
            // Token and signing credentials may both trigger refresh
            let grant = self.tokens.get_access_token(credential, false).await?;
            let signing = self.identity.assume_role(role_arn, false).await?;

            let outcome = self
                .execute_signed(request, &grant.access_token, &signing)
                .await;

            match outcome {
                Ok(response) if response.status == 429 => {
                    last_status = 429;
                    if attempt == request.retry_count {
                        break;
                    }
                    let delay = retry_after_hint(&response)
                        .unwrap_or_else(|| rate_limit_delay(attempt));
                    warn!(
                        path = %request.path,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Upstream rate limited; backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Ok(response) if response.status >= 500 => {
                    last_status = response.status;
                    if attempt == request.retry_count {
                        break;
                    }
                    let delay = server_error_delay(attempt);
                    warn!(
                        path = %request.path,
                        status = response.status,
                        attempt,
                        "Upstream server error; backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Ok(response) if response.status >= 400 => {
                    // Non-retryable at this layer; classification happens
                    // one level up
                    return Err(AppError::external_service(
                        "partner api",
                        format!(
                            "request to {} failed with status {}: {}",
                            request.path, response.status, response.body
                        ),
                    )
                    .with_details(serde_json::json!({ "status": response.status })));
                }
                Ok(response) => {
                    debug!(path = %request.path, status = response.status, "Upstream call succeeded");
                    return Ok(response);
                }
                Err(e) => {
                    // Transport failure, same curve as server errors
                    last_status = 0;
                    if attempt == request.retry_count {
                        return Err(e);
                    }
                    let delay = server_error_delay(attempt);
                    warn!(
                        path = %request.path,
                        error = %e,
                        attempt,
                        "Transport failure; backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }

        if last_status == 429 {
            Err(AppError::external_rate_limited(
                format!(
                    "request to {} still rate limited after {} attempts",
                    request.path,
                    request.retry_count + 1
                ),
                429,
            ))
        } else {
            Err(AppError::external_service(
                "partner api",
                format!(
                    "request to {} failed after {} attempts (last status {})",
                    request.path,
                    request.retry_count + 1,
                    last_status
                ),
            )
            .with_details(serde_json::json!({ "status": last_status })))
        }
    }

    /// Sign and execute one request attempt
    async fn execute_signed(
        &self,
        request: &ApiRequest,
        access_token: &str,
        signing: &crate::auth::SigningCredential,
    ) -> AppResult<ApiResponse> {
        let host = self
            .endpoint
            .host_str()
            .ok_or_else(|| AppError::config("API endpoint has no host"))?
            .to_owned();

        let body_bytes = request
            .body
            .as_ref()
            .map(|b| serde_json::to_vec(b))
            .transpose()
            .map_err(|e| AppError::internal(format!("Failed to serialize request body: {e}")))?
            .unwrap_or_default();

        let extra_headers = vec![(
            "x-amz-access-token".to_owned(),
            access_token.to_owned(),
        )];

        let signable = SignableRequest {
            method: &request.method,
            host: &host,
            path: &request.path,
            query: &request.query,
            headers: &extra_headers,
            body: &body_bytes,
        };

        let signed_headers = sign_request(
            &signable,
            signing,
            &self.region,
            SIGNING_SERVICE,
            Utc::now(),
        )?;

        let mut url = self.endpoint.clone();
        url.set_path(&request.path);
        if !request.query.is_empty() {
            url.query_pairs_mut().extend_pairs(request.query.iter());
        }

        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|e| AppError::invalid_input(format!("invalid HTTP method: {e}")))?;

        let mut builder = self.http.request(method, url);
        for (name, value) in &signed_headers {
            builder = builder.header(name, value);
        }
        if !body_bytes.is_empty() {
            builder = builder
                .header("content-type", "application/json")
                .body(body_bytes);
        }

        let response = builder.send().await.map_err(|e| {
            AppError::external_service("partner api", format!("request failed: {e}"))
                .with_source(e)
        })?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());

        let body = response
            .json::<serde_json::Value>()
            .await
            .unwrap_or(serde_json::Value::Null);

        let mut api_response = ApiResponse { status, body };
        if let Some(secs) = retry_after {
            // Stash the hint so the retry loop can honor it
            if let serde_json::Value::Null = api_response.body {
                api_response.body = serde_json::json!({});
            }
            if let Some(map) = api_response.body.as_object_mut() {
                map.insert("retry_after_secs".to_owned(), secs.into());
            }
        }

        Ok(api_response)
    }
}

/// Read the upstream's retry-after hint from a 429 response, when present
fn retry_after_hint(response: &ApiResponse) -> Option<Duration> {
    response
        .body
        .get("retry_after_secs")
        .and_then(serde_json::Value::as_u64)
        .map(Duration::from_secs)
}

/// Backoff before retrying a rate-limited attempt (0-based)
fn rate_limit_delay(attempt: u32) -> Duration {
    let exponent = attempt.min(31);
    Duration::from_millis(
        RATE_LIMIT_BASE_DELAY_MS
            .saturating_mul(1u64 << exponent)
            .min(RATE_LIMIT_MAX_DELAY_MS),
    )
}

/// Backoff before retrying a server error or transport failure (0-based)
fn server_error_delay(attempt: u32) -> Duration {
    let exponent = attempt.min(31);
    Duration::from_millis(SERVER_ERROR_BASE_DELAY_MS.saturating_mul(1u64 << exponent))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_delay_curve() {
        assert_eq!(rate_limit_delay(0), Duration::from_millis(5_000));
        assert_eq!(rate_limit_delay(1), Duration::from_millis(10_000));
        assert_eq!(rate_limit_delay(2), Duration::from_millis(20_000));
        // Capped at 30s
        assert_eq!(rate_limit_delay(3), Duration::from_millis(30_000));
        assert_eq!(rate_limit_delay(10), Duration::from_millis(30_000));
    }

    #[test]
    fn test_server_error_delay_curve() {
        assert_eq!(server_error_delay(0), Duration::from_millis(1_000));
        assert_eq!(server_error_delay(1), Duration::from_millis(2_000));
        assert_eq!(server_error_delay(2), Duration::from_millis(4_000));
    }

    #[test]
    fn test_retry_after_hint_parsing() {
        let response = ApiResponse {
            status: 429,
            body: serde_json::json!({ "retry_after_secs": 7 }),
        };
        assert_eq!(retry_after_hint(&response), Some(Duration::from_secs(7)));

        let response = ApiResponse {
            status: 429,
            body: serde_json::Value::Null,
        };
        assert_eq!(retry_after_hint(&response), None);
    }
}
