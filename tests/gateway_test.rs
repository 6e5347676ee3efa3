// ABOUTME: Integration tests for the signed gateway against scripted upstreams
// ABOUTME: Covers signed-header emission, 5xx retry, and non-retryable 4xx
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 SellerSync Contributors

mod common;

use chrono::Utc;
use common::MockUpstream;
use sellersync::auth::identity::IdentityBroker;
use sellersync::auth::token_broker::TokenBroker;
use sellersync::auth::SellerCredential;
use sellersync::cache::factory::Cache;
use sellersync::cache::CacheConfig;
use sellersync::config::UpstreamConfig;
use sellersync::errors::ErrorCode;
use sellersync::gateway::{ApiGatewayClient, ApiRequest};
use sellersync::storage::memory::InMemoryCredentialStore;
use sellersync::storage::CredentialStore;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

const ROLE_ARN: &str = "arn:aws:iam::123456789012:role/SellerSyncRole";

fn seller_credential() -> SellerCredential {
    SellerCredential {
        id: Uuid::new_v4(),
        client_id: "client-1".to_owned(),
        client_secret: Some("secret-1".to_owned()),
        refresh_token: "Atzr|seed-refresh-token".to_owned(),
        role_arn: Some(ROLE_ARN.to_owned()),
        region: "us-east-1".to_owned(),
    }
}

async fn auth_upstreams() -> (MockUpstream, MockUpstream) {
    let token = MockUpstream::with_fixed_response(
        200,
        serde_json::json!({
            "access_token": "Atza|gateway-token",
            "token_type": "bearer",
            "expires_in": 3600,
        }),
    )
    .await;

    let identity = MockUpstream::start(
        Duration::ZERO,
        Arc::new(|_, _| {
            (
                200,
                serde_json::json!({
                    "access_key_id": "AKIDEXAMPLE",
                    "secret_access_key": "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
                    "session_token": "FwoGZXIvYXdzEExample",
                    "expiration": (Utc::now() + chrono::Duration::hours(1)).to_rfc3339(),
                })
                .to_string(),
            )
        }),
    )
    .await;

    (token, identity)
}

async fn gateway_against(
    token: &MockUpstream,
    identity: &MockUpstream,
    api: &MockUpstream,
) -> ApiGatewayClient {
    let cache = Cache::new(CacheConfig {
        enable_background_cleanup: false,
        ..CacheConfig::default()
    })
    .await
    .expect("cache init");

    let store = Arc::new(InMemoryCredentialStore::new());
    store.insert(seller_credential()).await;

    let tokens = Arc::new(
        TokenBroker::new(
            cache.clone(),
            Arc::clone(&store) as Arc<dyn CredentialStore>,
            token.url(),
        )
        .expect("broker init"),
    );
    let identity_broker =
        Arc::new(IdentityBroker::new(cache, identity.url()).expect("identity init"));

    let upstream = UpstreamConfig {
        token_endpoint: token.url(),
        identity_endpoint: identity.url(),
        api_endpoint: api.url(),
        region: "us-east-1".to_owned(),
    };

    ApiGatewayClient::new(tokens, identity_broker, &upstream).expect("gateway init")
}

#[tokio::test]
async fn test_call_sends_signed_headers() {
    let (token, identity) = auth_upstreams().await;
    let seen = Arc::new(Mutex::new(String::new()));
    let seen_responder = Arc::clone(&seen);
    let api = MockUpstream::start(
        Duration::ZERO,
        Arc::new(move |_, request: &str| {
            *seen_responder.lock().unwrap() = request.to_owned();
            (200, serde_json::json!({ "orders": [] }).to_string())
        }),
    )
    .await;
    let gateway = gateway_against(&token, &identity, &api).await;

    let request = ApiRequest::get("/orders/v0/orders").with_query("MarketplaceIds", "ATVPDKIKX0DER");
    let response = gateway.call(&seller_credential(), &request).await.unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.body["orders"], serde_json::json!([]));

    let raw = seen.lock().unwrap().to_lowercase();
    assert!(raw.starts_with("get /orders/v0/orders?marketplaceids=atvpdkikx0der"));
    assert!(raw.contains("authorization: aws4-hmac-sha256 credential=akidexample/"));
    assert!(raw.contains("x-amz-access-token: atza|gateway-token"));
    assert!(raw.contains("x-amz-security-token:"));
    assert!(raw.contains("x-amz-date:"));
}

#[tokio::test]
async fn test_server_error_is_retried_within_the_call() {
    let (token, identity) = auth_upstreams().await;
    let api = MockUpstream::start(
        Duration::ZERO,
        Arc::new(|hit, _| {
            if hit == 0 {
                (503, serde_json::json!({ "error": "unavailable" }).to_string())
            } else {
                (200, serde_json::json!({ "ok": true }).to_string())
            }
        }),
    )
    .await;
    let gateway = gateway_against(&token, &identity, &api).await;

    let response = gateway
        .call(&seller_credential(), &ApiRequest::get("/orders/v0/orders"))
        .await
        .unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(api.hits(), 2);
    // Token and signing credentials are cached across attempts
    assert_eq!(token.hits(), 1);
    assert_eq!(identity.hits(), 1);
}

#[tokio::test]
async fn test_client_error_never_retries() {
    let (token, identity) = auth_upstreams().await;
    let api = MockUpstream::with_fixed_response(
        403,
        serde_json::json!({ "error": "Access to requested resource is denied" }),
    )
    .await;
    let gateway = gateway_against(&token, &identity, &api).await;

    let error = gateway
        .call(&seller_credential(), &ApiRequest::get("/orders/v0/orders"))
        .await
        .expect_err("denied");

    assert_eq!(error.code, ErrorCode::ExternalServiceError);
    assert_eq!(api.hits(), 1);
}

#[tokio::test]
async fn test_near_expiry_signing_credential_is_not_cached() {
    // Under a second of cacheable life left after the refresh buffer; the
    // credential is still returned but never written to the cache
    let identity = MockUpstream::start(
        Duration::ZERO,
        Arc::new(|_, _| {
            (
                200,
                serde_json::json!({
                    "access_key_id": "AKIDEXAMPLE",
                    "secret_access_key": "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
                    "session_token": "FwoGZXIvYXdzEExample",
                    "expiration": (Utc::now() + chrono::Duration::milliseconds(60_800))
                        .to_rfc3339(),
                })
                .to_string(),
            )
        }),
    )
    .await;
    let cache = Cache::new(CacheConfig {
        enable_background_cleanup: false,
        ..CacheConfig::default()
    })
    .await
    .expect("cache init");
    let broker = IdentityBroker::new(cache, identity.url()).expect("identity init");

    broker.assume_role(ROLE_ARN, false).await.unwrap();
    broker.assume_role(ROLE_ARN, false).await.unwrap();

    assert_eq!(identity.hits(), 2, "near-expiry credential must be re-assumed");
}

#[tokio::test]
async fn test_credential_without_role_is_rejected() {
    let (token, identity) = auth_upstreams().await;
    let api = MockUpstream::with_fixed_response(200, serde_json::json!({})).await;
    let gateway = gateway_against(&token, &identity, &api).await;

    let mut credential = seller_credential();
    credential.role_arn = None;

    let error = gateway
        .call(&credential, &ApiRequest::get("/orders/v0/orders"))
        .await
        .expect_err("no role");

    assert_eq!(error.code, ErrorCode::InvalidInput);
    assert_eq!(api.hits(), 0);
}
