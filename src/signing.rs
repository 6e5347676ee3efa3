// ABOUTME: SigV4-style canonical request signing for upstream resource calls
// ABOUTME: Pure function of request, credentials, region, and supplied timestamp
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 SellerSync Contributors

use crate::auth::SigningCredential;
use crate::errors::AppResult;
use chrono::{DateTime, Utc};
use ring::hmac;
use sha2::{Digest, Sha256};

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// Request fields that participate in the signature
///
/// The canonical form is byte-exact with what the upstream recomputes:
/// whitespace, header ordering, and URI-encoding rules are load-bearing.
#[derive(Debug)]
pub struct SignableRequest<'a> {
    /// HTTP method, uppercase
    pub method: &'a str,
    /// Host header value
    pub host: &'a str,
    /// Absolute path, not URI-encoded
    pub path: &'a str,
    /// Query parameters, not URI-encoded
    pub query: &'a [(String, String)],
    /// Additional headers to include in the signature (e.g. the access token)
    pub headers: &'a [(String, String)],
    /// Request body bytes; empty slice for body-less requests
    pub body: &'a [u8],
}

/// Sign a request and return the complete header set to send: the input
/// headers plus `host`, `x-amz-date`, `x-amz-security-token` (when a session
/// token is present), and `Authorization`.
///
/// The timestamp is supplied by the caller, so repeated calls with identical
/// inputs produce identical signatures.
///
/// # Errors
///
/// Currently infallible; the `Result` return keeps the seam stable for
/// callers that treat signing as an operation that can fail
pub fn sign_request(
    request: &SignableRequest<'_>,
    credential: &SigningCredential,
    region: &str,
    service: &str,
    timestamp: DateTime<Utc>,
) -> AppResult<Vec<(String, String)>> {
    let amz_date = timestamp.format("%Y%m%dT%H%M%SZ").to_string();
    let date_stamp = timestamp.format("%Y%m%d").to_string();

    // Headers participating in the signature, lowercased and trimmed
    let mut signed_header_pairs: Vec<(String, String)> = request
        .headers
        .iter()
        .map(|(name, value)| (name.to_lowercase(), value.trim().to_owned()))
        .collect();
    signed_header_pairs.push(("host".to_owned(), request.host.trim().to_owned()));
    signed_header_pairs.push(("x-amz-date".to_owned(), amz_date.clone()));
    if !credential.session_token.is_empty() {
        signed_header_pairs.push((
            "x-amz-security-token".to_owned(),
            credential.session_token.clone(),
        ));
    }
    signed_header_pairs.sort();

    let canonical_headers: String = signed_header_pairs
        .iter()
        .map(|(name, value)| format!("{name}:{value}\n"))
        .collect();
    let signed_headers = signed_header_pairs
        .iter()
        .map(|(name, _)| name.as_str())
        .collect::<Vec<_>>()
        .join(";");

    let canonical_request = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        request.method.to_uppercase(),
        canonical_uri(request.path),
        canonical_query_string(request.query),
        canonical_headers,
        signed_headers,
        hex_sha256(request.body),
    );

    let credential_scope = format!("{date_stamp}/{region}/{service}/aws4_request");
    let string_to_sign = format!(
        "{ALGORITHM}\n{amz_date}\n{credential_scope}\n{}",
        hex_sha256(canonical_request.as_bytes()),
    );

    let signing_key = derive_signing_key(
        &credential.secret_access_key,
        &date_stamp,
        region,
        service,
    );
    let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));

    let authorization = format!(
        "{ALGORITHM} Credential={}/{credential_scope}, SignedHeaders={signed_headers}, \
         Signature={signature}",
        credential.access_key_id,
    );

    let mut headers: Vec<(String, String)> = request.headers.to_vec();
    headers.push(("host".to_owned(), request.host.to_owned()));
    headers.push(("x-amz-date".to_owned(), amz_date));
    if !credential.session_token.is_empty() {
        headers.push((
            "x-amz-security-token".to_owned(),
            credential.session_token.clone(),
        ));
    }
    headers.push(("Authorization".to_owned(), authorization));

    Ok(headers)
}

/// URI-encode each path segment, preserving the `/` separators
fn canonical_uri(path: &str) -> String {
    if path.is_empty() {
        return "/".to_owned();
    }
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Encode and sort query parameters by key, then value
fn canonical_query_string(query: &[(String, String)]) -> String {
    let mut encoded: Vec<(String, String)> = query
        .iter()
        .map(|(k, v)| {
            (
                urlencoding::encode(k).into_owned(),
                urlencoding::encode(v).into_owned(),
            )
        })
        .collect();
    encoded.sort();

    encoded
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// Iterated HMAC-SHA256 key derivation: secret -> date -> region -> service
fn derive_signing_key(secret: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(format!("AWS4{secret}").as_bytes(), date_stamp.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let key = hmac::Key::new(hmac::HMAC_SHA256, key);
    hmac::sign(&key, data).as_ref().to_vec()
}

fn hex_sha256(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn test_credential(session_token: &str) -> SigningCredential {
        SigningCredential {
            access_key_id: "AKIDEXAMPLE".to_owned(),
            secret_access_key: "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY".to_owned(),
            session_token: session_token.to_owned(),
            expiration: Utc::now() + chrono::Duration::hours(1),
        }
    }

    fn header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
        headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn test_known_sigv4_vector() {
        // "get-vanilla" case from the public SigV4 test suite
        let timestamp = Utc.with_ymd_and_hms(2015, 8, 30, 12, 36, 0).unwrap();
        let request = SignableRequest {
            method: "GET",
            host: "example.amazonaws.com",
            path: "/",
            query: &[],
            headers: &[],
            body: b"",
        };

        let headers =
            sign_request(&request, &test_credential(""), "us-east-1", "service", timestamp)
                .unwrap();

        let authorization = header(&headers, "Authorization").unwrap();
        assert!(authorization.ends_with(
            "Signature=5fa00fa31553b73ebf1942676e86291e8372ff2a2260956d9b8aae1d763fbf31"
        ));
        assert!(authorization.contains("SignedHeaders=host;x-amz-date"));
        assert_eq!(header(&headers, "x-amz-date"), Some("20150830T123600Z"));
    }

    #[test]
    fn test_signature_is_deterministic() {
        let timestamp = Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap();
        let query = vec![
            ("MarketplaceIds".to_owned(), "ATVPDKIKX0DER".to_owned()),
            ("CreatedAfter".to_owned(), "2024-02-01T00:00:00Z".to_owned()),
        ];
        let extra = vec![(
            "x-amz-access-token".to_owned(),
            "Atza|access".to_owned(),
        )];
        let request = SignableRequest {
            method: "GET",
            host: "sellingpartnerapi-na.amazon.com",
            path: "/orders/v0/orders",
            query: &query,
            headers: &extra,
            body: b"",
        };
        let credential = test_credential("session-token");

        let first =
            sign_request(&request, &credential, "us-east-1", "execute-api", timestamp).unwrap();
        let second =
            sign_request(&request, &credential, "us-east-1", "execute-api", timestamp).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn test_session_token_header_included_when_present() {
        let timestamp = Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap();
        let request = SignableRequest {
            method: "POST",
            host: "sellingpartnerapi-na.amazon.com",
            path: "/feeds/2021-06-30/feeds",
            query: &[],
            headers: &[],
            body: br#"{"feedType":"POST_INVENTORY"}"#,
        };

        let headers = sign_request(
            &request,
            &test_credential("session-token"),
            "us-east-1",
            "execute-api",
            timestamp,
        )
        .unwrap();

        assert_eq!(
            header(&headers, "x-amz-security-token"),
            Some("session-token")
        );
        let authorization = header(&headers, "Authorization").unwrap();
        assert!(authorization.contains("x-amz-security-token"));
    }

    #[test]
    fn test_query_parameters_are_sorted() {
        let timestamp = Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap();
        let forward = vec![
            ("a".to_owned(), "1".to_owned()),
            ("b".to_owned(), "2".to_owned()),
        ];
        let reversed = vec![
            ("b".to_owned(), "2".to_owned()),
            ("a".to_owned(), "1".to_owned()),
        ];
        let credential = test_credential("");

        let sign = |query: &[(String, String)]| {
            let request = SignableRequest {
                method: "GET",
                host: "example.amazonaws.com",
                path: "/",
                query,
                headers: &[],
                body: b"",
            };
            sign_request(&request, &credential, "us-east-1", "service", timestamp).unwrap()
        };

        assert_eq!(sign(&forward), sign(&reversed));
    }
}
