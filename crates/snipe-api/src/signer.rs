//! Request signing for the OVHcloud API v1.
//!
//! Implements the vendor's application-key scheme:
//! 1. Serialize the body to compact JSON (empty string when absent)
//! 2. Join `secret+consumer_key+METHOD+full_url+body+timestamp` with `+`
//! 3. Signature = `"$1$"` + lowercase hex SHA-1 of that string
//!
//! Reference: https://help.ovhcloud.com/csm/en-api-getting-started-ovhcloud-api
//!
//! The vendor recomputes the digest from the bytes it receives, so the body
//! that goes on the wire MUST be the exact string that was signed.

use serde::Serialize;
use sha1::{Digest, Sha1};
use thiserror::Error;
use zeroize::Zeroizing;

use snipe_core::Credentials;

/// Protocol-mandated signature prefix (identifies SHA-1).
pub const SIGNATURE_PREFIX: &str = "$1$";

/// Delimiter between the components of the signed string.
const DELIMITER: &str = "+";

pub const HEADER_APPLICATION: &str = "X-Ovh-Application";
pub const HEADER_CONSUMER: &str = "X-Ovh-Consumer";
pub const HEADER_TIMESTAMP: &str = "X-Ovh-Timestamp";
pub const HEADER_SIGNATURE: &str = "X-Ovh-Signature";

/// Signing errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignerError {
    #[error("Body serialization failed: {0}")]
    Serialization(String),
}

/// Compute the signature for one request.
///
/// Pure: no clock reads, no randomness. `url` must be absolute and include the
/// query string exactly as it will be sent.
pub fn sign(
    method: &str,
    url: &str,
    body: &str,
    timestamp: u64,
    secret: &str,
    consumer_key: &str,
) -> String {
    let timestamp = timestamp.to_string();
    let to_sign = [secret, consumer_key, method, url, body, timestamp.as_str()].join(DELIMITER);

    let digest = Sha1::digest(to_sign.as_bytes());
    format!("{SIGNATURE_PREFIX}{}", hex::encode(digest))
}

/// Canonical textual form of a request body.
///
/// Compact JSON with fields in declaration order, which is byte-identical to
/// what a JavaScript client produces with `JSON.stringify` for the same object.
pub fn canonical_body<B: Serialize + ?Sized>(body: Option<&B>) -> Result<String, SignerError> {
    match body {
        Some(body) => {
            serde_json::to_string(body).map_err(|e| SignerError::Serialization(e.to_string()))
        }
        None => Ok(String::new()),
    }
}

/// Authentication headers for one signed call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeaders {
    pub application_key: String,
    pub consumer_key: String,
    pub timestamp: u64,
    pub signature: String,
}

impl SignatureHeaders {
    /// Header name/value pairs, in the order they are sent.
    pub fn pairs(&self) -> [(&'static str, String); 4] {
        [
            (HEADER_APPLICATION, self.application_key.clone()),
            (HEADER_CONSUMER, self.consumer_key.clone()),
            (HEADER_TIMESTAMP, self.timestamp.to_string()),
            (HEADER_SIGNATURE, self.signature.clone()),
        ]
    }
}

/// A body and the headers that authenticate it.
#[derive(Debug, Clone)]
pub struct SignedRequest {
    /// Serialized body; send exactly this string.
    pub body: String,
    pub headers: SignatureHeaders,
}

/// Signer bound to one set of credentials.
///
/// Keeps its own copy of the secret so the caller's `Credentials` can be
/// dropped; the copy is wiped when the signer is dropped.
pub struct RequestSigner {
    application_key: String,
    application_secret: Zeroizing<String>,
    consumer_key: Zeroizing<String>,
}

impl RequestSigner {
    pub fn new(credentials: &Credentials) -> Self {
        Self {
            application_key: credentials.application_key.clone(),
            application_secret: Zeroizing::new(credentials.application_secret.clone()),
            consumer_key: Zeroizing::new(credentials.consumer_key.clone()),
        }
    }

    /// Serialize `body` and sign `method url body timestamp`.
    pub fn sign_request<B: Serialize + ?Sized>(
        &self,
        method: &str,
        url: &str,
        body: Option<&B>,
        timestamp: u64,
    ) -> Result<SignedRequest, SignerError> {
        let body = canonical_body(body)?;

        // NOTE: never log the signature input, it contains the secret.
        let signature = sign(
            method,
            url,
            &body,
            timestamp,
            &self.application_secret,
            &self.consumer_key,
        );

        Ok(SignedRequest {
            body,
            headers: SignatureHeaders {
                application_key: self.application_key.clone(),
                consumer_key: self.consumer_key.to_string(),
                timestamp,
                signature,
            },
        })
    }
}

impl std::fmt::Debug for RequestSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestSigner")
            .field("application_key", &self.application_key)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    const SECRET: &str = "app-secret";
    const CONSUMER: &str = "consumer-key";
    const TS: u64 = 1_700_000_000;

    /// Known answer computed independently:
    /// sha1("app-secret+consumer-key+GET+https://eu.api.ovh.com/1.0/auth/time++1700000000")
    #[test]
    fn test_sign_known_answer_without_body() {
        let sig = sign(
            "GET",
            "https://eu.api.ovh.com/1.0/auth/time",
            "",
            TS,
            SECRET,
            CONSUMER,
        );
        assert_eq!(sig, "$1$36c6f249e9be437649bb1f0b4b88d10e9873d0ef");
    }

    /// Same scheme with a compact JSON order body.
    #[test]
    fn test_sign_known_answer_with_body() {
        let body = r#"{"planCode":"25skmystery01","duration":"P1M","pricingMode":"default","quantity":1,"configuration":[{"label":"os","value":"none_64.en"},{"label":"datacenter","value":"rbx"}]}"#;
        let sig = sign(
            "POST",
            "https://eu.api.ovh.com/1.0/order/dedicated/server/FR",
            body,
            TS,
            SECRET,
            CONSUMER,
        );
        assert_eq!(sig, "$1$41f683eb363df5455ce9d20ab1adda446d39a3b3");
    }

    #[test]
    fn test_sign_is_deterministic() {
        let a = sign("GET", "https://x/1.0/me", "", TS, SECRET, CONSUMER);
        let b = sign("GET", "https://x/1.0/me", "", TS, SECRET, CONSUMER);
        assert_eq!(a, b);
        assert!(a.starts_with(SIGNATURE_PREFIX));
        assert_eq!(a.len(), SIGNATURE_PREFIX.len() + 40);
    }

    #[test]
    fn test_sign_depends_on_every_input() {
        let base = sign("POST", "https://x/1.0/o", "{}", TS, SECRET, CONSUMER);

        assert_ne!(base, sign("POST", "https://x/1.0/o", r#"{"a":1}"#, TS, SECRET, CONSUMER));
        assert_ne!(base, sign("GET", "https://x/1.0/o", "{}", TS, SECRET, CONSUMER));
        assert_ne!(base, sign("POST", "https://x/1.0/p", "{}", TS, SECRET, CONSUMER));
        assert_ne!(base, sign("POST", "https://x/1.0/o", "{}", TS + 1, SECRET, CONSUMER));
        assert_ne!(base, sign("POST", "https://x/1.0/o", "{}", TS, "other", CONSUMER));
        assert_ne!(base, sign("POST", "https://x/1.0/o", "{}", TS, SECRET, "other"));
    }

    #[test]
    fn test_canonical_body_is_compact_and_ordered() {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Body {
            plan_code: &'static str,
            quantity: u32,
        }

        let body = canonical_body(Some(&Body {
            plan_code: "p",
            quantity: 1,
        }))
        .unwrap();
        assert_eq!(body, r#"{"planCode":"p","quantity":1}"#);

        assert_eq!(canonical_body::<Body>(None).unwrap(), "");
    }

    #[test]
    fn test_canonical_body_rejects_unserializable() {
        // JSON object keys must be strings.
        let mut map = BTreeMap::new();
        map.insert(vec![1u8, 2], 3u8);

        let result = canonical_body(Some(&map));
        assert!(matches!(result, Err(SignerError::Serialization(_))));
    }

    #[test]
    fn test_request_signer_headers() {
        let creds = Credentials::new("app-key", SECRET, CONSUMER, "ovh-eu");
        let signer = RequestSigner::new(&creds);

        let signed = signer
            .sign_request::<()>("GET", "https://eu.api.ovh.com/1.0/auth/time", None, TS)
            .unwrap();

        assert_eq!(signed.body, "");
        assert_eq!(signed.headers.application_key, "app-key");
        assert_eq!(signed.headers.consumer_key, CONSUMER);
        assert_eq!(
            signed.headers.signature,
            "$1$36c6f249e9be437649bb1f0b4b88d10e9873d0ef"
        );

        let pairs = signed.headers.pairs();
        assert_eq!(pairs[2], (HEADER_TIMESTAMP, "1700000000".to_string()));
    }

    #[test]
    fn test_request_signer_debug_hides_secret() {
        let creds = Credentials::new("app-key", SECRET, CONSUMER, "ovh-eu");
        let debug = format!("{:?}", RequestSigner::new(&creds));
        assert!(!debug.contains(SECRET));
        assert!(!debug.contains(CONSUMER));
    }
}
