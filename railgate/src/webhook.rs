//! Webhook signature verification.
//!
//! Two schemes are in use: HMAC-SHA256 over the raw request body (gateway,
//! checkout) and HMAC-SHA512 over the JSON body re-serialized with keys
//! sorted recursively (processor IPN). Both compare in constant time and
//! reject a missing secret or signature outright.

use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::{Sha256, Sha512};
use std::fmt::{Debug, Formatter};

use crate::error::{RailError, Result};

type HmacSha256 = Hmac<Sha256>;
type HmacSha512 = Hmac<Sha512>;

/// A shared webhook secret. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct WebhookSecret(String);

impl WebhookSecret {
    /// Wraps a secret, treating blank strings as absent.
    #[must_use]
    pub fn new(secret: impl Into<String>) -> Option<Self> {
        let secret = secret.into();
        if secret.trim().is_empty() {
            None
        } else {
            Some(Self(secret))
        }
    }

    fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl Debug for WebhookSecret {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("WebhookSecret(***)")
    }
}

fn require<'a>(
    secret: Option<&'a WebhookSecret>,
    signature: Option<&'a str>,
) -> Result<(&'a WebhookSecret, Vec<u8>)> {
    let secret =
        secret.ok_or_else(|| RailError::SignatureInvalid("webhook secret not configured".into()))?;
    let signature = signature
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| RailError::SignatureInvalid("signature header missing".into()))?;
    let hex_part = signature
        .split_once('=')
        .map_or(signature, |(_, digest)| digest);
    let bytes = hex::decode(hex_part)
        .map_err(|_| RailError::SignatureInvalid("signature is not hex".into()))?;
    Ok((secret, bytes))
}

/// Verifies a hex HMAC-SHA256 of the raw body. An `algo=` prefix such as
/// `sha256=` is accepted.
///
/// # Errors
///
/// [`RailError::SignatureInvalid`] when the secret or signature is missing,
/// malformed, or wrong.
pub fn verify_sha256(
    secret: Option<&WebhookSecret>,
    body: &[u8],
    signature: Option<&str>,
) -> Result<()> {
    let (secret, expected) = require(secret, signature)?;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| RailError::SignatureInvalid(e.to_string()))?;
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| RailError::SignatureInvalid("signature mismatch".into()))
}

/// Verifies a hex HMAC-SHA512 of the key-sorted JSON body.
///
/// # Errors
///
/// [`RailError::SignatureInvalid`] when the secret or signature is missing,
/// malformed, or wrong; [`RailError::InvalidRequest`] when the body is not
/// JSON.
pub fn verify_sha512_sorted_json(
    secret: Option<&WebhookSecret>,
    body: &[u8],
    signature: Option<&str>,
) -> Result<()> {
    let (secret, expected) = require(secret, signature)?;
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| RailError::InvalidRequest(format!("webhook body is not JSON: {e}")))?;
    let mut mac = HmacSha512::new_from_slice(secret.as_bytes())
        .map_err(|e| RailError::SignatureInvalid(e.to_string()))?;
    mac.update(sorted_json(&value).as_bytes());
    mac.verify_slice(&expected)
        .map_err(|_| RailError::SignatureInvalid("signature mismatch".into()))
}

/// Compact JSON with object keys sorted at every depth.
#[must_use]
pub fn sorted_json(value: &Value) -> String {
    sort_keys(value).to_string()
}

fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.clone(), sort_keys(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}

/// Hex HMAC-SHA256 of `body`, as a sender would compute it.
#[must_use]
pub fn sign_sha256(secret: &WebhookSecret, body: &[u8]) -> String {
    // HMAC accepts keys of any length.
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return String::new();
    };
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Hex HMAC-SHA512 of the key-sorted form of `value`.
#[must_use]
pub fn sign_sha512_sorted_json(secret: &WebhookSecret, value: &Value) -> String {
    let Ok(mut mac) = HmacSha512::new_from_slice(secret.as_bytes()) else {
        return String::new();
    };
    mac.update(sorted_json(value).as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn secret() -> WebhookSecret {
        WebhookSecret::new("whsec_test").unwrap()
    }

    #[test]
    fn sha256_roundtrip_and_prefix() {
        let body = br#"{"type":"InvoiceSettled","invoiceId":"inv-1"}"#;
        let sig = sign_sha256(&secret(), body);
        verify_sha256(Some(&secret()), body, Some(&sig)).unwrap();
        verify_sha256(Some(&secret()), body, Some(&format!("sha256={sig}"))).unwrap();
    }

    #[test]
    fn single_tampered_byte_fails() {
        let body = br#"{"type":"InvoiceSettled","invoiceId":"inv-1"}"#.to_vec();
        let sig = sign_sha256(&secret(), &body);
        let mut tampered = body;
        tampered[10] ^= 0x01;
        assert!(matches!(
            verify_sha256(Some(&secret()), &tampered, Some(&sig)),
            Err(RailError::SignatureInvalid(_))
        ));
    }

    #[test]
    fn missing_secret_or_signature_rejected() {
        let body = b"{}";
        assert!(verify_sha256(None, body, Some("00")).is_err());
        assert!(verify_sha256(Some(&secret()), body, None).is_err());
        assert!(verify_sha256(Some(&secret()), body, Some("zz")).is_err());
        assert!(WebhookSecret::new("  ").is_none());
        assert_eq!(format!("{:?}", secret()), "WebhookSecret(***)");
    }

    #[test]
    fn sorted_json_sorts_nested_keys() {
        let value = json!({"b": 1, "a": {"d": [ {"z": 1, "y": 2} ], "c": null}});
        assert_eq!(sorted_json(&value), r#"{"a":{"c":null,"d":[{"y":2,"z":1}]},"b":1}"#);
    }

    #[test]
    fn sha512_ignores_key_order_of_body() {
        let signed = json!({"payment_id": 5077125051_u64, "payment_status": "finished", "actually_paid": 10});
        let sig = sign_sha512_sorted_json(&secret(), &signed);
        let reordered = br#"{"payment_status":"finished","actually_paid":10,"payment_id":5077125051}"#;
        verify_sha512_sorted_json(Some(&secret()), reordered, Some(&sig)).unwrap();

        let altered = br#"{"payment_status":"finished","actually_paid":11,"payment_id":5077125051}"#;
        assert!(verify_sha512_sorted_json(Some(&secret()), altered, Some(&sig)).is_err());
    }
}
