//! Inbound webhook model and verification.
//!
//! The platform delivers a page-subscription document with heterogeneous
//! event objects. Verification covers two mechanisms: the one-time webhook
//! subscription handshake (`hub.verify_token` / `hub.challenge`) and the
//! per-request `X-Hub-Signature` HMAC-SHA1 over the raw body.

use std::collections::HashMap;

use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::Value;
use sha1::Sha1;

use herald_core::{HeraldError, HeraldResult};

type HmacSha1 = Hmac<Sha1>;

/// The `object` value a payload must declare to be accepted.
pub const PAGE_OBJECT: &str = "page";

// =============================================================================
// Payload Model
// =============================================================================

/// A webhook delivery batch.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookPayload {
    /// Subscription object type; only [`PAGE_OBJECT`] payloads are processed.
    #[serde(default)]
    pub object: String,

    /// Per-page entries of the batch.
    #[serde(default)]
    pub entry: Vec<WebhookEntry>,
}

/// One per-page entry of a webhook batch.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEntry {
    /// Page identifier.
    #[serde(default)]
    pub id: String,

    /// Events on the primary channel.
    #[serde(default)]
    pub messaging: Vec<Value>,

    /// Events observed while another application owns the thread.
    #[serde(default)]
    pub standby: Vec<Value>,
}

impl WebhookPayload {
    /// Deserializes a webhook body. Returns `None` for unrecognized shapes.
    pub fn from_value(body: &Value) -> Option<Self> {
        serde_json::from_value(body.clone()).ok()
    }
}

// =============================================================================
// Verification
// =============================================================================

/// Verifies the webhook subscription handshake.
///
/// Returns the `hub.challenge` value to echo back on success.
pub fn verify_webhook(
    bot_token: Option<&str>,
    query: &HashMap<String, String>,
) -> HeraldResult<String> {
    let Some(bot_token) = bot_token else {
        return Err(HeraldError::unauthorized(
            "missing configuration (bot_token)",
        ));
    };

    match query.get("hub.verify_token") {
        None => Err(HeraldError::unauthorized(
            "missing hub.verify_token in query",
        )),
        Some(token) if token == bot_token => {
            Ok(query.get("hub.challenge").cloned().unwrap_or_default())
        }
        Some(_) => Err(HeraldError::unauthorized("wrong hub.verify_token")),
    }
}

/// Verifies the `X-Hub-Signature` header against the raw request body.
///
/// Skipped entirely when no app secret is configured. The header value is
/// split on `=` and the hex digest taken from the second element.
pub fn verify_request(
    app_secret: Option<&str>,
    body: &[u8],
    headers: &HashMap<String, String>,
) -> HeraldResult<()> {
    let Some(app_secret) = app_secret else {
        return Ok(());
    };

    let signature = headers
        .get("x-hub-signature")
        .or_else(|| headers.get("X-Hub-Signature"))
        .ok_or_else(|| HeraldError::unauthorized("missing X-Hub-Signature"))?;

    let signature_hash = signature.split('=').nth(1).unwrap_or_default();

    let mut mac = HmacSha1::new_from_slice(app_secret.as_bytes())
        .map_err(|_| HeraldError::unauthorized("invalid app secret"))?;
    mac.update(body);
    let expected_hash = hex::encode(mac.finalize().into_bytes());

    if !constant_time_eq(signature_hash, &expected_hash) {
        return Err(HeraldError::unauthorized(
            "couldn't validate the request signature",
        ));
    }

    Ok(())
}

/// Constant-time string comparison.
fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes()
        .zip(b.bytes())
        .fold(0, |acc, (x, y)| acc | (x ^ y))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn query(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_verify_webhook_echoes_challenge() {
        let q = query(&[("hub.verify_token", "a"), ("hub.challenge", "challenge")]);
        let res = verify_webhook(Some("a"), &q).unwrap();
        assert_eq!(res, "challenge");
    }

    #[test]
    fn test_verify_webhook_requires_configured_token() {
        let q = query(&[("hub.verify_token", "a"), ("hub.challenge", "challenge")]);
        let err = verify_webhook(None, &q).unwrap_err();
        assert_eq!(err.status(), 401);
    }

    #[test]
    fn test_verify_webhook_requires_query_token() {
        let q = query(&[("hub.challenge", "challenge")]);
        let err = verify_webhook(Some("a"), &q).unwrap_err();
        assert_eq!(err.status(), 401);
    }

    #[test]
    fn test_verify_webhook_rejects_wrong_token() {
        let q = query(&[("hub.verify_token", "b"), ("hub.challenge", "challenge")]);
        let err = verify_webhook(Some("a"), &q).unwrap_err();
        assert_eq!(err.status(), 401);
    }

    #[test]
    fn test_verify_request_skipped_without_secret() {
        let headers = query(&[("x-hub-signature", "any")]);
        verify_request(None, b"body", &headers).unwrap();
    }

    #[test]
    fn test_verify_request_accepts_valid_signature() {
        let headers = query(&[(
            "x-hub-signature",
            "hash=fb22411c05e5748702d3949efbef160bf1bdc11a",
        )]);
        verify_request(Some("as"), b"body", &headers).unwrap();
    }

    #[test]
    fn test_verify_request_accepts_header_case_variant() {
        let headers = query(&[(
            "X-Hub-Signature",
            "sha1=fb22411c05e5748702d3949efbef160bf1bdc11a",
        )]);
        verify_request(Some("as"), b"body", &headers).unwrap();
    }

    #[test]
    fn test_verify_request_rejects_missing_header() {
        let headers = HashMap::new();
        let err = verify_request(Some("as"), b"body", &headers).unwrap_err();
        assert_eq!(err.status(), 401);
    }

    #[test]
    fn test_verify_request_rejects_wrong_digest() {
        let headers = query(&[("x-hub-signature", "hash=foo")]);
        let err = verify_request(Some("as"), b"body", &headers).unwrap_err();
        assert_eq!(err.status(), 401);
    }

    #[test]
    fn test_payload_model() {
        let body = json!({
            "object": "page",
            "entry": [{
                "id": "pid",
                "messaging": [{"sender": {"id": "abc"}, "message": {"text": "hi"}}],
                "standby": [{"sender": {"id": "xyz"}, "message": {"text": "quiet"}}]
            }]
        });

        let payload = WebhookPayload::from_value(&body).unwrap();
        assert_eq!(payload.object, PAGE_OBJECT);
        assert_eq!(payload.entry.len(), 1);
        assert_eq!(payload.entry[0].id, "pid");
        assert_eq!(payload.entry[0].messaging.len(), 1);
        assert_eq!(payload.entry[0].standby.len(), 1);
    }
}
