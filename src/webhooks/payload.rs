//! Webhook payload types and HMAC signing.
//!
//! # Payload Format
//!
//! ```json
//! {
//!   "event_id": "01890a5d-ac96-774b-bcce-b302099a8057",
//!   "event_type": "document.user_changed",
//!   "timestamp": "2024-01-15T10:30:00+00:00",
//!   "data": { "doc_token": "doxcn123", "change_type": "user_changed", ... }
//! }
//! ```
//!
//! `event_id` is the change event ID, so receivers can deduplicate retried
//! deliveries.
//!
//! # HMAC Signing
//!
//! When a signing secret is configured, the serialized body is signed using
//! HMAC-SHA256 and the signature is sent in the `X-Docwatch-Signature` header
//! in the format `sha256=<hex-encoded-signature>`.

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::models::ChangeEvent;

type HmacSha256 = Hmac<Sha256>;

/// Webhook payload sent to rule webhook targets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookPayload {
    /// Change event ID, stable across retries.
    pub event_id: String,

    /// `document.<change_type>`.
    pub event_type: String,

    /// RFC 3339 timestamp of the change detection.
    pub timestamp: String,

    /// The full change event.
    pub data: serde_json::Value,
}

impl WebhookPayload {
    /// Builds the payload for a change event.
    #[must_use]
    pub fn from_change(event: &ChangeEvent) -> Self {
        let timestamp = chrono::DateTime::from_timestamp_millis(event.change_detected_at)
            .unwrap_or_default()
            .to_rfc3339();

        Self {
            event_id: event.id.clone(),
            event_type: format!("document.{}", event.change_type),
            timestamp,
            data: serde_json::to_value(event).unwrap_or(serde_json::Value::Null),
        }
    }

    /// Converts the payload to a JSON string.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Computes an HMAC-SHA256 signature for a payload string.
///
/// # Returns
///
/// The signature in format `sha256=<hex-encoded-signature>`.
#[must_use]
pub fn compute_hmac_signature(secret: &str, payload: &str) -> String {
    // HMAC accepts keys of any length.
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap_or_else(|_| unreachable!());
    mac.update(payload.as_bytes());
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// Verifies an HMAC-SHA256 signature in constant time.
///
/// Accepts the signature with or without the `sha256=` prefix. Provided for
/// webhook receivers.
#[must_use]
pub fn verify_hmac_signature(secret: &str, payload: &str, signature: &str) -> bool {
    let hex_part = signature.strip_prefix("sha256=").unwrap_or(signature);
    let Ok(expected) = hex::decode(hex_part) else {
        return false;
    };
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap_or_else(|_| unreachable!());
    mac.update(payload.as_bytes());
    mac.verify_slice(&expected).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChangeType;

    #[test]
    fn test_payload_from_change() {
        let event = ChangeEvent::new("doc-1", ChangeType::UserChanged, 1_700_000_000_000)
            .with_new_user("U2");
        let payload = WebhookPayload::from_change(&event);

        assert_eq!(payload.event_id, event.id);
        assert_eq!(payload.event_type, "document.user_changed");
        assert!(payload.timestamp.starts_with("2023-11-14T"));
        assert_eq!(payload.data["doc_token"], "doc-1");
        assert_eq!(payload.data["new_modified_user"], "U2");
    }

    #[test]
    fn test_hmac_signature_computation() {
        let signature = compute_hmac_signature("my-secret-key", r#"{"event":"test"}"#);

        assert!(signature.starts_with("sha256="));
        assert_eq!(signature.len(), 7 + 64);
    }

    #[test]
    fn test_hmac_signature_verification() {
        let secret = "my-secret-key";
        let payload = r#"{"event":"test"}"#;
        let signature = compute_hmac_signature(secret, payload);

        assert!(verify_hmac_signature(secret, payload, &signature));
        assert!(verify_hmac_signature(
            secret,
            payload,
            signature.strip_prefix("sha256=").unwrap()
        ));
        assert!(!verify_hmac_signature("wrong-secret", payload, &signature));
        assert!(!verify_hmac_signature(secret, "wrong-payload", &signature));
        assert!(!verify_hmac_signature(secret, payload, "sha256=not-hex"));
    }
}
