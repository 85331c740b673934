//! Outbound Payload Signing
//!
//! When a signing secret is configured every webhook POST carries an
//! HMAC-SHA256 of its exact body and the Unix time it was signed at.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying `sha256=<hex signature>`.
pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";

/// Header carrying the Unix time (seconds) the request was signed.
pub const TIMESTAMP_HEADER: &str = "X-Webhook-Timestamp";

/// Hex-encoded HMAC-SHA256 of `body` under `secret`.
pub fn sign_payload(secret: &str, body: &[u8]) -> String {
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => unreachable!("HMAC accepts keys of any length"),
    };
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Header pairs to attach to a signed webhook request.
pub fn signature_headers(secret: &str, body: &[u8], signed_at: i64) -> [(&'static str, String); 2] {
    [
        (SIGNATURE_HEADER, format!("sha256={}", sign_payload(secret, body))),
        (TIMESTAMP_HEADER, signed_at.to_string()),
    ]
}
