//! Webhook authenticity checks.
//!
//! Verification is deliberately the canonical construction for this
//! provider's webhooks, nothing homegrown: HMAC-SHA256 over the exact raw
//! body, hex tag in the `X-Hub-Signature-256` header, constant-time
//! comparison of the tags.

use {
    hmac::{Hmac, Mac},
    sha2::Sha256,
    tracing::warn,
};

type HmacSha256 = Hmac<Sha256>;

/// Verify the webhook signature over the exact raw request body.
///
/// The provider sends `X-Hub-Signature-256: sha256=<hex>` computed with the
/// application's shared signing secret.
pub fn verify_signature(body: &[u8], signature_header: &str, app_secret: &str) -> bool {
    let Some(claimed) = signature_header.strip_prefix("sha256=") else {
        warn!("signature header missing sha256= prefix");
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(app_secret.as_bytes()) else {
        warn!("signing secret unusable as an HMAC key");
        return false;
    };
    mac.update(body);
    let computed = hex::encode(mac.finalize().into_bytes());
    constant_time_eq(&computed, claimed)
}

/// Compare two hex tags in time independent of where they differ. Length
/// is not secret, so the mismatch check up front is fine; past it, every
/// byte pair is visited.
fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Check a subscription handshake (GET). Returns the challenge to echo when
/// the mode is `subscribe` and the presented token matches a configured
/// account's verify token.
pub async fn verify_subscription(
    store: &courant_store::Store,
    mode: Option<&str>,
    token: Option<&str>,
    challenge: Option<&str>,
) -> Option<String> {
    let (mode, token, challenge) = (mode?, token?, challenge?);
    if mode != "subscribe" {
        return None;
    }
    match store.verify_token_known(token).await {
        Ok(true) => Some(challenge.to_string()),
        Ok(false) => None,
        Err(e) => {
            warn!("verify token lookup failed: {e}");
            None
        },
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn sign(body: &[u8], secret: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn valid_signature_accepted() {
        let body = br#"{"entry":[]}"#;
        assert!(verify_signature(body, &sign(body, "secret"), "secret"));
    }

    #[test]
    fn wrong_secret_rejected() {
        let body = br#"{"entry":[]}"#;
        assert!(!verify_signature(body, &sign(body, "other"), "secret"));
    }

    #[test]
    fn tampered_body_rejected() {
        let signature = sign(br#"{"entry":[]}"#, "secret");
        assert!(!verify_signature(br#"{"entry":[1]}"#, &signature, "secret"));
    }

    #[test]
    fn missing_prefix_rejected() {
        assert!(!verify_signature(b"body", "deadbeef", "secret"));
    }

    #[test]
    fn constant_time_eq_matches_exact_tags_only() {
        let tag = "4fe04a4d18573dcfa26c08cbb9e5114438f1d3c7a9cb51eac7bf1478a3d95b72";
        assert!(constant_time_eq(tag, tag));

        // One flipped nibble at the front fails.
        let mut flipped = tag.to_string();
        flipped.replace_range(0..1, "5");
        assert!(!constant_time_eq(tag, &flipped));

        // Truncated tags are a length mismatch, rejected outright.
        assert!(!constant_time_eq(tag, &tag[..32]));
        assert!(!constant_time_eq(tag, ""));
    }
}
