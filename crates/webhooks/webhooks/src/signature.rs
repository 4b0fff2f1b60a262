//! HMAC signature generation and verification.
//!
//! The signature is the lowercase hex HMAC-SHA256 of the exact request body
//! bytes, keyed by the subscription secret. Receivers recompute it over the
//! raw body they received.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the payload signature.
pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";
/// Header carrying the event type.
pub const EVENT_HEADER: &str = "X-Webhook-Event";
/// Header carrying the idempotency key of the delivery job.
pub const DELIVERY_HEADER: &str = "X-Webhook-Delivery";
/// Header carrying the 1-based attempt number.
pub const ATTEMPT_HEADER: &str = "X-Webhook-Attempt";

/// Webhook signer for generating and verifying signatures.
#[derive(Clone)]
pub struct WebhookSigner {
    secret: String,
}

impl WebhookSigner {
    /// Creates a new signer with the given secret.
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Generates the signature for a raw body.
    pub fn sign(&self, body: &[u8]) -> String {
        hex::encode(self.mac(body).finalize().into_bytes())
    }

    /// Verifies a hex signature against a raw body in constant time.
    pub fn verify(&self, body: &[u8], signature: &str) -> bool {
        let Ok(expected) = hex::decode(signature.trim()) else {
            return false;
        };
        self.mac(body).verify_slice(&expected).is_ok()
    }

    fn mac(&self, body: &[u8]) -> HmacSha256 {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(body);
        mac
    }
}

impl std::fmt::Debug for WebhookSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookSigner").finish_non_exhaustive()
    }
}

/// Signs `body` with `secret`.
pub fn sign(secret: &str, body: &[u8]) -> String {
    WebhookSigner::new(secret).sign(body)
}

/// Checks `signature` over `body` with `secret`.
pub fn verify(secret: &str, body: &[u8], signature: &str) -> bool {
    WebhookSigner::new(secret).verify(body, signature)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let body = br#"{"event":"dataset.published","entityId":"42"}"#;
        let signature = sign("test-secret", body);

        assert!(verify("test-secret", body, &signature));
        assert!(!verify("other-secret", body, &signature));
    }

    #[test]
    fn test_any_mutation_invalidates() {
        let body = br#"{"event":"dataset.published","entityId":"42"}"#.to_vec();
        let signature = sign("test-secret", &body);

        for i in 0..body.len() {
            let mut mutated = body.clone();
            mutated[i] ^= 0x01;
            assert!(!verify("test-secret", &mutated, &signature));
        }

        let mut extended = body.clone();
        extended.push(b' ');
        assert!(!verify("test-secret", &extended, &signature));
    }

    #[test]
    fn test_known_vector() {
        // RFC 4231 test case 2.
        let signature = sign("Jefe", b"what do ya want for nothing?");
        assert_eq!(
            signature,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_garbage_signature_rejected() {
        assert!(!verify("secret", b"body", "not-hex"));
        assert!(!verify("secret", b"body", ""));
    }
}
