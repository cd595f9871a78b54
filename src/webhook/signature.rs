//! Webhook signature verification.
//!
//! The provider signs the raw request body with HMAC-SHA256 keyed by the API
//! secret and sends the hex digest in `x-signature`, alongside its API key in
//! `x-api-key`.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-signature";
pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureCheck {
    Valid,
    Missing,
    WrongApiKey,
    Invalid,
}

#[derive(Clone)]
pub struct SignatureVerifier {
    api_key: String,
    secret: String,
}

impl SignatureVerifier {
    pub fn new(api_key: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            secret: secret.into(),
        }
    }

    pub fn sign(&self, body: &[u8]) -> String {
        let mut mac = self.mac();
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    pub fn verify(&self, body: &[u8], signature: Option<&str>, api_key: Option<&str>) -> SignatureCheck {
        let (Some(signature), Some(api_key)) = (signature, api_key) else {
            return SignatureCheck::Missing;
        };
        if signature.trim().is_empty() || api_key.trim().is_empty() {
            return SignatureCheck::Missing;
        }
        if api_key != self.api_key {
            return SignatureCheck::WrongApiKey;
        }

        let Ok(expected) = hex::decode(signature.trim()) else {
            return SignatureCheck::Invalid;
        };

        let mut mac = self.mac();
        mac.update(body);
        match mac.verify_slice(&expected) {
            Ok(()) => SignatureCheck::Valid,
            Err(_) => SignatureCheck::Invalid,
        }
    }

    fn mac(&self) -> HmacSha256 {
        <HmacSha256 as Mac>::new_from_slice(self.secret.as_bytes())
            .unwrap_or_else(|_| unreachable!("HMAC accepts keys of any length"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verifier() -> SignatureVerifier {
        SignatureVerifier::new("key-123", "top-secret")
    }

    #[test]
    fn test_sign_then_verify() {
        let verifier = verifier();
        let body = br#"{"type":"call.ended"}"#;
        let signature = verifier.sign(body);

        assert_eq!(signature.len(), 64);
        assert_eq!(
            verifier.verify(body, Some(&signature), Some("key-123")),
            SignatureCheck::Valid
        );
    }

    #[test]
    fn test_tampered_body_is_invalid() {
        let verifier = verifier();
        let signature = verifier.sign(b"original");
        assert_eq!(
            verifier.verify(b"tampered", Some(&signature), Some("key-123")),
            SignatureCheck::Invalid
        );
    }

    #[test]
    fn test_missing_headers() {
        let verifier = verifier();
        assert_eq!(verifier.verify(b"x", None, Some("key-123")), SignatureCheck::Missing);
        assert_eq!(verifier.verify(b"x", Some("abc"), None), SignatureCheck::Missing);
        assert_eq!(verifier.verify(b"x", Some(""), Some("key-123")), SignatureCheck::Missing);
    }

    #[test]
    fn test_wrong_api_key() {
        let verifier = verifier();
        let signature = verifier.sign(b"x");
        assert_eq!(
            verifier.verify(b"x", Some(&signature), Some("other")),
            SignatureCheck::WrongApiKey
        );
    }

    #[test]
    fn test_non_hex_signature() {
        assert_eq!(
            verifier().verify(b"x", Some("not-hex!"), Some("key-123")),
            SignatureCheck::Invalid
        );
    }
}
