//! PKCE (Proof Key for Code Exchange) per RFC 7636
//!
//! The verifier stays server-side inside the login attempt and is sent with
//! the token exchange; the S256 challenge goes into the authorization URL so
//! the issuer can tie the exchange to the party that started the login.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngExt;
use sha2::{Digest, Sha256};

use crate::constants::STATE_BYTES;

/// Random bytes behind a verifier. 64 bytes encode to 86 characters, inside
/// the 43..=128 range RFC 7636 allows.
const VERIFIER_BYTES: usize = 64;

/// Generate a cryptographically random PKCE code verifier.
pub fn generate_verifier() -> String {
    let mut bytes = [0u8; VERIFIER_BYTES];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Compute the S256 code challenge: `BASE64URL(SHA256(verifier))`.
pub fn compute_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

/// Unguessable URL-safe token, used for anti-forgery state and nonces.
pub fn random_token() -> String {
    let mut bytes = [0u8; STATE_BYTES];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn is_base64url(s: &str) -> bool {
    s.chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Checks the RFC 7636 shape of a verifier (length and alphabet).
pub fn is_valid_verifier(verifier: &str) -> bool {
    (43..=128).contains(&verifier.len()) && is_base64url(verifier)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verifier_is_url_safe_and_in_range() {
        let verifier = generate_verifier();
        assert_eq!(verifier.len(), 86);
        assert!(is_valid_verifier(&verifier), "bad verifier: {verifier}");
    }

    #[test]
    fn verifiers_are_unique() {
        assert_ne!(generate_verifier(), generate_verifier());
    }

    #[test]
    fn challenge_matches_known_value() {
        // SHA256("hello") = 2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824
        assert_eq!(
            compute_challenge("hello"),
            "LPJNul-wow4m6DsqxbninhsWHlwfp0JecwQzYpOLmCQ"
        );
    }

    #[test]
    fn challenge_decodes_to_sha256_digest() {
        let challenge = compute_challenge(&generate_verifier());
        assert_eq!(challenge.len(), 43);
        let decoded = URL_SAFE_NO_PAD.decode(&challenge).expect("valid base64url");
        assert_eq!(decoded.len(), 32);
    }

    #[test]
    fn random_tokens_are_distinct_and_url_safe() {
        let a = random_token();
        let b = random_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
        assert!(is_base64url(&a));
    }

    #[test]
    fn verifier_shape_check() {
        assert!(!is_valid_verifier("short"));
        assert!(!is_valid_verifier(&"a".repeat(129)));
        assert!(!is_valid_verifier(&format!("{}+", "a".repeat(50))));
        assert!(is_valid_verifier(&"a".repeat(43)));
    }
}
