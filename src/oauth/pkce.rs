//! PKCE (Proof Key for Code Exchange) per RFC 7636.

use crate::oauth::types::constant_time_eq;
use base64::prelude::*;
use sha2::{Digest, Sha256};

/// Challenge methods accepted at the authorization endpoint.
pub const SUPPORTED_METHODS: [&str; 2] = ["plain", "S256"];

/// Verifiers must be 43 to 128 characters from the unreserved set.
pub fn is_valid_verifier(verifier: &str) -> bool {
    (43..=128).contains(&verifier.len())
        && verifier
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~'))
}

/// `BASE64URL(SHA256(code_verifier))`
pub fn challenge_s256(code_verifier: &str) -> String {
    BASE64_URL_SAFE_NO_PAD.encode(Sha256::digest(code_verifier.as_bytes()))
}

/// Check a verifier against the challenge stored with an authorization code.
///
/// A missing method means `plain`, as RFC 7636 section 4.3 prescribes.
pub fn verify_pkce(code_verifier: &str, code_challenge: &str, method: Option<&str>) -> bool {
    if !is_valid_verifier(code_verifier) {
        return false;
    }
    match method.unwrap_or("plain") {
        "S256" => constant_time_eq(&challenge_s256(code_verifier), code_challenge),
        "plain" => constant_time_eq(code_verifier, code_challenge),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
    const CHALLENGE: &str = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";

    #[test]
    fn test_s256_rfc_vector() {
        assert_eq!(challenge_s256(VERIFIER), CHALLENGE);
        assert!(verify_pkce(VERIFIER, CHALLENGE, Some("S256")));
    }

    #[test]
    fn test_s256_mismatch() {
        let other = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXx";
        assert!(!verify_pkce(other, CHALLENGE, Some("S256")));
    }

    #[test]
    fn test_plain() {
        assert!(verify_pkce(VERIFIER, VERIFIER, Some("plain")));
        assert!(verify_pkce(VERIFIER, VERIFIER, None));
        assert!(!verify_pkce(VERIFIER, CHALLENGE, None));
    }

    #[test]
    fn test_verifier_shape() {
        assert!(!verify_pkce("short", "short", Some("plain")));
        assert!(!is_valid_verifier(&"a".repeat(129)));
        assert!(!is_valid_verifier(&format!("{}!", &VERIFIER[..43])));
        assert!(!verify_pkce(VERIFIER, CHALLENGE, Some("S512")));
    }
}
