//! Webhook authentication.
//!
//! Two schemes are accepted, either one sufficient:
//!
//! 1. The shared secret itself in `X-Webhook-Secret`.
//! 2. An HMAC-SHA256 of the raw request body in
//!    `X-Webhook-Signature: sha256=<hex>`, keyed by the shared secret.
//!
//! Both comparisons are constant-time. Verification happens before the body
//! is parsed; a request that fails auth is rejected with no hint about which
//! scheme failed. When no secret is configured the endpoint stays open (a
//! warning is logged at startup).

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the shared secret verbatim.
pub const SECRET_HEADER: &str = "x-webhook-secret";

/// Header carrying the HMAC signature of the body.
pub const SIGNATURE_HEADER: &str = "x-webhook-signature";

/// Constant-time equality on byte strings.
///
/// Short-circuits only on length, which the comparison inevitably reveals.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Parses a `sha256=<hex>` signature header into raw bytes.
///
/// Returns `None` for malformed headers (missing prefix, bad hex). Never
/// panics.
pub fn parse_signature_header(header: &str) -> Option<Vec<u8>> {
    let hex_sig = header.strip_prefix("sha256=")?;
    hex::decode(hex_sig).ok()
}

/// Computes the HMAC-SHA256 of a payload with the given secret.
///
/// Exposed so tests (and operators scripting deliveries) can produce valid
/// signatures.
pub fn compute_signature(payload: &[u8], secret: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(payload);
    mac.finalize().into_bytes().to_vec()
}

/// Formats a signature as a header value (`sha256=<hex>`).
pub fn format_signature_header(signature: &[u8]) -> String {
    format!("sha256={}", hex::encode(signature))
}

/// Verifies an HMAC signature header against the payload and secret.
pub fn verify_signature(payload: &[u8], signature_header: &str, secret: &[u8]) -> bool {
    let expected = match parse_signature_header(signature_header) {
        Some(sig) => sig,
        None => return false,
    };

    let mut mac = match HmacSha256::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(payload);
    // Constant-time comparison via the HMAC library.
    mac.verify_slice(&expected).is_ok()
}

/// Authenticates one request given whichever headers it carried.
///
/// With no configured secret every request passes. With a secret, a present
/// `X-Webhook-Secret` is compared (constant-time) and decides the outcome on
/// its own; otherwise a present signature header is verified; otherwise the
/// request is rejected.
pub fn authenticate(
    configured_secret: Option<&str>,
    secret_header: Option<&str>,
    signature_header: Option<&str>,
    body: &[u8],
) -> bool {
    let Some(secret) = configured_secret else {
        return true;
    };

    if let Some(provided) = secret_header {
        return constant_time_eq(provided.as_bytes(), secret.as_bytes());
    }

    if let Some(signature) = signature_header {
        return verify_signature(body, signature, secret.as_bytes());
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    // ─── Shared-secret scheme ───

    #[test]
    fn matching_secret_header_passes() {
        assert!(authenticate(Some("S"), Some("S"), None, b"{}"));
    }

    #[test]
    fn wrong_secret_header_fails_even_with_valid_signature() {
        // A present secret header decides on its own; no fallback.
        let sig = format_signature_header(&compute_signature(b"{}", b"S"));
        assert!(!authenticate(Some("S"), Some("WRONG"), Some(&sig), b"{}"));
    }

    #[test]
    fn no_credentials_fails_when_secret_configured() {
        assert!(!authenticate(Some("S"), None, None, b"{}"));
    }

    #[test]
    fn everything_passes_without_a_configured_secret() {
        assert!(authenticate(None, None, None, b"{}"));
        assert!(authenticate(None, Some("whatever"), None, b"{}"));
    }

    // ─── HMAC scheme ───

    #[test]
    fn valid_signature_passes() {
        let body = br#"{"eventType":"Grab"}"#;
        let sig = format_signature_header(&compute_signature(body, b"S"));
        assert!(authenticate(Some("S"), None, Some(&sig), body));
    }

    #[test]
    fn signature_over_different_body_fails() {
        let sig = format_signature_header(&compute_signature(b"original", b"S"));
        assert!(!authenticate(Some("S"), None, Some(&sig), b"tampered"));
    }

    #[test]
    fn signature_with_wrong_key_fails() {
        let body = b"payload";
        let sig = format_signature_header(&compute_signature(body, b"other-secret"));
        assert!(!authenticate(Some("S"), None, Some(&sig), body));
    }

    #[test]
    fn malformed_signature_headers_fail_without_panicking() {
        for header in ["", "sha256=", "sha256=zzzz", "sha1=abcd", "abcd", "sha256=abc"] {
            assert!(
                !authenticate(Some("S"), None, Some(header), b"body"),
                "header {header:?} should fail"
            );
        }
    }

    #[test]
    fn parse_signature_header_accepts_hex() {
        assert_eq!(
            parse_signature_header("sha256=1234abcd"),
            Some(vec![0x12, 0x34, 0xab, 0xcd])
        );
        assert_eq!(parse_signature_header("1234abcd"), None);
        assert_eq!(parse_signature_header("sha256=xyz"), None);
    }

    #[test]
    fn constant_time_eq_basic_properties() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
        assert!(constant_time_eq(b"", b""));
    }

    // ─── Properties ───

    proptest! {
        #[test]
        fn sign_then_verify_roundtrips(body: Vec<u8>, secret in "[!-~]{1,64}") {
            let sig = format_signature_header(&compute_signature(&body, secret.as_bytes()));
            prop_assert!(authenticate(Some(&secret), None, Some(&sig), &body));
        }

        #[test]
        fn wrong_secret_never_verifies(body: Vec<u8>, s1 in "[!-~]{1,64}", s2 in "[!-~]{1,64}") {
            prop_assume!(s1 != s2);
            let sig = format_signature_header(&compute_signature(&body, s1.as_bytes()));
            prop_assert!(!authenticate(Some(&s2), None, Some(&sig), &body));
        }

        #[test]
        fn shared_secret_scheme_matches_string_equality(secret in "[!-~]{1,64}", provided in "[!-~]{1,64}") {
            prop_assert_eq!(
                authenticate(Some(&secret), Some(&provided), None, b""),
                secret == provided
            );
        }

        #[test]
        fn arbitrary_headers_never_panic(header in ".{0,100}", body: Vec<u8>) {
            let _ = authenticate(Some("secret"), None, Some(&header), &body);
            let _ = parse_signature_header(&header);
        }

        #[test]
        fn constant_time_eq_matches_plain_equality(a: Vec<u8>, b: Vec<u8>) {
            prop_assert_eq!(constant_time_eq(&a, &b), a == b);
        }
    }
}
