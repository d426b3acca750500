// SPDX-FileCopyrightText: 2026 Waitline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Webhook payload authentication: `X-Hub-Signature-256` over the raw
//! request body, verified in constant time via the HMAC crate.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Verify `header` (format `sha256=<hex>`) against the raw body.
///
/// Any malformed header is a plain `false`; the gateway responds 401
/// either way and never explains which part failed.
pub fn verify_signature(app_secret: &str, body: &[u8], header: &str) -> bool {
    let Some(hex_sig) = header.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(sig) = hex::decode(hex_sig) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(app_secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&sig).is_ok()
}

/// Sign a body the way the provider would. Test helper, but also used by
/// the local `send-test-webhook` tooling.
pub fn sign_body(app_secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(app_secret.as_bytes())
        .expect("HMAC accepts any key length");
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_body_verifies() {
        let body = br#"{"entry":[]}"#;
        let header = sign_body("secret", body);
        assert!(verify_signature("secret", body, &header));
    }

    #[test]
    fn wrong_secret_or_body_fails() {
        let body = br#"{"entry":[]}"#;
        let header = sign_body("secret", body);
        assert!(!verify_signature("other-secret", body, &header));
        assert!(!verify_signature("secret", br#"{"entry":[1]}"#, &header));
    }

    #[test]
    fn malformed_headers_fail_quietly() {
        let body = b"x";
        for header in ["", "sha256=", "sha256=zz", "md5=abcd", "abcdef"] {
            assert!(!verify_signature("secret", body, header), "{header}");
        }
    }
}
