// SPDX-FileCopyrightText: 2026 Waitline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Phone vault: field-level encryption and one-way dedup hashing for
//! contact numbers.
//!
//! Stored form: `base64(iv) + "." + base64(ciphertext||tag)`. The dedup
//! hash is HMAC-SHA256 over the normalized number with a secret pepper --
//! deterministic so an existing active ticket can be found without storing
//! plaintext, irreversible without the pepper.

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use waitline_core::WaitlineError;

use crate::crypto;

type HmacSha256 = Hmac<Sha256>;

/// Encrypts, decrypts, and hashes phone numbers.
///
/// One vault instance per process, built from the configured 32-byte
/// encryption key and HMAC pepper.
#[derive(Clone)]
pub struct PhoneVault {
    key: [u8; 32],
    pepper: Vec<u8>,
}

impl PhoneVault {
    pub fn new(key: [u8; 32], pepper: Vec<u8>) -> Self {
        Self { key, pepper }
    }

    /// Construct from the hex-encoded key the config carries.
    pub fn from_hex_key(key_hex: &str, pepper: &str) -> Result<Self, WaitlineError> {
        let bytes = hex::decode(key_hex)
            .map_err(|_| WaitlineError::Config("vault key is not valid hex".to_string()))?;
        let key: [u8; 32] = bytes.try_into().map_err(|_| {
            WaitlineError::Config("vault key must decode to exactly 32 bytes".to_string())
        })?;
        Ok(Self::new(key, pepper.as_bytes().to_vec()))
    }

    /// AES-256-GCM with a fresh random 96-bit IV per call.
    pub fn encrypt_phone(&self, plaintext: &str) -> Result<String, WaitlineError> {
        let (ciphertext, nonce) = crypto::seal(&self.key, plaintext.as_bytes())?;
        Ok(format!("{}.{}", B64.encode(nonce), B64.encode(ciphertext)))
    }

    /// Inverse of [`encrypt_phone`]. Malformed encoding or an auth-tag
    /// mismatch raises [`WaitlineError::Tamper`].
    pub fn decrypt_phone(&self, stored: &str) -> Result<String, WaitlineError> {
        let (iv_b64, ct_b64) = stored
            .split_once('.')
            .ok_or_else(|| WaitlineError::Tamper("stored phone missing iv separator".to_string()))?;

        let iv = B64
            .decode(iv_b64)
            .map_err(|_| WaitlineError::Tamper("stored phone iv is not valid base64".to_string()))?;
        let nonce: [u8; 12] = iv
            .try_into()
            .map_err(|_| WaitlineError::Tamper("stored phone iv is not 96 bits".to_string()))?;

        let ciphertext = B64.decode(ct_b64).map_err(|_| {
            WaitlineError::Tamper("stored phone ciphertext is not valid base64".to_string())
        })?;

        let plaintext = crypto::open(&self.key, &nonce, &ciphertext)?;
        String::from_utf8(plaintext)
            .map_err(|_| WaitlineError::Tamper("decrypted phone is not valid UTF-8".to_string()))
    }

    /// Deterministic HMAC-SHA256 dedup hash, hex encoded.
    pub fn hash_phone(&self, plaintext: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(&self.pepper)
            .expect("HMAC accepts any key length");
        mac.update(plaintext.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Re-encrypt one stored value under a new vault.
    ///
    /// Building block for the offline key-rotation batch job
    /// (decrypt-with-old, re-encrypt-with-new across all rows). Not a
    /// runtime path.
    pub fn rotate_phone(&self, new_vault: &PhoneVault, stored: &str) -> Result<String, WaitlineError> {
        let plaintext = self.decrypt_phone(stored)?;
        new_vault.encrypt_phone(&plaintext)
    }
}

impl std::fmt::Debug for PhoneVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhoneVault").finish_non_exhaustive()
    }
}

/// Normalize a phone number to `+` plus digits.
///
/// Accepts spaces, dashes, and parentheses; requires 7..=15 digits.
pub fn normalize_phone(raw: &str) -> Result<String, WaitlineError> {
    let trimmed = raw.trim();
    let has_plus = trimmed.starts_with('+');
    let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();

    let rejected: Option<char> = trimmed
        .chars()
        .find(|c| !c.is_ascii_digit() && !matches!(c, '+' | ' ' | '-' | '(' | ')'));
    if let Some(c) = rejected {
        return Err(WaitlineError::Validation(format!(
            "phone contains invalid character `{c}`"
        )));
    }
    if !(7..=15).contains(&digits.len()) {
        return Err(WaitlineError::Validation(format!(
            "phone must contain 7 to 15 digits, got {}",
            digits.len()
        )));
    }

    if has_plus {
        Ok(format!("+{digits}"))
    } else {
        Ok(digits)
    }
}
