//! Password-based payload encryption.
//!
//! Token layout: `hex(salt) ":" hex(nonce) ":" hex(ciphertext || tag)`.
//! Key = Argon2id(password, salt), cipher = AES-256-GCM. Salt and nonce are
//! drawn fresh for every call, so encrypting the same input twice never
//! yields the same token.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use argon2::{Algorithm, Argon2, Params, Version};
use rand_core::{OsRng, RngCore};

use crate::error::{QrError, QrResult};

pub const SALT_LEN: usize = 16;
pub const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;
const TAG_LEN: usize = 16;

#[derive(Clone)]
pub struct Cipher {
    params: Params,
}

impl Default for Cipher {
    fn default() -> Self {
        Self {
            params: Params::default(),
        }
    }
}

impl Cipher {
    pub fn with_params(params: Params) -> Self {
        Self { params }
    }

    fn derive_key(&self, password: &str, salt: &[u8]) -> QrResult<[u8; KEY_LEN]> {
        let mut key = [0u8; KEY_LEN];
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
            .hash_password_into(password.as_bytes(), salt, &mut key)
            .map_err(|e| QrError::cipher(format!("key derivation: {e}")))?;
        Ok(key)
    }

    pub fn encrypt(&self, payload: &str, password: &str) -> QrResult<String> {
        if password.is_empty() {
            return Err(QrError::invalid("Encryption password must not be empty"));
        }

        let mut salt = [0u8; SALT_LEN];
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut salt);
        OsRng.fill_bytes(&mut nonce);

        let key = self.derive_key(password, &salt)?;
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| QrError::cipher(format!("cipher init: {e}")))?;
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), payload.as_bytes())
            .map_err(QrError::cipher)?;

        Ok(format!(
            "{}:{}:{}",
            hex::encode(salt),
            hex::encode(nonce),
            hex::encode(ciphertext)
        ))
    }

    /// Every failure (shape, hex, tag, UTF-8) maps to [`QrError::Decryption`].
    pub fn decrypt(&self, token: &str, password: &str) -> QrResult<String> {
        let (salt, nonce, ciphertext) = split_token(token).ok_or(QrError::Decryption)?;

        let key = self
            .derive_key(password, &salt)
            .map_err(|_| QrError::Decryption)?;
        let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| QrError::Decryption)?;
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext.as_slice())
            .map_err(|_| QrError::Decryption)?;

        String::from_utf8(plaintext).map_err(|_| QrError::Decryption)
    }
}

fn split_token(token: &str) -> Option<(Vec<u8>, Vec<u8>, Vec<u8>)> {
    let mut parts = token.trim().split(':');
    let salt = hex::decode(parts.next()?).ok()?;
    let nonce = hex::decode(parts.next()?).ok()?;
    let ciphertext = hex::decode(parts.next()?).ok()?;
    if parts.next().is_some()
        || salt.len() != SALT_LEN
        || nonce.len() != NONCE_LEN
        || ciphertext.len() < TAG_LEN
    {
        return None;
    }
    Some((salt, nonce, ciphertext))
}

pub fn encrypt(payload: &str, password: &str) -> QrResult<String> {
    Cipher::default().encrypt(payload, password)
}

pub fn decrypt(token: &str, password: &str) -> QrResult<String> {
    Cipher::default().decrypt(token, password)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// Argon2 at production cost makes property tests crawl.
    fn fast_cipher() -> Cipher {
        Cipher::with_params(Params::new(64, 1, 1, Some(KEY_LEN)).unwrap())
    }

    #[test]
    fn default_cipher_round_trips() {
        let token = encrypt("WIFI:T:WPA;S:Home;P:pw;;", "hunter2").unwrap();
        assert_eq!(decrypt(&token, "hunter2").unwrap(), "WIFI:T:WPA;S:Home;P:pw;;");
    }

    #[test]
    fn key_derivation_failure_is_a_cipher_error() {
        let err = fast_cipher().derive_key("pw", b"short").unwrap_err();
        assert!(matches!(err, QrError::Cipher(ref m) if m.starts_with("key derivation")));
    }

    #[test]
    fn token_has_three_hex_parts() {
        let token = fast_cipher().encrypt("hello", "pw").unwrap();
        let parts: Vec<&str> = token.split(':').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].len(), SALT_LEN * 2);
        assert_eq!(parts[1].len(), NONCE_LEN * 2);
        assert_eq!(parts[2].len(), ("hello".len() + TAG_LEN) * 2);
    }

    #[test]
    fn empty_password_is_rejected() {
        assert!(matches!(
            fast_cipher().encrypt("hello", ""),
            Err(QrError::InvalidInput(_))
        ));
    }

    #[test]
    fn malformed_tokens_fail_generically() {
        let cipher = fast_cipher();
        let valid = cipher.encrypt("hello", "pw").unwrap();
        let truncated = &valid[..valid.len() - 2];
        let extra = format!("{valid}:00");
        for token in ["", "abc", "zz:zz:zz", "00:00:00", truncated, extra.as_str()] {
            assert!(
                matches!(cipher.decrypt(token, "pw"), Err(QrError::Decryption)),
                "token {token:?}"
            );
        }
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let cipher = fast_cipher();
        let token = cipher.encrypt("pay me", "pw").unwrap();
        let mut bytes = token.into_bytes();
        let last = bytes.len() - 1;
        bytes[last] = if bytes[last] == b'0' { b'1' } else { b'0' };
        let tampered = String::from_utf8(bytes).unwrap();
        assert!(matches!(
            cipher.decrypt(&tampered, "pw"),
            Err(QrError::Decryption)
        ));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn decrypt_inverts_encrypt(payload in "\\PC{1,200}", password in "\\PC{1,32}") {
            let cipher = fast_cipher();
            let token = cipher.encrypt(&payload, &password).unwrap();
            prop_assert_eq!(cipher.decrypt(&token, &password).unwrap(), payload);
        }

        #[test]
        fn wrong_password_never_decrypts(
            payload in "\\PC{1,200}",
            k1 in "\\PC{1,32}",
            k2 in "\\PC{1,32}",
        ) {
            prop_assume!(k1 != k2);
            let cipher = fast_cipher();
            let token = cipher.encrypt(&payload, &k1).unwrap();
            prop_assert!(matches!(cipher.decrypt(&token, &k2), Err(QrError::Decryption)));
        }

        #[test]
        fn fresh_token_every_call(payload in "\\PC{1,64}", password in "\\PC{1,16}") {
            let cipher = fast_cipher();
            let a = cipher.encrypt(&payload, &password).unwrap();
            let b = cipher.encrypt(&payload, &password).unwrap();
            prop_assert_ne!(a, b);
        }
    }
}
