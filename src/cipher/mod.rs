//! Cipher channel: single-use hybrid encryption for broker exchanges.
//!
//! The broker holds an RSA private key; every satellite holds only the
//! public half. Per exchange:
//!
//! 1. The satellite generates a random 256-bit key, seals it under the
//!    broker's public key and sends it with its task request.
//! 2. The broker opens the key, encrypts the subtask with it and keeps the
//!    key against the subtask id.
//! 3. The satellite encrypts its result with the same key; the broker looks
//!    the key up by id, decrypts and discards it.
//!
//! The symmetric layer is AES-256-CFB under a fixed all-zero IV with an
//! 8-byte keyed checksum of the plaintext appended before encryption. Both
//! directions of one exchange reuse the same key and IV, which is a known
//! weakness of this wire format.

pub mod keys;

pub use keys::{BrokerKey, SatelliteKey};

use aes::Aes256;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use cfb_mode::cipher::{AsyncStreamCipher, KeyIvInit};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

use crate::error::CipherError;

/// AES-256 key length in bytes.
pub const KEY_LENGTH: usize = 32;

/// Length of the truncated checksum appended to every plaintext.
pub const CHECKSUM_LENGTH: usize = 8;

const ZERO_IV: [u8; 16] = [0; 16];

type Aes256CfbEnc = cfb_mode::Encryptor<Aes256>;
type Aes256CfbDec = cfb_mode::Decryptor<Aes256>;
type HmacSha256 = Hmac<Sha256>;

/// A per-exchange symmetric key.
#[derive(Clone, PartialEq, Eq)]
pub struct SymmetricKey([u8; KEY_LENGTH]);

impl SymmetricKey {
    /// Generate a fresh random key.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LENGTH];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Wrap raw key bytes, rejecting anything that is not exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CipherError> {
        let arr: [u8; KEY_LENGTH] = bytes
            .try_into()
            .map_err(|_| CipherError::InvalidKeyLength(bytes.len()))?;
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.0
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SymmetricKey([REDACTED])")
    }
}

fn checksum(key: &SymmetricKey, data: &[u8]) -> Result<HmacSha256, CipherError> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key.as_bytes())
        .map_err(|_| CipherError::InvalidKeyLength(KEY_LENGTH))?;
    mac.update(data);
    Ok(mac)
}

/// Encrypt `plaintext` and return it base64-encoded.
pub fn encrypt(plaintext: &str, key: &SymmetricKey) -> Result<String, CipherError> {
    let tag = checksum(key, plaintext.as_bytes())?.finalize().into_bytes();

    let mut buf = Vec::with_capacity(plaintext.len() + CHECKSUM_LENGTH);
    buf.extend_from_slice(plaintext.as_bytes());
    buf.extend_from_slice(&tag[..CHECKSUM_LENGTH]);

    Aes256CfbEnc::new(&key.0.into(), &ZERO_IV.into()).encrypt(&mut buf);
    Ok(BASE64.encode(buf))
}

/// Decrypt base64 `content`, verifying the checksum.
///
/// Never returns altered plaintext: a short ciphertext or a checksum
/// mismatch yields [`CipherError::Validation`].
pub fn decrypt(content: &str, key: &SymmetricKey) -> Result<String, CipherError> {
    let mut buf = BASE64.decode(content)?;
    if buf.len() < CHECKSUM_LENGTH {
        return Err(CipherError::Validation);
    }

    Aes256CfbDec::new(&key.0.into(), &ZERO_IV.into()).decrypt(&mut buf);

    let (plain, tag) = buf.split_at(buf.len() - CHECKSUM_LENGTH);
    checksum(key, plain)?
        .verify_truncated_left(tag)
        .map_err(|_| CipherError::Validation)?;

    String::from_utf8(plain.to_vec()).map_err(|_| CipherError::Utf8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn roundtrip_unicode() {
        let key = SymmetricKey::generate();
        let plain = "魔理沙の…バカ";
        let encrypted = encrypt(plain, &key).unwrap();
        assert_eq!(decrypt(&encrypted, &key).unwrap(), plain);
    }

    #[test]
    fn roundtrip_empty_and_long() {
        let key = SymmetricKey::generate();
        for plain in [String::new(), "x".repeat(10_000)] {
            let encrypted = encrypt(&plain, &key).unwrap();
            assert_eq!(decrypt(&encrypted, &key).unwrap(), plain);
        }
    }

    #[test]
    fn encrypt_is_deterministic_for_same_key() {
        let key = SymmetricKey::generate();
        assert_eq!(encrypt("abc", &key).unwrap(), encrypt("abc", &key).unwrap());
    }

    #[test]
    fn wrong_key_is_rejected() {
        let encrypted = encrypt("payload", &SymmetricKey::generate()).unwrap();
        assert!(decrypt(&encrypted, &SymmetricKey::generate()).is_err());
    }

    #[test]
    fn truncated_and_doubled_ciphertexts_are_rejected() {
        let key = SymmetricKey::generate();
        let encrypted = encrypt("{\"data\":[\"marisa\",\"alice\"]}", &key).unwrap();

        for bad in [
            String::new(),
            encrypted[..8].to_string(),
            format!("{encrypted}{encrypted}"),
        ] {
            assert!(decrypt(&bad, &key).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn short_ciphertext_is_validation_error() {
        let key = SymmetricKey::generate();
        let short = BASE64.encode([1u8, 2, 3]);
        assert!(matches!(decrypt(&short, &key), Err(CipherError::Validation)));
    }

    #[test]
    fn random_single_bit_flips_are_rejected() {
        let key = SymmetricKey::generate();
        let encrypted = encrypt("魔理沙の…バカ", &key).unwrap();
        let raw = BASE64.decode(&encrypted).unwrap();
        let mut rng = rand::thread_rng();

        for _ in 0..500 {
            let mut corrupted = raw.clone();
            let idx = rng.gen_range(0..corrupted.len());
            corrupted[idx] ^= 1 << rng.gen_range(0..8);
            let result = decrypt(&BASE64.encode(&corrupted), &key);
            assert!(
                matches!(result, Err(CipherError::Validation)),
                "bit flip at byte {idx} was accepted"
            );
        }
    }

    #[test]
    fn key_length_is_enforced() {
        assert!(matches!(
            SymmetricKey::from_slice(&[0u8; 16]),
            Err(CipherError::InvalidKeyLength(16))
        ));
        assert!(SymmetricKey::from_slice(&[0u8; KEY_LENGTH]).is_ok());
    }

    #[test]
    fn debug_redacts_key() {
        let key = SymmetricKey::from_slice(&[7u8; KEY_LENGTH]).unwrap();
        assert_eq!(format!("{key:?}"), "SymmetricKey([REDACTED])");
    }
}
