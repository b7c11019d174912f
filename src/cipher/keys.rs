//! RSA key halves used to exchange per-request symmetric keys.

use std::path::Path;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};

use super::SymmetricKey;
use crate::error::{CipherError, ConfigError};

/// The broker's long-lived private key.
pub struct BrokerKey {
    private: RsaPrivateKey,
}

impl BrokerKey {
    pub fn new(private: RsaPrivateKey) -> Self {
        Self { private }
    }

    /// Parse a PEM private key (PKCS#1 `RSA PRIVATE KEY` or PKCS#8 `PRIVATE KEY`).
    pub fn from_pem(pem: &str) -> Result<Self, CipherError> {
        let private = RsaPrivateKey::from_pkcs1_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs8_pem(pem))
            .map_err(|e| CipherError::KeyFormat(e.to_string()))?;
        Ok(Self { private })
    }

    /// Read and parse the key file. Failure here is fatal at start-up.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let pem = read_pem(path)?;
        Self::from_pem(&pem).map_err(|e| ConfigError::KeyInvalid {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    pub fn public_key(&self) -> RsaPublicKey {
        self.private.to_public_key()
    }

    /// Recover the symmetric key a satellite sealed with [`SatelliteKey::seal`].
    pub fn open(&self, sealed: &str) -> Result<SymmetricKey, CipherError> {
        let raw = BASE64.decode(sealed)?;
        let key = self.private.decrypt(Pkcs1v15Encrypt, &raw)?;
        SymmetricKey::from_slice(&key)
    }
}

impl std::fmt::Debug for BrokerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerKey").finish_non_exhaustive()
    }
}

/// The public half distributed to satellites.
#[derive(Debug, Clone)]
pub struct SatelliteKey {
    public: RsaPublicKey,
}

impl SatelliteKey {
    pub fn new(public: RsaPublicKey) -> Self {
        Self { public }
    }

    /// Parse a PEM public key (SPKI `PUBLIC KEY` or PKCS#1 `RSA PUBLIC KEY`).
    pub fn from_pem(pem: &str) -> Result<Self, CipherError> {
        let public = RsaPublicKey::from_public_key_pem(pem)
            .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
            .map_err(|e| CipherError::KeyFormat(e.to_string()))?;
        Ok(Self { public })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let pem = read_pem(path)?;
        Self::from_pem(&pem).map_err(|e| ConfigError::KeyInvalid {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    /// Generate a fresh symmetric key and seal it for the broker.
    ///
    /// Returns the key to keep locally and its base64 sealed form to send.
    pub fn seal(&self) -> Result<(SymmetricKey, String), CipherError> {
        let key = SymmetricKey::generate();
        let sealed = self
            .public
            .encrypt(&mut rand::thread_rng(), Pkcs1v15Encrypt, key.as_bytes())?;
        Ok((key, BASE64.encode(sealed)))
    }
}

fn read_pem(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::KeyUnreadable {
        path: path.display().to_string(),
        source,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const PRIVATE_PEM: &str = include_str!("../../tests/fixtures/broker_private.pem");
    pub(crate) const PUBLIC_PEM: &str = include_str!("../../tests/fixtures/broker_public.pem");

    #[test]
    fn seal_then_open_recovers_key() {
        let broker = BrokerKey::from_pem(PRIVATE_PEM).unwrap();
        let satellite = SatelliteKey::from_pem(PUBLIC_PEM).unwrap();

        let (key, sealed) = satellite.seal().unwrap();
        assert_eq!(broker.open(&sealed).unwrap(), key);
    }

    #[test]
    fn derived_public_key_matches_fixture() {
        let broker = BrokerKey::from_pem(PRIVATE_PEM).unwrap();
        let satellite = SatelliteKey::from_pem(PUBLIC_PEM).unwrap();
        assert_eq!(broker.public_key(), satellite.public);
    }

    #[test]
    fn sealed_key_then_symmetric_exchange() {
        let broker = BrokerKey::from_pem(PRIVATE_PEM).unwrap();
        let satellite = SatelliteKey::new(broker.public_key());

        let (orig, sealed) = satellite.seal().unwrap();
        let server_side = broker.open(&sealed).unwrap();
        let encrypted = super::super::encrypt("魔理沙の…バカ", &server_side).unwrap();
        assert_eq!(super::super::decrypt(&encrypted, &orig).unwrap(), "魔理沙の…バカ");
    }

    #[test]
    fn garbage_seal_is_rejected() {
        let broker = BrokerKey::from_pem(PRIVATE_PEM).unwrap();
        assert!(broker.open("not base64!").is_err());
        assert!(broker.open(&BASE64.encode([0u8; 256])).is_err());
    }

    #[test]
    fn load_missing_file_is_config_error() {
        let err = BrokerKey::load("/nonexistent/private.pem").unwrap_err();
        assert!(matches!(err, ConfigError::KeyUnreadable { .. }));
    }

    #[test]
    fn load_non_key_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bogus.pem");
        std::fs::write(&path, "hello").unwrap();
        assert!(matches!(
            SatelliteKey::load(&path),
            Err(ConfigError::KeyInvalid { .. })
        ));
    }
}
