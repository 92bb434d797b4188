//! AES-256-GCM encryption for exchange credentials.
//!
//! Key material comes from `MASTER_KEY` (64 hex chars = 32 bytes). Encrypted
//! payloads decrypt to a UTF-8 string `"<api-key>:<secret>"`; the split is on
//! the first colon so secrets may contain colons themselves.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use anyhow::{anyhow, bail, Context, Result};
use rand::RngCore;

const NONCE_LEN: usize = 12;

pub struct EncryptionService {
    cipher: Aes256Gcm,
}

impl EncryptionService {
    /// Build from a 64-hex-char master key.
    pub fn new(master_key_hex: &str) -> Result<Self> {
        let key_bytes =
            hex::decode(master_key_hex).context("MASTER_KEY must be a valid hex string")?;
        if key_bytes.len() != 32 {
            bail!("MASTER_KEY must be 32 bytes (64 hex chars)");
        }
        let key = Key::<Aes256Gcm>::from_slice(&key_bytes);
        Ok(Self {
            cipher: Aes256Gcm::new(key),
        })
    }

    /// Build from the `MASTER_KEY` environment variable.
    pub fn from_env() -> Result<Self> {
        let key_hex =
            std::env::var("MASTER_KEY").context("MASTER_KEY environment variable is required")?;
        Self::new(&key_hex)
    }

    /// Encrypt `"<api-key>:<secret>"` with a fresh random 12-byte nonce.
    /// Returns (ciphertext, nonce).
    pub fn encrypt(&self, plaintext: &str) -> Result<(Vec<u8>, Vec<u8>)> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| anyhow!("encryption failed"))?;
        Ok((ciphertext, nonce_bytes.to_vec()))
    }

    /// Decrypt a credential payload into `(api_key, secret_key)`.
    pub fn decrypt(&self, ciphertext: &[u8], nonce: &[u8]) -> Result<(String, String)> {
        if nonce.len() != NONCE_LEN {
            bail!("nonce must be {NONCE_LEN} bytes, got {}", nonce.len());
        }
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| anyhow!("decryption failed: bad key or corrupted payload"))?;
        let text = String::from_utf8(plaintext).context("decrypted payload is not UTF-8")?;

        let Some((api_key, secret_key)) = text.split_once(':') else {
            bail!("invalid key payload format: expected '<api-key>:<secret>'");
        };
        Ok((api_key.to_string(), secret_key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_KEY: &str = "00112233445566778899aabbccddeeff00112233445566778899aabbccddeeff";

    #[test]
    fn encrypt_decrypt_round_trip() {
        let service = EncryptionService::new(TEST_KEY).unwrap();
        let (ciphertext, nonce) = service.encrypt("my-api-key:my-secret").unwrap();
        let (api_key, secret) = service.decrypt(&ciphertext, &nonce).unwrap();
        assert_eq!(api_key, "my-api-key");
        assert_eq!(secret, "my-secret");
    }

    #[test]
    fn secret_may_contain_colons() {
        let service = EncryptionService::new(TEST_KEY).unwrap();
        let (ciphertext, nonce) = service.encrypt("key:sec:ret:parts").unwrap();
        let (api_key, secret) = service.decrypt(&ciphertext, &nonce).unwrap();
        assert_eq!(api_key, "key");
        assert_eq!(secret, "sec:ret:parts");
    }

    #[test]
    fn rejects_short_master_key() {
        assert!(EncryptionService::new("deadbeef").is_err());
    }

    #[test]
    fn rejects_non_hex_master_key() {
        assert!(EncryptionService::new("zz").is_err());
    }

    #[test]
    fn rejects_tampered_ciphertext() {
        let service = EncryptionService::new(TEST_KEY).unwrap();
        let (mut ciphertext, nonce) = service.encrypt("a:b").unwrap();
        ciphertext[0] ^= 0xff;
        assert!(service.decrypt(&ciphertext, &nonce).is_err());
    }

    #[test]
    fn rejects_payload_without_separator() {
        let service = EncryptionService::new(TEST_KEY).unwrap();
        let (ciphertext, nonce) = service.encrypt("no-separator").unwrap();
        let err = service.decrypt(&ciphertext, &nonce).unwrap_err();
        assert!(err.to_string().contains("payload format"));
    }

    #[test]
    fn rejects_wrong_nonce_length() {
        let service = EncryptionService::new(TEST_KEY).unwrap();
        let (ciphertext, _) = service.encrypt("a:b").unwrap();
        assert!(service.decrypt(&ciphertext, &[0u8; 8]).is_err());
    }
}
