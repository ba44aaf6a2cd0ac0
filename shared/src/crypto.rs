//! Credential sealing for stored exchange API keys.
//!
//! Payloads are AES-256-GCM encrypted with a key derived once from the
//! `CREDENTIAL_MASTER_KEY` environment secret, then base64 encoded as
//! `nonce || ciphertext`. The cipher is an explicit dependency of whatever
//! needs it; there is no process-global instance.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use pbkdf2::pbkdf2_hmac;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

const KDF_SALT: &[u8] = b"tradepulse.credential-vault.v1";
const KDF_ROUNDS: u32 = 100_000;
const NONCE_LEN: usize = 12;

/// Decrypted exchange API credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiCredentials {
    pub api_key: String,
    pub api_secret: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passphrase: Option<String>,
}

pub struct CredentialCipher {
    cipher: Aes256Gcm,
}

impl CredentialCipher {
    pub fn new(master_key: &str) -> Self {
        let mut key = [0u8; 32];
        pbkdf2_hmac::<Sha256>(master_key.as_bytes(), KDF_SALT, KDF_ROUNDS, &mut key);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
        Self { cipher }
    }

    /// Encrypt credentials into a base64 payload suitable for the
    /// `api_credentials.encrypted_payload` column.
    pub fn seal(&self, credentials: &ApiCredentials) -> Result<String> {
        let plaintext = serde_json::to_vec(credentials)?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_ref())
            .map_err(|_| anyhow!("credential encryption failed"))?;

        let mut payload = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        payload.extend_from_slice(&nonce);
        payload.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(payload))
    }

    /// Decrypt a stored payload. Any failure here is fatal for the owning
    /// subscription: a tampered or wrongly-keyed payload cannot be retried.
    pub fn open(&self, payload: &str) -> Result<ApiCredentials> {
        let raw = BASE64
            .decode(payload.trim())
            .context("credential payload is not valid base64")?;
        if raw.len() <= NONCE_LEN {
            return Err(anyhow!("credential payload too short"));
        }
        let (nonce, ciphertext) = raw.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| anyhow!("credential decryption failed"))?;
        let credentials = serde_json::from_slice(&plaintext)
            .context("decrypted credential payload is not valid JSON")?;
        Ok(credentials)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ApiCredentials {
        ApiCredentials {
            api_key: "k-123".to_string(),
            api_secret: "s-456".to_string(),
            passphrase: Some("p-789".to_string()),
        }
    }

    #[test]
    fn seal_and_open_round_trip() {
        let cipher = CredentialCipher::new("unit-test-master-key");
        let sealed = cipher.seal(&sample()).unwrap();
        let opened = cipher.open(&sealed).unwrap();
        assert_eq!(opened.api_key, "k-123");
        assert_eq!(opened.api_secret, "s-456");
        assert_eq!(opened.passphrase.as_deref(), Some("p-789"));
    }

    #[test]
    fn nonces_differ_between_seals() {
        let cipher = CredentialCipher::new("unit-test-master-key");
        let a = cipher.seal(&sample()).unwrap();
        let b = cipher.seal(&sample()).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_key_fails_to_open() {
        let sealed = CredentialCipher::new("key-one").seal(&sample()).unwrap();
        assert!(CredentialCipher::new("key-two").open(&sealed).is_err());
    }

    #[test]
    fn tampered_payload_fails_to_open() {
        let cipher = CredentialCipher::new("unit-test-master-key");
        let sealed = cipher.seal(&sample()).unwrap();
        let mut raw = BASE64.decode(sealed).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        assert!(cipher.open(&BASE64.encode(raw)).is_err());
    }
}
