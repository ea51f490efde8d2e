//! Credential sealing with AES-256-GCM
//!
//! Stored form: base64(nonce || ciphertext). The plaintext is a compact JSON
//! object; it only exists for the duration of a seal or unseal call.

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng},
};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};

use super::Credentials;
use crate::error::CredentialError;

/// 96-bit nonce for AES-256-GCM
const NONCE_SIZE: usize = 12;

/// Raw key material
pub type KeyBytes = [u8; 32];

#[derive(Serialize)]
struct SealedPayloadRef<'a> {
    u: &'a str,
    p: &'a str,
}

#[derive(Deserialize)]
struct SealedPayload {
    u: String,
    p: String,
}

/// Seals and unseals credentials with one key
pub struct CredentialCipher {
    cipher: Aes256Gcm,
}

impl CredentialCipher {
    pub fn new(key: &KeyBytes) -> Self {
        let key = Key::<Aes256Gcm>::from(*key);
        Self {
            cipher: Aes256Gcm::new(&key),
        }
    }

    /// Generate fresh random key material
    pub fn generate_key() -> KeyBytes {
        Aes256Gcm::generate_key(&mut OsRng).into()
    }

    pub fn seal(&self, credentials: &Credentials) -> Result<String, CredentialError> {
        let payload = serde_json::to_vec(&SealedPayloadRef {
            u: &credentials.username,
            p: credentials.password(),
        })
        .map_err(|e| CredentialError::Serialization(e.to_string()))?;

        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, payload.as_slice())
            .map_err(|_| CredentialError::Encryption)?;

        let mut combined = nonce.to_vec();
        combined.extend_from_slice(&ciphertext);

        Ok(STANDARD.encode(combined))
    }

    pub fn unseal(&self, sealed: &str) -> Result<Credentials, CredentialError> {
        let decoded = STANDARD
            .decode(sealed.trim())
            .map_err(|_| CredentialError::Decryption)?;

        if decoded.len() <= NONCE_SIZE {
            return Err(CredentialError::Decryption);
        }

        let nonce_bytes: [u8; NONCE_SIZE] = decoded[..NONCE_SIZE]
            .try_into()
            .map_err(|_| CredentialError::Decryption)?;
        let nonce = Nonce::from(nonce_bytes);

        let plaintext = self
            .cipher
            .decrypt(&nonce, &decoded[NONCE_SIZE..])
            .map_err(|_| CredentialError::Decryption)?;

        let payload: SealedPayload =
            serde_json::from_slice(&plaintext).map_err(|_| CredentialError::Decryption)?;

        Ok(Credentials::new(payload.u, payload.p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_unseal() {
        let cipher = CredentialCipher::new(&CredentialCipher::generate_key());
        let creds = Credentials::new("octocat", "ghp_secret");

        let sealed = cipher.seal(&creds).unwrap();
        assert!(!sealed.contains("ghp_secret"));
        assert_eq!(cipher.unseal(&sealed).unwrap(), creds);
    }

    #[test]
    fn test_nonce_is_fresh() {
        let cipher = CredentialCipher::new(&CredentialCipher::generate_key());
        let creds = Credentials::new("a", "b");
        assert_ne!(cipher.seal(&creds).unwrap(), cipher.seal(&creds).unwrap());
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = CredentialCipher::new(&CredentialCipher::generate_key())
            .seal(&Credentials::new("a", "b"))
            .unwrap();
        let other = CredentialCipher::new(&CredentialCipher::generate_key());
        assert!(matches!(other.unseal(&sealed), Err(CredentialError::Decryption)));
    }

    #[test]
    fn test_tampered_or_garbage_fails() {
        let cipher = CredentialCipher::new(&CredentialCipher::generate_key());
        let sealed = cipher.seal(&Credentials::new("a", "b")).unwrap();

        let mut bytes = STANDARD.decode(&sealed).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        assert!(cipher.unseal(&STANDARD.encode(bytes)).is_err());

        assert!(cipher.unseal("not base64 !!").is_err());
        assert!(cipher.unseal(&STANDARD.encode([0u8; 8])).is_err());
    }
}
