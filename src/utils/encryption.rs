use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm,
    Nonce,
};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use rand::Rng;
use thiserror::Error;

const NONCE_LEN: usize = 12;

#[derive(Error, Debug)]
pub enum EncryptionError {
    #[error("Failed to decode key: {0}")]
    KeyDecodeError(String),
    #[error("Failed to create cipher: {0}")]
    CipherError(String),
    #[error("Encryption failed: {0}")]
    EncryptionError(String),
    #[error("Decryption failed: {0}")]
    DecryptionError(String),
    #[error("Invalid UTF-8: {0}")]
    Utf8Error(String),
    #[error("Invalid encrypted data")]
    InvalidData,
}

/// AES-256-GCM cipher used to keep OAuth tokens encrypted at rest.
///
/// Ciphertexts are `base64(nonce || ciphertext)` with a fresh random nonce
/// per call, so encrypting the same token twice yields different strings.
#[derive(Clone)]
pub struct TokenCipher {
    cipher: Aes256Gcm,
}

impl TokenCipher {
    /// Builds the cipher from a base64 encoded 32 byte key (`ENCRYPTION_KEY`).
    pub fn from_base64_key(encoded: &str) -> Result<Self, EncryptionError> {
        let key = BASE64.decode(encoded.trim())
            .map_err(|e| EncryptionError::KeyDecodeError(e.to_string()))?;

        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| EncryptionError::CipherError(e.to_string()))?;

        Ok(Self { cipher })
    }

    pub fn encrypt(&self, value: &str) -> Result<String, EncryptionError> {
        let mut rng = rand::thread_rng();
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rng.fill(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self.cipher
            .encrypt(nonce, value.as_bytes())
            .map_err(|e| EncryptionError::EncryptionError(e.to_string()))?;

        let mut combined = nonce_bytes.to_vec();
        combined.extend(ciphertext);

        Ok(BASE64.encode(combined))
    }

    pub fn decrypt(&self, encrypted: &str) -> Result<String, EncryptionError> {
        let encrypted_data = BASE64.decode(encrypted)
            .map_err(|e| EncryptionError::KeyDecodeError(e.to_string()))?;

        if encrypted_data.len() < NONCE_LEN {
            return Err(EncryptionError::InvalidData);
        }

        let (nonce_bytes, ciphertext) = encrypted_data.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self.cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| EncryptionError::DecryptionError(e.to_string()))?;

        String::from_utf8(plaintext)
            .map_err(|e| EncryptionError::Utf8Error(e.to_string()))
    }
}

impl std::fmt::Debug for TokenCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TokenCipher(..)")
    }
}
