use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Nonce};
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;

/// AES-256-GCM sealing of signing-identity passwords at rest.
pub struct CredentialCipher {
    cipher: Aes256Gcm,
}

impl CredentialCipher {
    /// Create from a base64-encoded 32-byte key.
    pub fn new(key_base64: &str) -> Result<Self, EncryptionError> {
        let key_bytes = STANDARD
            .decode(key_base64)
            .map_err(|_| EncryptionError::InvalidKey)?;

        if key_bytes.len() != 32 {
            return Err(EncryptionError::InvalidKey);
        }

        let cipher =
            Aes256Gcm::new_from_slice(&key_bytes).map_err(|_| EncryptionError::InvalidKey)?;

        Ok(Self { cipher })
    }

    /// Seal a secret, returning base64 of nonce (12 bytes) followed by ciphertext.
    pub fn seal(&self, secret: &str) -> Result<String, EncryptionError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, secret.as_bytes())
            .map_err(|_| EncryptionError::EncryptFailed)?;

        let mut output = nonce.to_vec();
        output.extend(ciphertext);
        Ok(STANDARD.encode(output))
    }

    /// Open a value produced by [`CredentialCipher::seal`].
    pub fn open(&self, sealed: &str) -> Result<String, EncryptionError> {
        let data = STANDARD
            .decode(sealed)
            .map_err(|_| EncryptionError::DecryptFailed)?;
        if data.len() < 12 {
            return Err(EncryptionError::DecryptFailed);
        }

        let (nonce_bytes, ciphertext) = data.split_at(12);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| EncryptionError::DecryptFailed)?;

        String::from_utf8(plaintext).map_err(|_| EncryptionError::DecryptFailed)
    }
}

/// Fresh random secret suitable for keystore and key passwords.
///
/// 32 bytes from the OS RNG, URL-safe base64 without padding (43 chars), so
/// the value never needs quoting on a command line or in an env var.
pub fn random_secret() -> String {
    let bytes = Aes256Gcm::generate_key(&mut OsRng);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[derive(Debug, thiserror::Error)]
pub enum EncryptionError {
    #[error("Invalid credential key (must be 32 bytes, base64-encoded)")]
    InvalidKey,

    #[error("Encryption failed")]
    EncryptFailed,

    #[error("Decryption failed")]
    DecryptFailed,
}
