//! XChaCha20-Poly1305 authenticated encryption with password-derived keys.

use crate::error::{ProtocolError, Result};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

/// Length of the random nonce stored in front of every ciphertext
pub const NONCE_LEN: usize = 24;

pub struct Crypto {
    cipher: XChaCha20Poly1305,
}

impl Crypto {
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: XChaCha20Poly1305::new(Key::from_slice(key)),
        }
    }

    /// Derive the 32-byte key from a shared password
    pub fn from_password(password: &str) -> Self {
        let mut key: [u8; 32] = Sha256::digest(password.as_bytes()).into();
        let crypto = Self::new(&key);
        key.zeroize();
        crypto
    }

    /// Generate a fresh random nonce
    pub fn generate_nonce() -> Result<[u8; NONCE_LEN]> {
        let mut nonce = [0u8; NONCE_LEN];
        getrandom::fill(&mut nonce).map_err(|_| ProtocolError::EncryptionFailure)?;
        Ok(nonce)
    }

    pub fn encrypt(&self, data: &[u8], nonce: &[u8; NONCE_LEN]) -> Result<Vec<u8>> {
        self.cipher
            .encrypt(XNonce::from_slice(nonce), data)
            .map_err(|_| ProtocolError::EncryptionFailure)
    }

    pub fn decrypt(&self, data: &[u8], nonce: &[u8; NONCE_LEN]) -> Result<Vec<u8>> {
        self.cipher
            .decrypt(XNonce::from_slice(nonce), data)
            .map_err(|_| ProtocolError::DecryptionFailure)
    }

    /// Encrypt `data` with a fresh nonce, appending `nonce || ciphertext` to `out`
    pub fn seal_into(&self, data: &[u8], out: &mut Vec<u8>) -> Result<()> {
        let mut nonce = Self::generate_nonce()?;
        let ciphertext = self.encrypt(data, &nonce)?;
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        nonce.zeroize();
        Ok(())
    }

    /// Reverse of [`Crypto::seal_into`]
    pub fn open_into(&self, data: &[u8], out: &mut Vec<u8>) -> Result<()> {
        if data.len() < NONCE_LEN {
            return Err(ProtocolError::DecryptionFailure);
        }
        let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(nonce_bytes);
        let mut plaintext = self.decrypt(ciphertext, &nonce)?;
        out.extend_from_slice(&plaintext);
        plaintext.zeroize();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_seal_open_roundtrip() {
        let crypto = Crypto::from_password("correct horse");
        let mut sealed = Vec::new();
        crypto.seal_into(b"payload", &mut sealed).unwrap();
        assert_eq!(sealed.len(), NONCE_LEN + 7 + 16);

        let mut opened = Vec::new();
        crypto.open_into(&sealed, &mut opened).unwrap();
        assert_eq!(opened, b"payload");
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_wrong_password_fails() {
        let mut sealed = Vec::new();
        Crypto::from_password("a").seal_into(b"secret", &mut sealed).unwrap();

        let mut out = Vec::new();
        let result = Crypto::from_password("b").open_into(&sealed, &mut out);
        assert!(matches!(result, Err(ProtocolError::DecryptionFailure)));
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_nonces_are_unique() {
        let a = Crypto::generate_nonce().unwrap();
        let b = Crypto::generate_nonce().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_short_input_rejected() {
        let mut out = Vec::new();
        let result = Crypto::from_password("a").open_into(&[0u8; 10], &mut out);
        assert!(result.is_err());
    }
}
