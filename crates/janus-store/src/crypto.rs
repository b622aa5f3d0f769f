//! Embedding sealing: AES-256-GCM with a per-record random nonce.
//!
//! Sealed blob layout: 12-byte nonce followed by ciphertext + tag.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use std::path::Path;
use thiserror::Error;

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("key file error: {0}")]
    KeyFile(std::io::Error),
    #[error("key file has wrong length: expected {KEY_LEN} bytes, got {0}")]
    BadKeyLength(usize),
    #[error("encryption failed")]
    SealFailed,
    #[error("decryption failed (wrong key or corrupt record)")]
    OpenFailed,
    #[error("sealed blob too short")]
    TooShort,
}

/// Seals and opens embedding blobs for at-rest storage.
pub struct EmbeddingSealer {
    cipher: Aes256Gcm,
}

impl EmbeddingSealer {
    pub fn new(key: &[u8; KEY_LEN]) -> Self {
        let key = Key::<Aes256Gcm>::from_slice(key);
        Self { cipher: Aes256Gcm::new(key) }
    }

    /// Load the sealing key from `path`, generating it on first run.
    /// The key file is created with owner-only permissions.
    pub fn load_or_create(path: &Path) -> Result<Self, CryptoError> {
        if path.exists() {
            let bytes = std::fs::read(path).map_err(CryptoError::KeyFile)?;
            let key: [u8; KEY_LEN] =
                bytes.as_slice().try_into().map_err(|_| CryptoError::BadKeyLength(bytes.len()))?;
            return Ok(Self::new(&key));
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(CryptoError::KeyFile)?;
        }

        let mut key = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);

        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(path)
            .map_err(CryptoError::KeyFile)?;
        file.write_all(&key).map_err(CryptoError::KeyFile)?;

        tracing::info!(path = %path.display(), "generated new gallery sealing key");
        Ok(Self::new(&key))
    }

    /// Seal a plaintext blob. Output: nonce || ciphertext.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| CryptoError::SealFailed)?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Open a sealed blob produced by [`seal`](Self::seal).
    pub fn open(&self, blob: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if blob.len() < NONCE_LEN {
            return Err(CryptoError::TooShort);
        }
        let (nonce, ciphertext) = blob.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::OpenFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sealer() -> EmbeddingSealer {
        EmbeddingSealer::new(&[7u8; KEY_LEN])
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let s = sealer();
        let blob = s.seal(b"embedding bytes").unwrap();
        assert_ne!(&blob[NONCE_LEN..], b"embedding bytes".as_slice());
        assert_eq!(s.open(&blob).unwrap(), b"embedding bytes");
    }

    #[test]
    fn test_nonces_differ_per_seal() {
        let s = sealer();
        let a = s.seal(b"same").unwrap();
        let b = s.seal(b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_tampered_blob_fails_open() {
        let s = sealer();
        let mut blob = s.seal(b"payload").unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0x01;
        assert!(matches!(s.open(&blob), Err(CryptoError::OpenFailed)));
    }

    #[test]
    fn test_wrong_key_fails_open() {
        let blob = sealer().seal(b"payload").unwrap();
        let other = EmbeddingSealer::new(&[8u8; KEY_LEN]);
        assert!(matches!(other.open(&blob), Err(CryptoError::OpenFailed)));
    }

    #[test]
    fn test_short_blob_rejected() {
        assert!(matches!(sealer().open(&[1, 2, 3]), Err(CryptoError::TooShort)));
    }

    #[test]
    fn test_load_or_create_persists_key() {
        let path = std::env::temp_dir()
            .join(format!("janus-key-test-{}", std::process::id()));
        let _ = std::fs::remove_file(&path);

        let first = EmbeddingSealer::load_or_create(&path).unwrap();
        let blob = first.seal(b"stable").unwrap();

        // A reload must yield the same key and open the earlier blob.
        let second = EmbeddingSealer::load_or_create(&path).unwrap();
        assert_eq!(second.open(&blob).unwrap(), b"stable");

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_truncated_key_file_rejected() {
        let path = std::env::temp_dir()
            .join(format!("janus-shortkey-test-{}", std::process::id()));
        std::fs::write(&path, [0u8; 5]).unwrap();
        assert!(matches!(
            EmbeddingSealer::load_or_create(&path),
            Err(CryptoError::BadKeyLength(5))
        ));
        std::fs::remove_file(&path).unwrap();
    }
}
