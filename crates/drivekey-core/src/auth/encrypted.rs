//! Passphrase-encrypted token file for hosts without a usable keychain.
//!
//! The file is a JSON envelope holding an Argon2id salt, an XChaCha20-Poly1305
//! nonce and the sealed JSON map of entries. The key is derived once when the
//! store is opened; every write re-seals the whole map under a fresh nonce.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use argon2::Argon2;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::credentials::{StorageError, TokenStorage};

const ENVELOPE_VERSION: u32 = 1;
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 24;
const KEY_LEN: usize = 32;

#[derive(Serialize, Deserialize)]
struct Envelope {
    version: u32,
    salt: Vec<u8>,
    nonce: Vec<u8>,
    ciphertext: Vec<u8>,
}

pub struct EncryptedFileStorage {
    path: PathBuf,
    salt: [u8; SALT_LEN],
    cipher: XChaCha20Poly1305,
    entries: Mutex<HashMap<String, String>>,
}

impl EncryptedFileStorage {
    /// Open (or prepare to create) the token file at `path`.
    ///
    /// An existing file is decrypted immediately so a wrong passphrase fails here
    /// rather than on first read.
    pub fn open(path: impl Into<PathBuf>, passphrase: &str) -> Result<Self, StorageError> {
        let path = path.into();

        if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            let envelope: Envelope = serde_json::from_str(&contents)?;
            if envelope.version != ENVELOPE_VERSION {
                return Err(StorageError::Crypto(format!(
                    "unsupported token file version {}",
                    envelope.version
                )));
            }
            let salt: [u8; SALT_LEN] = envelope
                .salt
                .as_slice()
                .try_into()
                .map_err(|_| StorageError::Crypto("bad salt length".to_string()))?;
            let cipher = derive_cipher(passphrase, &salt)?;
            let entries = unseal(&cipher, &envelope)?;
            debug!(path = %path.display(), entries = entries.len(), "Opened token file");
            return Ok(Self {
                path,
                salt,
                cipher,
                entries: Mutex::new(entries),
            });
        }

        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        let cipher = derive_cipher(passphrase, &salt)?;
        Ok(Self {
            path,
            salt,
            cipher,
            entries: Mutex::new(HashMap::new()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &HashMap<String, String>) -> Result<(), StorageError> {
        let plaintext = serde_json::to_vec(entries)?;
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let ciphertext = self
            .cipher
            .encrypt(XNonce::from_slice(&nonce), plaintext.as_slice())
            .map_err(|_| StorageError::Crypto("encryption failed".to_string()))?;

        let envelope = Envelope {
            version: ENVELOPE_VERSION,
            salt: self.salt.to_vec(),
            nonce: nonce.to_vec(),
            ciphertext,
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // Write-then-rename so a crash never leaves a half-written envelope.
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec(&envelope)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn entries(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>, StorageError> {
        self.entries
            .lock()
            .map_err(|_| StorageError::Unavailable("token file lock poisoned".to_string()))
    }
}

fn derive_cipher(passphrase: &str, salt: &[u8]) -> Result<XChaCha20Poly1305, StorageError> {
    let mut key = [0u8; KEY_LEN];
    Argon2::default()
        .hash_password_into(passphrase.as_bytes(), salt, &mut key)
        .map_err(|e| StorageError::Crypto(format!("key derivation failed: {}", e)))?;
    XChaCha20Poly1305::new_from_slice(&key)
        .map_err(|_| StorageError::Crypto("invalid key length".to_string()))
}

fn unseal(
    cipher: &XChaCha20Poly1305,
    envelope: &Envelope,
) -> Result<HashMap<String, String>, StorageError> {
    if envelope.nonce.len() != NONCE_LEN {
        return Err(StorageError::Crypto("bad nonce length".to_string()));
    }
    let plaintext = cipher
        .decrypt(XNonce::from_slice(&envelope.nonce), envelope.ciphertext.as_slice())
        .map_err(|_| StorageError::Crypto("wrong passphrase or corrupted token file".to_string()))?;
    Ok(serde_json::from_slice(&plaintext)?)
}

impl TokenStorage for EncryptedFileStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.entries()?;
        entries.insert(key.to_string(), value.to_string());
        self.persist(&entries)
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self.entries()?;
        if entries.remove(key).is_some() {
            self.persist(&entries)?;
        }
        Ok(())
    }
}
