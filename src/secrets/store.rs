//! The in-memory encrypted credential store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use aes_gcm_siv::aead::{Aead, KeyInit};
use aes_gcm_siv::{Aes256GcmSiv, Nonce};
use parking_lot::Mutex;
use rand::RngCore;
use scrypt::{scrypt, Params as ScryptParams};
use zeroize::Zeroize;

use crate::error::{ExecError, ExecResult};

const KEY_LEN: usize = 32;
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;

/// Opaque handle identifying one entry in a [`SecretStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SecretId(u64);

struct Entry {
    nonce: [u8; NONCE_LEN],
    ciphertext: Vec<u8>,
}

/// Holds secrets encrypted-at-rest in process memory under a key derived
/// once, from OS randomness, when the store is created.
///
/// Plaintext is never retained after [`SecretStore::insert`] returns, and
/// the derived key (plus every ciphertext) is zeroed on [`SecretStore::dispose`]
/// or when the store is dropped. Every operation after disposal returns
/// [`ExecError::Disposed`].
pub struct SecretStore {
    key: Mutex<Option<[u8; KEY_LEN]>>,
    entries: Mutex<HashMap<u64, Entry>>,
    next_id: std::sync::atomic::AtomicU64,
    disposed: AtomicBool,
}

impl SecretStore {
    /// Create a new store with a fresh, randomly derived master key.
    pub fn new() -> ExecResult<Self> {
        let mut seed = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut seed);
        let mut salt = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);

        let params = ScryptParams::recommended();
        let mut key = [0u8; KEY_LEN];
        scrypt(&seed, &salt, &params, &mut key)
            .map_err(|e| ExecError::config(format!("failed to derive secret store key: {e}")))?;
        seed.zeroize();

        Ok(Self {
            key: Mutex::new(Some(key)),
            entries: Mutex::new(HashMap::new()),
            next_id: std::sync::atomic::AtomicU64::new(1),
            disposed: AtomicBool::new(false),
        })
    }

    fn require_key(&self) -> ExecResult<[u8; KEY_LEN]> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(ExecError::disposed("secret store has been disposed"));
        }
        self.key
            .lock()
            .as_ref()
            .copied()
            .ok_or_else(|| ExecError::disposed("secret store has been disposed"))
    }

    /// Encrypt `plaintext` and store it, returning a handle to retrieve it
    /// later. `plaintext` is not retained by this call.
    pub fn insert(&self, mut plaintext: Vec<u8>) -> ExecResult<SecretId> {
        let key = self.require_key()?;
        let cipher = Aes256GcmSiv::new_from_slice(&key)
            .map_err(|_| ExecError::config("invalid secret store key length"))?;
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_ref())
            .map_err(|_| ExecError::config("failed to encrypt secret"))?;
        plaintext.zeroize();

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.entries.lock().insert(
            id,
            Entry {
                nonce: nonce_bytes,
                ciphertext,
            },
        );
        Ok(SecretId(id))
    }

    /// Convenience wrapper over [`SecretStore::insert`] for UTF-8 secrets.
    pub fn insert_str(&self, plaintext: impl Into<String>) -> ExecResult<SecretId> {
        self.insert(plaintext.into().into_bytes())
    }

    /// Decrypt and return the plaintext for `id`. The caller is responsible
    /// for zeroizing the returned buffer once done with it.
    pub fn reveal(&self, id: SecretId) -> ExecResult<Vec<u8>> {
        let key = self.require_key()?;
        let entries = self.entries.lock();
        let entry = entries
            .get(&id.0)
            .ok_or_else(|| ExecError::config("unknown secret id"))?;
        let cipher = Aes256GcmSiv::new_from_slice(&key)
            .map_err(|_| ExecError::config("invalid secret store key length"))?;
        cipher
            .decrypt(Nonce::from_slice(&entry.nonce), entry.ciphertext.as_ref())
            .map_err(|_| ExecError::config("failed to decrypt secret"))
    }

    /// Decrypt and return the plaintext for `id` as a UTF-8 string.
    pub fn reveal_str(&self, id: SecretId) -> ExecResult<String> {
        let bytes = self.reveal(id)?;
        String::from_utf8(bytes).map_err(|e| ExecError::serialization(e.to_string()))
    }

    /// Remove and zero one entry's ciphertext without disposing the whole
    /// store.
    pub fn remove(&self, id: SecretId) {
        if let Some(mut entry) = self.entries.lock().remove(&id.0) {
            entry.ciphertext.zeroize();
        }
    }

    /// Zero the master key and every remaining ciphertext. After this call
    /// every other method returns [`ExecError::Disposed`].
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
        if let Some(mut key) = self.key.lock().take() {
            key.zeroize();
        }
        let mut entries = self.entries.lock();
        for (_, mut entry) in entries.drain() {
            entry.ciphertext.zeroize();
        }
    }

    /// Number of entries currently held (test/introspection helper).
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the store currently holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SecretStore {
    fn default() -> Self {
        Self::new().expect("secret store key derivation should not fail")
    }
}

impl Drop for SecretStore {
    fn drop(&mut self) {
        self.dispose();
    }
}
