//! Identity Key Store
//!
//! Owns the Ed25519 keypairs of the local device's users. A user is addressed
//! by a local account label ("alice", "driver-1"); the protocol-level identity
//! is the hex-encoded public key returned by [`IdentityKeyStore::generate`].
//!
//! # Lifecycle
//!
//! - `generate` creates a key on first registration and is idempotent
//!   afterwards. Regenerating would orphan every event the user already signed.
//! - `reset` is the only rotation path and is logged as a warning.
//! - With a storage collaborator attached, keys are persisted on creation and
//!   loaded lazily on first use.

use ed25519_dalek::{Signer, SigningKey};
use rand::rngs::OsRng;
use rand::RngCore;
use ridemesh_core::storage::{get_json, put_json};
use ridemesh_core::{current_timestamp_ms, KeyValueStore};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tracing::{debug, info, warn};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::verify::verify_signature;

/// Errors that can occur in key store operations.
#[derive(Debug, Error)]
pub enum KeyStoreError {
    #[error("Key not found for account: {account}")]
    KeyNotFound { account: String },

    #[error("Invalid key material: {reason}")]
    InvalidKey { reason: String },

    #[error("Storage error: {0}")]
    Storage(#[from] ridemesh_core::Error),

    #[error("Lock error: {0}")]
    Lock(String),
}

impl From<KeyStoreError> for ridemesh_core::Error {
    fn from(err: KeyStoreError) -> Self {
        match err {
            KeyStoreError::KeyNotFound { .. } => ridemesh_core::Error::NotFound(err.to_string()),
            KeyStoreError::InvalidKey { .. } => ridemesh_core::Error::Validation(err.to_string()),
            KeyStoreError::Storage(inner) => inner,
            KeyStoreError::Lock(reason) => ridemesh_core::Error::Storage(reason),
        }
    }
}

/// Persisted form of an identity.
#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct StoredIdentity {
    pub account: String,
    /// Hex-encoded 32-byte Ed25519 secret
    pub secret_key: String,
    pub public_key: String,
    pub created_at: u64,
}

/// Metrics for observability.
#[derive(Debug, Default)]
pub struct SigningMetrics {
    pub messages_signed_total: AtomicU64,
    pub signing_rejected_total: AtomicU64,
    pub keys_generated_total: AtomicU64,
}

pub struct IdentityKeyStore {
    keys: RwLock<HashMap<String, SigningKey>>,
    storage: Option<Arc<dyn KeyValueStore>>,
    metrics: SigningMetrics,
}

fn storage_key(account: &str) -> String {
    format!("identity/{}", account)
}

impl IdentityKeyStore {
    /// Creates an in-memory key store. Keys are lost when it is dropped.
    pub fn new() -> Self {
        Self {
            keys: RwLock::new(HashMap::new()),
            storage: None,
            metrics: SigningMetrics::default(),
        }
    }

    /// Creates a key store backed by the storage collaborator.
    pub fn with_storage(storage: Arc<dyn KeyValueStore>) -> Self {
        Self {
            keys: RwLock::new(HashMap::new()),
            storage: Some(storage),
            metrics: SigningMetrics::default(),
        }
    }

    /// Returns the account's public key, generating a key on first call.
    pub fn generate(&self, account: &str) -> Result<String, KeyStoreError> {
        if let Some(public_key) = self.lookup(account)? {
            debug!(account, "identity already initialized");
            return Ok(public_key);
        }

        let mut keys = self.write_keys()?;
        // Another caller may have generated between the lookup and the lock
        if let Some(existing) = keys.get(account) {
            return Ok(hex::encode(existing.verifying_key().as_bytes()));
        }

        let signing_key = fresh_signing_key();
        let public_key = hex::encode(signing_key.verifying_key().as_bytes());
        self.persist(account, &signing_key)?;
        keys.insert(account.to_string(), signing_key);
        self.metrics
            .keys_generated_total
            .fetch_add(1, Ordering::Relaxed);

        info!(account, key_id = %crate::key_id(&public_key), "identity generated");
        Ok(public_key)
    }

    /// Discards the account's key and generates a new one.
    ///
    /// Every signature made with the previous key stops being attributable
    /// to this account.
    pub fn reset(&self, account: &str) -> Result<String, KeyStoreError> {
        let mut keys = self.write_keys()?;
        let signing_key = fresh_signing_key();
        let public_key = hex::encode(signing_key.verifying_key().as_bytes());
        self.persist(account, &signing_key)?;
        keys.insert(account.to_string(), signing_key);
        self.metrics
            .keys_generated_total
            .fetch_add(1, Ordering::Relaxed);

        warn!(
            account,
            key_id = %crate::key_id(&public_key),
            "identity reset; prior signatures orphaned"
        );
        Ok(public_key)
    }

    /// Public key of an initialized account.
    pub fn public_key(&self, account: &str) -> Result<String, KeyStoreError> {
        self.lookup(account)?
            .ok_or_else(|| KeyStoreError::KeyNotFound {
                account: account.to_string(),
            })
    }

    /// Signs `message` with the account's key.
    ///
    /// Fails with `KeyNotFound` when the account has no key; never returns a
    /// placeholder signature.
    pub fn sign(&self, account: &str, message: &[u8]) -> Result<Vec<u8>, KeyStoreError> {
        if self.lookup(account)?.is_none() {
            self.metrics
                .signing_rejected_total
                .fetch_add(1, Ordering::Relaxed);
            return Err(KeyStoreError::KeyNotFound {
                account: account.to_string(),
            });
        }

        let keys = self.read_keys()?;
        let signing_key = keys.get(account).ok_or_else(|| KeyStoreError::KeyNotFound {
            account: account.to_string(),
        })?;
        let signature = signing_key.sign(message);
        self.metrics
            .messages_signed_total
            .fetch_add(1, Ordering::Relaxed);
        Ok(signature.to_bytes().to_vec())
    }

    /// Verifies a signature against a hex-encoded public key.
    pub fn verify(&self, message: &[u8], signature: &[u8], public_key: &str) -> bool {
        verify_signature(message, signature, public_key)
    }

    /// A handle bound to one account, convenient for components that only
    /// ever sign as the local user.
    pub fn identity(self: &Arc<Self>, account: &str) -> Result<SigningIdentity, KeyStoreError> {
        let public_key = self.generate(account)?;
        Ok(SigningIdentity {
            account: account.to_string(),
            public_key,
            store: Arc::clone(self),
        })
    }

    pub fn metrics(&self) -> &SigningMetrics {
        &self.metrics
    }

    /// Public key if the account is initialized, loading from storage when needed.
    fn lookup(&self, account: &str) -> Result<Option<String>, KeyStoreError> {
        {
            let keys = self.read_keys()?;
            if let Some(key) = keys.get(account) {
                return Ok(Some(hex::encode(key.verifying_key().as_bytes())));
            }
        }

        let Some(storage) = &self.storage else {
            return Ok(None);
        };
        let Some(stored) = get_json::<StoredIdentity>(storage.as_ref(), &storage_key(account))?
        else {
            return Ok(None);
        };

        let signing_key = decode_secret(&stored.secret_key)?;
        let public_key = hex::encode(signing_key.verifying_key().as_bytes());
        if public_key != stored.public_key {
            return Err(KeyStoreError::InvalidKey {
                reason: format!("stored public key mismatch for {}", account),
            });
        }

        let mut keys = self.write_keys()?;
        keys.entry(account.to_string()).or_insert(signing_key);
        debug!(account, "identity loaded from storage");
        Ok(Some(public_key))
    }

    fn persist(&self, account: &str, signing_key: &SigningKey) -> Result<(), KeyStoreError> {
        let Some(storage) = &self.storage else {
            return Ok(());
        };
        let stored = StoredIdentity {
            account: account.to_string(),
            secret_key: hex::encode(signing_key.to_bytes()),
            public_key: hex::encode(signing_key.verifying_key().as_bytes()),
            created_at: current_timestamp_ms(),
        };
        put_json(storage.as_ref(), &storage_key(account), &stored)?;
        Ok(())
    }

    fn read_keys(
        &self,
    ) -> Result<std::sync::RwLockReadGuard<'_, HashMap<String, SigningKey>>, KeyStoreError> {
        self.keys
            .read()
            .map_err(|e| KeyStoreError::Lock(e.to_string()))
    }

    fn write_keys(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<String, SigningKey>>, KeyStoreError> {
        self.keys
            .write()
            .map_err(|e| KeyStoreError::Lock(e.to_string()))
    }
}

impl Default for IdentityKeyStore {
    fn default() -> Self {
        Self::new()
    }
}

fn fresh_signing_key() -> SigningKey {
    let mut secret_key_bytes = [0u8; 32];
    OsRng.fill_bytes(&mut secret_key_bytes);
    let signing_key = SigningKey::from_bytes(&secret_key_bytes);
    secret_key_bytes.zeroize();
    signing_key
}

fn decode_secret(secret_hex: &str) -> Result<SigningKey, KeyStoreError> {
    let mut bytes = hex::decode(secret_hex).map_err(|e| KeyStoreError::InvalidKey {
        reason: e.to_string(),
    })?;
    if bytes.len() != 32 {
        let len = bytes.len();
        bytes.zeroize();
        return Err(KeyStoreError::InvalidKey {
            reason: format!("Invalid key length: {} (expected 32)", len),
        });
    }
    let mut key_array = [0u8; 32];
    key_array.copy_from_slice(&bytes);
    let signing_key = SigningKey::from_bytes(&key_array);
    key_array.zeroize();
    bytes.zeroize();
    Ok(signing_key)
}

/// Signing handle for a single local account.
#[derive(Clone)]
pub struct SigningIdentity {
    account: String,
    public_key: String,
    store: Arc<IdentityKeyStore>,
}

impl SigningIdentity {
    pub fn account(&self) -> &str {
        &self.account
    }

    /// Hex-encoded public key; this is the user's protocol identity.
    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>, KeyStoreError> {
        self.store.sign(&self.account, message)
    }
}

impl std::fmt::Debug for SigningIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningIdentity")
            .field("account", &self.account)
            .field("public_key", &self.public_key)
            .finish()
    }
}
