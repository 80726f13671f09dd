//! Sovereign identity and signing for RideMesh.
//!
//! Every protocol event, presence token and escrow release authorization is
//! signed with a per-user Ed25519 key held by the [`IdentityKeyStore`].
//!
//! # Security Principles
//!
//! - Private keys never leave the key store (or the storage collaborator)
//! - Keys are generated once from the OS CSPRNG and never silently rotated
//! - Verification never panics: malformed input is simply "not valid"
//! - Secret material is zeroized after use

pub mod keystore;
pub mod verify;

pub use keystore::{
    IdentityKeyStore, KeyStoreError, SigningIdentity, SigningMetrics, StoredIdentity,
};
pub use verify::{decode_public_key, key_id, verify_signature, PUBLIC_KEY_HEX_LEN, SIGNATURE_LEN};
