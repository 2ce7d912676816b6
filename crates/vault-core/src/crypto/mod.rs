//! Cryptographic primitives for the vault
//!
//! This module provides:
//! - AES-256-GCM authenticated encryption
//! - Argon2id key derivation and master-secret verification
//! - Secure memory handling with zeroize

mod encryption;
pub(crate) mod key_derivation;
mod secure_memory;

pub use encryption::{decrypt, encrypt, EncryptedData, EncryptedVaultBlob};
pub use key_derivation::{
    derive_key, generate_salt, hash_secret, verify_secret, KeyDerivationParams,
    MasterSecretRecord, SALT_LEN,
};
pub use secure_memory::{MasterKey, SecretString, KEY_LEN};
