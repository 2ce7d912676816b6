//! AES-256-GCM authenticated encryption of the serialized vault
//!
//! Payload format: `{iv_hex}:{auth_tag_hex}:{ciphertext_hex}`
//! - IV: 12 bytes (96 bits) - standard for GCM, random per call
//! - Auth tag: 16 bytes (128 bits)
//! - Ciphertext: variable length
//!
//! Blob format adds the KDF salt and work factor in front:
//! `{salt_hex}:{params}:{iv_hex}:{auth_tag_hex}:{ciphertext_hex}`

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use rand::RngCore;

use super::key_derivation::{KeyDerivationParams, SALT_LEN};
use super::MasterKey;
use crate::error::{Result, VaultError};

const IV_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Encrypted data with IV and auth tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedData {
    /// Initialization vector (12 bytes for GCM)
    pub iv: [u8; IV_LEN],
    /// Authentication tag (16 bytes)
    pub auth_tag: [u8; TAG_LEN],
    /// Encrypted ciphertext
    pub ciphertext: Vec<u8>,
}

impl std::fmt::Display for EncryptedData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            hex::encode(self.iv),
            hex::encode(self.auth_tag),
            hex::encode(&self.ciphertext)
        )
    }
}

impl EncryptedData {
    /// Parse from the format: `{iv_hex}:{auth_tag_hex}:{ciphertext_hex}`
    pub fn from_string(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.trim().split(':').collect();
        if parts.len() != 3 {
            return Err(VaultError::DecryptionError(
                "Invalid encrypted data format: expected iv:tag:ciphertext".to_string(),
            ));
        }
        Self::from_parts(parts[0], parts[1], parts[2])
    }

    fn from_parts(iv_hex: &str, tag_hex: &str, ciphertext_hex: &str) -> Result<Self> {
        let iv = decode_fixed::<IV_LEN>(iv_hex, "IV")?;
        let auth_tag = decode_fixed::<TAG_LEN>(tag_hex, "auth tag")?;
        let ciphertext = hex::decode(ciphertext_hex)
            .map_err(|e| VaultError::DecryptionError(format!("Invalid ciphertext hex: {}", e)))?;

        Ok(Self {
            iv,
            auth_tag,
            ciphertext,
        })
    }
}

fn decode_fixed<const N: usize>(s: &str, what: &str) -> Result<[u8; N]> {
    let bytes = hex::decode(s)
        .map_err(|e| VaultError::DecryptionError(format!("Invalid {} hex: {}", what, e)))?;

    bytes.as_slice().try_into().map_err(|_| {
        VaultError::DecryptionError(format!(
            "Invalid {} length: expected {}, got {}",
            what,
            N,
            bytes.len()
        ))
    })
}

/// Encrypt plaintext using AES-256-GCM
///
/// # Arguments
/// * `plaintext` - The data to encrypt
/// * `key` - The 256-bit encryption key
///
/// # Returns
/// Encrypted data containing IV, auth tag, and ciphertext
pub fn encrypt(plaintext: &[u8], key: &MasterKey) -> Result<EncryptedData> {
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| VaultError::EncryptionError(e.to_string()))?;

    // Random IV per call, never reused with the same key
    let mut iv = [0u8; IV_LEN];
    rand::thread_rng().fill_bytes(&mut iv);
    let nonce = Nonce::from_slice(&iv);

    // aes-gcm appends the auth tag to the ciphertext
    let mut ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| VaultError::EncryptionError(e.to_string()))?;

    if ciphertext.len() < TAG_LEN {
        return Err(VaultError::EncryptionError(
            "Ciphertext too short".to_string(),
        ));
    }

    let tag_start = ciphertext.len() - TAG_LEN;
    let mut auth_tag = [0u8; TAG_LEN];
    auth_tag.copy_from_slice(&ciphertext[tag_start..]);
    ciphertext.truncate(tag_start);

    Ok(EncryptedData {
        iv,
        auth_tag,
        ciphertext,
    })
}

/// Decrypt ciphertext using AES-256-GCM
///
/// Fails as a whole if the tag does not verify; no partial plaintext is
/// ever returned.
pub fn decrypt(encrypted: &EncryptedData, key: &MasterKey) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| VaultError::DecryptionError(e.to_string()))?;

    let nonce = Nonce::from_slice(&encrypted.iv);

    // Reconstruct ciphertext with tag appended (as expected by aes-gcm)
    let mut ciphertext_with_tag = Vec::with_capacity(encrypted.ciphertext.len() + TAG_LEN);
    ciphertext_with_tag.extend_from_slice(&encrypted.ciphertext);
    ciphertext_with_tag.extend_from_slice(&encrypted.auth_tag);

    cipher
        .decrypt(nonce, ciphertext_with_tag.as_slice())
        .map_err(|_| {
            VaultError::DecryptionError("authentication tag mismatch".to_string())
        })
}

/// Persisted, encrypted form of the whole credential collection
///
/// The salt and params are the ones the sealing key was derived from. They
/// always travel with the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedVaultBlob {
    pub salt: [u8; SALT_LEN],
    pub params: KeyDerivationParams,
    pub payload: EncryptedData,
}

impl EncryptedVaultBlob {
    /// Encrypt `plaintext` under `key`, recording how `key` was derived
    pub fn seal(
        plaintext: &[u8],
        key: &MasterKey,
        salt: [u8; SALT_LEN],
        params: KeyDerivationParams,
    ) -> Result<Self> {
        Ok(Self {
            salt,
            params,
            payload: encrypt(plaintext, key)?,
        })
    }

    /// Decrypt the payload; `key` must come from `self.salt` and `self.params`
    pub fn open(&self, key: &MasterKey) -> Result<Vec<u8>> {
        decrypt(&self.payload, key)
    }

    /// Parse from `{salt_hex}:{params}:{iv_hex}:{auth_tag_hex}:{ciphertext_hex}`
    pub fn from_string(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.trim().split(':').collect();
        if parts.len() != 5 {
            return Err(VaultError::DecryptionError(
                "Invalid vault blob format: expected salt:params:iv:tag:ciphertext".to_string(),
            ));
        }

        Ok(Self {
            salt: decode_fixed::<SALT_LEN>(parts[0], "salt")?,
            params: KeyDerivationParams::parse(parts[1]).map_err(VaultError::DecryptionError)?,
            payload: EncryptedData::from_parts(parts[2], parts[3], parts[4])?,
        })
    }
}

impl std::fmt::Display for EncryptedVaultBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            hex::encode(self.salt),
            self.params.encode(),
            self.payload
        )
    }
}
