//! Password-based key derivation and master-secret verification using Argon2id
//!
//! Two independent derivations come out of the master secret:
//! - the vault key, from the salt stored with the encrypted blob
//! - the verifier, from its own salt stored in the [`MasterSecretRecord`]
//!
//! Both stored forms carry the [`KeyDerivationParams`] they were made with,
//! so changing the configured work factor only affects new records.

use argon2::{Algorithm, Argon2, Params, Version};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use super::secure_memory::KEY_LEN;
use super::MasterKey;
use crate::error::{Result, VaultError};

/// Length of every salt in bytes (128 bits)
pub const SALT_LEN: usize = 16;

/// Length of the stored verifier hash in bytes
pub const VERIFIER_LEN: usize = 32;

/// Minimum accepted memory cost in KiB (8 MB)
const MIN_MEMORY_COST: u32 = 8_192;

/// Parameters for Argon2id key derivation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KeyDerivationParams {
    /// Memory cost in KiB (default: 65536 = 64MB)
    pub memory_cost: u32,
    /// Time cost / iterations (default: 3)
    pub time_cost: u32,
    /// Parallelism (default: 4)
    pub parallelism: u32,
}

impl Default for KeyDerivationParams {
    fn default() -> Self {
        Self {
            memory_cost: 65536, // 64 MB
            time_cost: 3,
            parallelism: 4,
        }
    }
}

impl KeyDerivationParams {
    /// Reject work factors below the supported floor
    pub fn validate(&self) -> Result<()> {
        if self.memory_cost < MIN_MEMORY_COST {
            return Err(VaultError::KeyDerivationError(format!(
                "memory cost must be at least {} KiB (got {})",
                MIN_MEMORY_COST, self.memory_cost
            )));
        }
        if self.time_cost < 1 {
            return Err(VaultError::KeyDerivationError(
                "time cost must be at least 1".to_string(),
            ));
        }
        if self.parallelism < 1 {
            return Err(VaultError::KeyDerivationError(
                "parallelism must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Stored text form, `m={memory},t={time},p={parallelism}`
    pub fn encode(&self) -> String {
        format!(
            "m={},t={},p={}",
            self.memory_cost, self.time_cost, self.parallelism
        )
    }

    /// Parse the form written by [`KeyDerivationParams::encode`]
    pub fn parse(s: &str) -> std::result::Result<Self, String> {
        let mut memory_cost = None;
        let mut time_cost = None;
        let mut parallelism = None;

        for field in s.split(',') {
            let (name, value) = field
                .split_once('=')
                .ok_or_else(|| format!("invalid KDF parameter '{}'", field))?;
            let value: u32 = value
                .parse()
                .map_err(|_| format!("invalid value for KDF parameter '{}'", name))?;
            let slot = match name {
                "m" => &mut memory_cost,
                "t" => &mut time_cost,
                "p" => &mut parallelism,
                other => return Err(format!("unknown KDF parameter '{}'", other)),
            };
            if slot.replace(value).is_some() {
                return Err(format!("duplicate KDF parameter '{}'", name));
            }
        }

        match (memory_cost, time_cost, parallelism) {
            (Some(memory_cost), Some(time_cost), Some(parallelism)) => Ok(Self {
                memory_cost,
                time_cost,
                parallelism,
            }),
            _ => Err("KDF parameters must name m, t and p".to_string()),
        }
    }

    fn argon2(&self) -> Result<Argon2<'static>> {
        self.validate()?;
        let params = Params::new(
            self.memory_cost,
            self.time_cost,
            self.parallelism,
            Some(KEY_LEN),
        )
        .map_err(|e| VaultError::KeyDerivationError(e.to_string()))?;

        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }
}

/// Cheapest parameters accepted by [`KeyDerivationParams::validate`]; tests only.
#[cfg(test)]
pub(crate) const TEST_PARAMS: KeyDerivationParams = KeyDerivationParams {
    memory_cost: MIN_MEMORY_COST,
    time_cost: 1,
    parallelism: 1,
};

/// Generate a cryptographically secure random salt
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// Derive a 256-bit vault key from the master secret and a salt
///
/// The same secret, salt and params always produce the same key.
pub fn derive_key(
    secret: &str,
    salt: &[u8; SALT_LEN],
    params: &KeyDerivationParams,
) -> Result<MasterKey> {
    let mut key_bytes = [0u8; KEY_LEN];
    params
        .argon2()?
        .hash_password_into(secret.as_bytes(), salt, &mut key_bytes)
        .map_err(|e| VaultError::KeyDerivationError(e.to_string()))?;

    let key = MasterKey::new(key_bytes);
    zeroize::Zeroize::zeroize(&mut key_bytes);
    Ok(key)
}

/// Stored proof of master-secret possession
///
/// Persisted as `{hash_hex}:{salt_hex}:{params}`. Never contains the secret
/// itself.
#[derive(Clone, PartialEq, Eq)]
pub struct MasterSecretRecord {
    pub verifier_hash: Vec<u8>,
    pub verifier_salt: Vec<u8>,
    /// Work factor the hash was computed with
    pub params: KeyDerivationParams,
}

impl MasterSecretRecord {
    /// Parse the persisted text form
    pub fn parse(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.trim().split(':').collect();
        if parts.len() != 3 {
            return Err(VaultError::IntegrityError(format!(
                "expected hash:salt:params, found {} field(s)",
                parts.len()
            )));
        }

        let verifier_hash = hex::decode(parts[0])
            .map_err(|e| VaultError::IntegrityError(format!("invalid hash hex: {}", e)))?;
        let verifier_salt = hex::decode(parts[1])
            .map_err(|e| VaultError::IntegrityError(format!("invalid salt hex: {}", e)))?;
        let params = KeyDerivationParams::parse(parts[2]).map_err(VaultError::IntegrityError)?;

        let record = Self {
            verifier_hash,
            verifier_salt,
            params,
        };
        record.check_shape()?;
        Ok(record)
    }

    /// Encode as `{hash_hex}:{salt_hex}:{params}`
    pub fn encode(&self) -> String {
        format!(
            "{}:{}:{}",
            hex::encode(&self.verifier_hash),
            hex::encode(&self.verifier_salt),
            self.params.encode()
        )
    }

    fn check_shape(&self) -> Result<()> {
        if self.verifier_hash.len() != VERIFIER_LEN {
            return Err(VaultError::IntegrityError(format!(
                "verifier hash must be {} bytes, got {}",
                VERIFIER_LEN,
                self.verifier_hash.len()
            )));
        }
        if self.verifier_salt.len() != SALT_LEN {
            return Err(VaultError::IntegrityError(format!(
                "verifier salt must be {} bytes, got {}",
                SALT_LEN,
                self.verifier_salt.len()
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for MasterSecretRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterSecretRecord")
            .field("verifier_hash", &"[REDACTED]")
            .field("verifier_salt", &hex::encode(&self.verifier_salt))
            .field("params", &self.params)
            .finish()
    }
}

/// Build a fresh verifier record for `secret` under a new random salt
pub fn hash_secret(secret: &str, params: &KeyDerivationParams) -> Result<MasterSecretRecord> {
    let salt = generate_salt();
    let verifier = derive_key(secret, &salt, params)?;

    Ok(MasterSecretRecord {
        verifier_hash: verifier.as_bytes().to_vec(),
        verifier_salt: salt.to_vec(),
        params: *params,
    })
}

/// Check `secret` against a stored verifier in constant time
///
/// Uses the work factor recorded in `record`. A malformed record is an
/// [`VaultError::IntegrityError`], never `Ok(false)`.
pub fn verify_secret(secret: &str, record: &MasterSecretRecord) -> Result<bool> {
    record.check_shape()?;

    let mut salt = [0u8; SALT_LEN];
    salt.copy_from_slice(&record.verifier_salt);

    let candidate = derive_key(secret, &salt, &record.params)?;
    Ok(candidate
        .as_bytes()
        .as_slice()
        .ct_eq(&record.verifier_hash)
        .into())
}
