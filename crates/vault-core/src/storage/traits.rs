//! Persistence trait definitions

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::crypto::{EncryptedVaultBlob, MasterSecretRecord};
use crate::error::Result;

/// Durable key-value store behind the vault
///
/// Implementations only move bytes; they never see plaintext credentials
/// or key material.
#[async_trait]
pub trait VaultPersistence: Send + Sync {
    /// Load the master-secret verifier, if the vault has been set up
    async fn get_master_secret_record(&self) -> Result<Option<MasterSecretRecord>>;

    /// Replace the master-secret verifier
    async fn put_master_secret_record(&self, record: &MasterSecretRecord) -> Result<()>;

    /// Load the encrypted credential collection
    async fn get_encrypted_blob(&self) -> Result<Option<EncryptedVaultBlob>>;

    /// Replace the encrypted credential collection
    async fn put_encrypted_blob(&self, blob: &EncryptedVaultBlob) -> Result<()>;

    /// Last recorded user activity, if any
    async fn get_last_activity(&self) -> Result<Option<DateTime<Utc>>>;

    /// Record user activity
    async fn put_last_activity(&self, at: DateTime<Utc>) -> Result<()>;

    /// Irreversibly delete everything (vault reset)
    async fn clear_all(&self) -> Result<()>;

    /// Replace verifier and blob together: both or neither
    ///
    /// A verifier paired with a blob sealed under another key loses the
    /// vault, so backends must make this one atomic step.
    async fn put_vault_state(
        &self,
        record: &MasterSecretRecord,
        blob: &EncryptedVaultBlob,
    ) -> Result<()>;

    /// Get a human-readable name for this storage backend
    fn backend_name(&self) -> &'static str;
}
