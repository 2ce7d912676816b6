//! In-process storage backend
//!
//! Nothing survives the process; used by tests and by embedders that
//! persist the exported blob themselves.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::VaultPersistence;
use crate::crypto::{EncryptedVaultBlob, MasterSecretRecord};
use crate::error::Result;

#[derive(Debug, Default)]
struct MemoryState {
    master_secret: Option<MasterSecretRecord>,
    blob: Option<EncryptedVaultBlob>,
    last_activity: Option<DateTime<Utc>>,
}

/// Memory-backed [`VaultPersistence`]
#[derive(Debug, Default)]
pub struct MemoryStorage {
    state: RwLock<MemoryState>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VaultPersistence for MemoryStorage {
    async fn get_master_secret_record(&self) -> Result<Option<MasterSecretRecord>> {
        Ok(self.state.read().await.master_secret.clone())
    }

    async fn put_master_secret_record(&self, record: &MasterSecretRecord) -> Result<()> {
        self.state.write().await.master_secret = Some(record.clone());
        Ok(())
    }

    async fn get_encrypted_blob(&self) -> Result<Option<EncryptedVaultBlob>> {
        Ok(self.state.read().await.blob.clone())
    }

    async fn put_encrypted_blob(&self, blob: &EncryptedVaultBlob) -> Result<()> {
        self.state.write().await.blob = Some(blob.clone());
        Ok(())
    }

    async fn get_last_activity(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self.state.read().await.last_activity)
    }

    async fn put_last_activity(&self, at: DateTime<Utc>) -> Result<()> {
        self.state.write().await.last_activity = Some(at);
        Ok(())
    }

    async fn clear_all(&self) -> Result<()> {
        *self.state.write().await = MemoryState::default();
        Ok(())
    }

    async fn put_vault_state(
        &self,
        record: &MasterSecretRecord,
        blob: &EncryptedVaultBlob,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        state.master_secret = Some(record.clone());
        state.blob = Some(blob.clone());
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "Memory Storage"
    }
}
