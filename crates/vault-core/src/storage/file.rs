//! File storage backend
//!
//! Keeps the verifier, the encrypted blob and the last-activity timestamp in
//! one JSON document (`vault.json`) in the user's data directory. Every write
//! replaces the whole document through a temp file and a rename, so
//! [`VaultPersistence::put_vault_state`] is a single atomic step.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;

use super::VaultPersistence;
use crate::crypto::{EncryptedVaultBlob, MasterSecretRecord};
use crate::error::{Result, VaultError};

const VAULT_FILE: &str = "vault.json";
const FORMAT_VERSION: u32 = 2;

/// On-disk document
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VaultFile {
    version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    master_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    blob: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_activity: Option<DateTime<Utc>>,
}

/// File-backed [`VaultPersistence`]
pub struct FileStorage {
    /// Directory for storage files
    storage_dir: PathBuf,
    /// Serializes read-modify-write cycles within this process
    write_lock: Mutex<()>,
}

fn io_error(context: &str, e: std::io::Error) -> VaultError {
    VaultError::PersistenceError(format!("{}: {}", context, e))
}

impl FileStorage {
    /// Create file storage in the default data directory
    pub fn new() -> Result<Self> {
        Self::with_dir(Self::default_storage_dir()?)
    }

    /// Create with a custom storage directory
    pub fn with_dir(storage_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&storage_dir)
            .map_err(|e| io_error("cannot create storage directory", e))?;

        debug!("File storage initialized at: {:?}", storage_dir);

        Ok(Self {
            storage_dir,
            write_lock: Mutex::new(()),
        })
    }

    /// Get the default storage directory
    pub fn default_storage_dir() -> Result<PathBuf> {
        ProjectDirs::from("com", "secure-vault", "secure-vault")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .ok_or_else(|| {
                VaultError::PersistenceError("Could not determine data directory".to_string())
            })
    }

    /// Get the storage directory path
    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    fn vault_file_path(&self) -> PathBuf {
        self.storage_dir.join(VAULT_FILE)
    }

    async fn read_file(&self) -> Result<VaultFile> {
        let path = self.vault_file_path();

        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(VaultFile {
                    version: FORMAT_VERSION,
                    ..Default::default()
                })
            }
            Err(e) => return Err(io_error("cannot read vault file", e)),
        };

        let file: VaultFile = serde_json::from_str(&contents).map_err(|e| {
            VaultError::PersistenceError(format!("vault file is unreadable: {}", e))
        })?;

        if file.version != FORMAT_VERSION {
            return Err(VaultError::PersistenceError(format!(
                "unsupported vault file version {}",
                file.version
            )));
        }

        Ok(file)
    }

    async fn write_file(&self, file: &VaultFile) -> Result<()> {
        let contents = serde_json::to_string_pretty(file)?;
        let path = self.vault_file_path();

        // Write atomically using a temp file
        let temp_path = path.with_extension("tmp");
        tokio::fs::write(&temp_path, &contents)
            .await
            .map_err(|e| io_error("cannot write vault file", e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&temp_path, std::fs::Permissions::from_mode(0o600))
                .await
                .map_err(|e| io_error("cannot restrict vault file permissions", e))?;
        }

        tokio::fs::rename(&temp_path, &path)
            .await
            .map_err(|e| io_error("cannot replace vault file", e))?;

        debug!("Saved vault file to {:?}", path);
        Ok(())
    }

    async fn modify<F>(&self, change: F) -> Result<()>
    where
        F: FnOnce(&mut VaultFile) + Send,
    {
        let _guard = self.write_lock.lock().await;
        let mut file = self.read_file().await?;
        change(&mut file);
        self.write_file(&file).await
    }
}

#[async_trait]
impl VaultPersistence for FileStorage {
    async fn get_master_secret_record(&self) -> Result<Option<MasterSecretRecord>> {
        self.read_file()
            .await?
            .master_secret
            .as_deref()
            .map(MasterSecretRecord::parse)
            .transpose()
    }

    async fn put_master_secret_record(&self, record: &MasterSecretRecord) -> Result<()> {
        let encoded = record.encode();
        self.modify(move |file| file.master_secret = Some(encoded)).await
    }

    async fn get_encrypted_blob(&self) -> Result<Option<EncryptedVaultBlob>> {
        self.read_file()
            .await?
            .blob
            .as_deref()
            .map(EncryptedVaultBlob::from_string)
            .transpose()
    }

    async fn put_encrypted_blob(&self, blob: &EncryptedVaultBlob) -> Result<()> {
        let encoded = blob.to_string();
        self.modify(move |file| file.blob = Some(encoded)).await
    }

    async fn get_last_activity(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self.read_file().await?.last_activity)
    }

    async fn put_last_activity(&self, at: DateTime<Utc>) -> Result<()> {
        self.modify(move |file| file.last_activity = Some(at)).await
    }

    async fn clear_all(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        match tokio::fs::remove_file(self.vault_file_path()).await {
            Ok(()) => {
                debug!("Removed vault file");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error("cannot remove vault file", e)),
        }
    }

    async fn put_vault_state(
        &self,
        record: &MasterSecretRecord,
        blob: &EncryptedVaultBlob,
    ) -> Result<()> {
        let record = record.encode();
        let blob = blob.to_string();
        self.modify(move |file| {
            file.master_secret = Some(record);
            file.blob = Some(blob);
        })
        .await
    }

    fn backend_name(&self) -> &'static str {
        "File Storage"
    }
}
