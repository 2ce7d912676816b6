//! Vault session: the lock/unlock state machine
//!
//! A [`SessionManager`] is the one session for a vault. It owns the derived
//! key and the decrypted [`CredentialStore`] while unlocked and drops both
//! together on lock. Every operation takes the same async mutex, so setup,
//! unlock, lock, activity, idle checks, master-secret changes and credential
//! mutations never interleave.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::clock::{Clock, SystemClock};
use crate::credential::{Category, Credential, CredentialDraft, CredentialPatch, CredentialStore};
use crate::crypto::{
    derive_key, generate_salt, hash_secret, verify_secret, EncryptedVaultBlob,
    KeyDerivationParams, MasterKey, MasterSecretRecord, SecretString, SALT_LEN,
};
use crate::error::{Result, VaultError};
use crate::settings::Settings;
use crate::storage::VaultPersistence;

/// Externally visible session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VaultState {
    /// No master secret has been set up yet
    Uninitialized,
    /// Master secret required
    Locked,
    /// Key and credentials are in memory
    Unlocked,
}

/// Everything that only exists while unlocked
struct UnlockedVault {
    key: MasterKey,
    /// Salt `key` was derived from; written into every blob
    salt: [u8; SALT_LEN],
    /// Work factor `key` was derived with; written into every blob
    params: KeyDerivationParams,
    store: CredentialStore,
    last_activity: DateTime<Utc>,
}

enum SessionState {
    Uninitialized,
    Locked,
    Unlocked(UnlockedVault),
}

impl SessionState {
    fn as_vault_state(&self) -> VaultState {
        match self {
            SessionState::Uninitialized => VaultState::Uninitialized,
            SessionState::Locked => VaultState::Locked,
            SessionState::Unlocked(_) => VaultState::Unlocked,
        }
    }

    fn unlocked(&self) -> Result<&UnlockedVault> {
        match self {
            SessionState::Unlocked(vault) => Ok(vault),
            SessionState::Uninitialized => Err(VaultError::VaultNotInitialized),
            SessionState::Locked => Err(VaultError::VaultLocked),
        }
    }

    fn unlocked_mut(&mut self) -> Result<&mut UnlockedVault> {
        match self {
            SessionState::Unlocked(vault) => Ok(vault),
            SessionState::Uninitialized => Err(VaultError::VaultNotInitialized),
            SessionState::Locked => Err(VaultError::VaultLocked),
        }
    }
}

/// Run Argon2 off the async workers
async fn run_blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| VaultError::KeyDerivationError(format!("KDF task failed: {}", e)))?
}

async fn derive_key_blocking(
    secret: &str,
    salt: [u8; SALT_LEN],
    params: KeyDerivationParams,
) -> Result<MasterKey> {
    let secret = SecretString::new(secret);
    run_blocking(move || derive_key(secret.expose(), &salt, &params)).await
}

async fn verify_secret_blocking(secret: &str, record: MasterSecretRecord) -> Result<bool> {
    let secret = SecretString::new(secret);
    run_blocking(move || verify_secret(secret.expose(), &record)).await
}

async fn hash_secret_blocking(
    secret: &str,
    params: KeyDerivationParams,
) -> Result<MasterSecretRecord> {
    let secret = SecretString::new(secret);
    run_blocking(move || hash_secret(secret.expose(), &params)).await
}

fn require_secret(secret: &str) -> Result<()> {
    if secret.is_empty() {
        return Err(VaultError::ValidationError(
            "master password is required".to_string(),
        ));
    }
    Ok(())
}

/// The vault session
pub struct SessionManager {
    storage: Arc<dyn VaultPersistence>,
    clock: Arc<dyn Clock>,
    /// Work factors for newly created keys and verifiers; existing ones
    /// always use the params stored with them
    kdf: KeyDerivationParams,
    verifier_kdf: KeyDerivationParams,
    idle_timeout: Option<chrono::Duration>,
    state: Mutex<SessionState>,
}

impl SessionManager {
    /// Open the session for the vault behind `storage`
    ///
    /// Starts `Locked` when a master secret exists, `Uninitialized` otherwise.
    pub async fn open(storage: Arc<dyn VaultPersistence>, settings: &Settings) -> Result<Self> {
        Self::open_with_clock(storage, settings, Arc::new(SystemClock)).await
    }

    /// Open with an explicit time source
    pub async fn open_with_clock(
        storage: Arc<dyn VaultPersistence>,
        settings: &Settings,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        settings.validate()?;

        let state = if storage.get_master_secret_record().await?.is_some() {
            SessionState::Locked
        } else {
            SessionState::Uninitialized
        };

        debug!(
            "Opened vault session on {} ({:?})",
            storage.backend_name(),
            state.as_vault_state()
        );

        Ok(Self {
            storage,
            clock,
            kdf: settings.kdf,
            verifier_kdf: settings.verifier_kdf,
            idle_timeout: settings.idle_timeout(),
            state: Mutex::new(state),
        })
    }

    /// Get the current state
    pub async fn state(&self) -> VaultState {
        self.state.lock().await.as_vault_state()
    }

    pub async fn is_unlocked(&self) -> bool {
        self.state().await == VaultState::Unlocked
    }

    /// Idle threshold, `None` when auto-lock is disabled
    pub fn idle_timeout(&self) -> Option<chrono::Duration> {
        self.idle_timeout
    }

    /// Last activity of the unlocked session
    pub async fn last_activity(&self) -> Option<DateTime<Utc>> {
        match &*self.state.lock().await {
            SessionState::Unlocked(vault) => Some(vault.last_activity),
            _ => None,
        }
    }

    /// Create the vault: first verifier plus an empty encrypted collection
    ///
    /// Leaves the session unlocked.
    pub async fn setup(&self, secret: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if !matches!(*state, SessionState::Uninitialized) {
            return Err(VaultError::AlreadyInitialized);
        }
        require_secret(secret)?;

        info!("Initializing new vault");

        let record = hash_secret_blocking(secret, self.verifier_kdf).await?;
        let salt = generate_salt();
        let key = derive_key_blocking(secret, salt, self.kdf).await?;

        let store = CredentialStore::new();
        let plaintext = Zeroizing::new(store.serialize()?);
        let blob = EncryptedVaultBlob::seal(&plaintext, &key, salt, self.kdf)?;

        self.storage.put_vault_state(&record, &blob).await?;

        let now = self.clock.now();
        *state = SessionState::Unlocked(UnlockedVault {
            key,
            salt,
            params: self.kdf,
            store,
            last_activity: now,
        });
        self.persist_activity(now).await;

        info!("Vault initialized successfully");
        Ok(())
    }

    /// Verify the master secret and load the credential collection
    ///
    /// A wrong secret leaves the session locked with no key material kept.
    pub async fn unlock(&self, secret: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if matches!(*state, SessionState::Uninitialized) {
            return Err(VaultError::VaultNotInitialized);
        }

        self.verify_against_record(secret).await?;

        let now = self.clock.now();
        if let SessionState::Unlocked(vault) = &mut *state {
            debug!("Vault already unlocked");
            vault.last_activity = now;
            self.persist_activity(now).await;
            return Ok(());
        }

        let (key, salt, params, store) = match self.storage.get_encrypted_blob().await? {
            Some(blob) => {
                let key = derive_key_blocking(secret, blob.salt, blob.params).await?;
                let plaintext = Zeroizing::new(blob.open(&key)?);
                let store = CredentialStore::deserialize(&plaintext)?;
                (key, blob.salt, blob.params, store)
            }
            None => {
                debug!("No stored blob, starting with an empty collection");
                let salt = generate_salt();
                let key = derive_key_blocking(secret, salt, self.kdf).await?;
                (key, salt, self.kdf, CredentialStore::new())
            }
        };

        let count = store.len();
        *state = SessionState::Unlocked(UnlockedVault {
            key,
            salt,
            params,
            store,
            last_activity: now,
        });
        self.persist_activity(now).await;

        info!("Vault unlocked ({} credentials)", count);
        Ok(())
    }

    /// Drop the key and every decrypted credential
    ///
    /// Always succeeds; locking a locked session does nothing.
    pub async fn lock(&self) {
        let mut state = self.state.lock().await;
        Self::lock_state(&mut state);
    }

    fn lock_state(state: &mut SessionState) -> bool {
        if matches!(state, SessionState::Unlocked(_)) {
            // Dropping the vault zeroizes the key and every credential
            *state = SessionState::Locked;
            info!("Vault locked");
            true
        } else {
            false
        }
    }

    /// Record user activity; ignored while locked
    pub async fn activity(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if let SessionState::Unlocked(vault) = &mut *state {
            let now = self.clock.now();
            vault.last_activity = now;
            self.storage.put_last_activity(now).await?;
        }
        Ok(())
    }

    /// Lock if the session has been idle past the threshold
    pub async fn idle_check(&self) -> bool {
        self.idle_check_at(self.clock.now()).await
    }

    /// Lock if idle at `now`; returns whether this call locked the vault
    ///
    /// The last activity is the later of this session's own record and the
    /// persisted one, so activity recorded through the same storage by
    /// another process keeps the session open.
    pub async fn idle_check_at(&self, now: DateTime<Utc>) -> bool {
        let Some(timeout) = self.idle_timeout else {
            return false;
        };

        let mut state = self.state.lock().await;
        let SessionState::Unlocked(vault) = &*state else {
            return false;
        };

        let mut last = vault.last_activity;
        match self.storage.get_last_activity().await {
            Ok(Some(persisted)) if persisted > last => last = persisted,
            Ok(_) => {}
            Err(e) => warn!("Could not read persisted activity: {}", e),
        }

        if now - last > timeout {
            info!("Auto-locking after {}s of inactivity", (now - last).num_seconds());
            Self::lock_state(&mut state)
        } else {
            false
        }
    }

    /// Replace the master secret and re-encrypt the vault under a new key
    ///
    /// `current` is checked against the stored verifier. The new verifier
    /// and re-encrypted blob are written in one step; on any failure the
    /// old secret, key and blob stay in force.
    pub async fn change_master_secret(&self, current: &str, new: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let vault = state.unlocked_mut()?;
        require_secret(new)?;

        self.verify_against_record(current).await?;

        let new_record = hash_secret_blocking(new, self.verifier_kdf).await?;
        let new_salt = generate_salt();
        let new_key = derive_key_blocking(new, new_salt, self.kdf).await?;

        let plaintext = Zeroizing::new(vault.store.serialize()?);
        let blob = EncryptedVaultBlob::seal(&plaintext, &new_key, new_salt, self.kdf)?;

        self.storage.put_vault_state(&new_record, &blob).await?;

        let now = self.clock.now();
        vault.key = new_key;
        vault.salt = new_salt;
        vault.params = self.kdf;
        vault.last_activity = now;
        self.persist_activity(now).await;

        info!("Master password changed successfully");
        Ok(())
    }

    /// Add a credential and persist the vault
    pub async fn add_credential(&self, draft: CredentialDraft) -> Result<Credential> {
        let credential = self
            .mutate(move |store, now| store.add(draft, now))
            .await?;

        info!("Added credential {}", credential.id);
        Ok(credential)
    }

    /// Apply a partial update and persist the vault
    pub async fn update_credential(&self, id: Uuid, patch: CredentialPatch) -> Result<Credential> {
        let credential = self
            .mutate(move |store, now| store.update(id, patch, now))
            .await?;

        info!("Updated credential {}", id);
        Ok(credential)
    }

    /// Remove a credential and persist the vault
    pub async fn remove_credential(&self, id: Uuid) -> Result<()> {
        self.mutate(move |store, _| store.remove(id).map(|_| ()))
            .await?;

        info!("Deleted credential {}", id);
        Ok(())
    }

    /// All credentials in insertion order
    pub async fn list_credentials(&self) -> Result<Vec<Credential>> {
        Ok(self.state.lock().await.unlocked()?.store.list())
    }

    pub async fn get_credential(&self, id: Uuid) -> Result<Credential> {
        let state = self.state.lock().await;
        state
            .unlocked()?
            .store
            .get(id)
            .cloned()
            .ok_or(VaultError::CredentialNotFound(id))
    }

    pub async fn search_credentials(
        &self,
        query: &str,
        category: Option<Category>,
    ) -> Result<Vec<Credential>> {
        Ok(self
            .state
            .lock()
            .await
            .unlocked()?
            .store
            .search(query, category))
    }

    /// Encoded encrypted blob for backup; stays encrypted
    pub async fn export_blob(&self) -> Result<Option<String>> {
        let _state = self.state.lock().await;
        Ok(self
            .storage
            .get_encrypted_blob()
            .await?
            .map(|blob| blob.to_string()))
    }

    /// Replace the stored blob with an exported one, verbatim
    ///
    /// Nothing is re-encrypted and the master secret is not checked; the
    /// session locks so the next unlock decides whether the blob is usable.
    pub async fn import_blob(&self, data: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if matches!(*state, SessionState::Uninitialized) {
            return Err(VaultError::VaultNotInitialized);
        }

        let blob = EncryptedVaultBlob::from_string(data)?;
        self.storage.put_encrypted_blob(&blob).await?;
        Self::lock_state(&mut state);

        info!("Imported vault blob");
        Ok(())
    }

    /// Reset the vault completely - deletes the verifier and all credentials
    /// WARNING: This is irreversible!
    pub async fn reset(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        info!("Resetting vault - deleting all data");

        self.storage.clear_all().await?;
        *state = SessionState::Uninitialized;

        info!("Vault reset complete");
        Ok(())
    }

    async fn verify_against_record(&self, secret: &str) -> Result<()> {
        let record = self
            .storage
            .get_master_secret_record()
            .await?
            .ok_or(VaultError::VaultNotInitialized)?;

        if !verify_secret_blocking(secret, record).await? {
            warn!("Master password verification failed");
            return Err(VaultError::AuthenticationFailed);
        }
        Ok(())
    }

    /// Apply `change` to a copy of the store, persist it, then commit
    async fn mutate<T, F>(&self, change: F) -> Result<T>
    where
        T: Send,
        F: FnOnce(&mut CredentialStore, DateTime<Utc>) -> Result<T> + Send,
    {
        let mut state = self.state.lock().await;
        let vault = state.unlocked_mut()?;
        let now = self.clock.now();

        let mut next = vault.store.clone();
        let output = change(&mut next, now)?;

        let plaintext = Zeroizing::new(next.serialize()?);
        let blob = EncryptedVaultBlob::seal(&plaintext, &vault.key, vault.salt, vault.params)?;
        self.storage.put_encrypted_blob(&blob).await?;

        vault.store = next;
        vault.last_activity = now;
        self.persist_activity(now).await;
        Ok(output)
    }

    async fn persist_activity(&self, now: DateTime<Utc>) {
        if let Err(e) = self.storage.put_last_activity(now).await {
            warn!("Could not persist activity timestamp: {}", e);
        }
    }
}

/// Background task that runs [`SessionManager::idle_check`] on a fixed period
///
/// The task stops when the handle is dropped.
pub struct AutoLock {
    handle: JoinHandle<()>,
}

impl AutoLock {
    pub fn spawn(session: Arc<SessionManager>, period: std::time::Duration) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                if session.idle_check().await {
                    debug!("Auto-lock task locked the vault");
                }
            }
        });

        Self { handle }
    }
}

impl Drop for AutoLock {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breach::{check_password, BreachOracle, BreachReport, BreachStatus};
    use crate::clock::ManualClock;
    use crate::crypto::key_derivation::TEST_PARAMS;
    use crate::storage::{FileStorage, MemoryStorage};
    use async_trait::async_trait;
    use chrono::Duration;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::TempDir;

    fn test_settings() -> Settings {
        Settings {
            kdf: TEST_PARAMS,
            verifier_kdf: TEST_PARAMS,
            ..Settings::default()
        }
    }

    async fn session_on(storage: Arc<dyn VaultPersistence>) -> (SessionManager, ManualClock) {
        let clock = ManualClock::default();
        let session =
            SessionManager::open_with_clock(storage, &test_settings(), Arc::new(clock.clone()))
                .await
                .unwrap();
        (session, clock)
    }

    async fn test_session() -> (SessionManager, Arc<MemoryStorage>, ManualClock) {
        let storage = Arc::new(MemoryStorage::new());
        let (session, clock) = session_on(storage.clone()).await;
        (session, storage, clock)
    }

    fn example_draft() -> CredentialDraft {
        CredentialDraft::new("Example", "a@b.com", "hunter2", Category::Work)
    }

    /// Memory storage whose individual writes can be made to fail
    #[derive(Default)]
    struct FlakyStorage {
        inner: MemoryStorage,
        fail_record_writes: AtomicBool,
        fail_blob_writes: AtomicBool,
    }

    #[async_trait]
    impl VaultPersistence for FlakyStorage {
        async fn get_master_secret_record(&self) -> Result<Option<MasterSecretRecord>> {
            self.inner.get_master_secret_record().await
        }

        async fn put_master_secret_record(&self, record: &MasterSecretRecord) -> Result<()> {
            if self.fail_record_writes.load(Ordering::SeqCst) {
                return Err(VaultError::PersistenceError("disk full".to_string()));
            }
            self.inner.put_master_secret_record(record).await
        }

        async fn get_encrypted_blob(&self) -> Result<Option<EncryptedVaultBlob>> {
            self.inner.get_encrypted_blob().await
        }

        async fn put_encrypted_blob(&self, blob: &EncryptedVaultBlob) -> Result<()> {
            if self.fail_blob_writes.load(Ordering::SeqCst) {
                return Err(VaultError::PersistenceError("disk full".to_string()));
            }
            self.inner.put_encrypted_blob(blob).await
        }

        async fn get_last_activity(&self) -> Result<Option<DateTime<Utc>>> {
            self.inner.get_last_activity().await
        }

        async fn put_last_activity(&self, at: DateTime<Utc>) -> Result<()> {
            self.inner.put_last_activity(at).await
        }

        async fn clear_all(&self) -> Result<()> {
            self.inner.clear_all().await
        }

        async fn put_vault_state(
            &self,
            record: &MasterSecretRecord,
            blob: &EncryptedVaultBlob,
        ) -> Result<()> {
            if self.fail_record_writes.load(Ordering::SeqCst)
                || self.fail_blob_writes.load(Ordering::SeqCst)
            {
                return Err(VaultError::PersistenceError("disk full".to_string()));
            }
            self.inner.put_vault_state(record, blob).await
        }

        fn backend_name(&self) -> &'static str {
            "Flaky Storage"
        }
    }

    struct UnreachableOracle;

    #[async_trait]
    impl BreachOracle for UnreachableOracle {
        async fn check(&self, _password: &str) -> Result<BreachReport> {
            Err(VaultError::BreachCheckFailed("network unreachable".to_string()))
        }
    }

    #[tokio::test]
    async fn test_fresh_vault_is_uninitialized() {
        let (session, _storage, _clock) = test_session().await;

        assert_eq!(session.state().await, VaultState::Uninitialized);
        assert!(matches!(
            session.unlock("anything").await,
            Err(VaultError::VaultNotInitialized)
        ));
        assert!(matches!(
            session.list_credentials().await,
            Err(VaultError::VaultNotInitialized)
        ));
    }

    #[tokio::test]
    async fn test_setup_unlocks_and_persists() {
        let (session, storage, clock) = test_session().await;

        session.setup("Tr0ub4dor&3").await.unwrap();

        assert_eq!(session.state().await, VaultState::Unlocked);
        assert!(session.list_credentials().await.unwrap().is_empty());
        assert!(storage.get_master_secret_record().await.unwrap().is_some());
        assert!(storage.get_encrypted_blob().await.unwrap().is_some());
        assert_eq!(storage.get_last_activity().await.unwrap(), Some(clock.now()));
    }

    #[tokio::test]
    async fn test_setup_twice_fails() {
        let (session, _storage, _clock) = test_session().await;
        session.setup("secret").await.unwrap();

        assert!(matches!(
            session.setup("other").await,
            Err(VaultError::AlreadyInitialized)
        ));
    }

    #[tokio::test]
    async fn test_setup_requires_secret() {
        let (session, storage, _clock) = test_session().await;

        assert!(matches!(
            session.setup("").await,
            Err(VaultError::ValidationError(_))
        ));
        assert_eq!(session.state().await, VaultState::Uninitialized);
        assert!(storage.get_master_secret_record().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lock_unlock_preserves_credential() {
        let (session, _storage, _clock) = test_session().await;
        session.setup("Tr0ub4dor&3").await.unwrap();

        let added = session.add_credential(example_draft()).await.unwrap();
        session.lock().await;
        assert_eq!(session.state().await, VaultState::Locked);

        session.unlock("Tr0ub4dor&3").await.unwrap();

        let list = session.list_credentials().await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0], added);
        assert_eq!(list[0].created_at, added.created_at);
        assert_eq!(list[0].category, Category::Work);
    }

    #[tokio::test]
    async fn test_wrong_secret_stays_locked() {
        let (session, _storage, _clock) = test_session().await;
        session.setup("Tr0ub4dor&3").await.unwrap();
        session.add_credential(example_draft()).await.unwrap();
        session.lock().await;

        let result = session.unlock("wrong").await;

        assert!(matches!(result, Err(VaultError::AuthenticationFailed)));
        assert_eq!(session.state().await, VaultState::Locked);
        assert!(session.last_activity().await.is_none());
        assert!(matches!(
            session.list_credentials().await,
            Err(VaultError::VaultLocked)
        ));
    }

    #[tokio::test]
    async fn test_wrong_secret_while_unlocked_is_rejected() {
        let (session, _storage, _clock) = test_session().await;
        session.setup("right").await.unwrap();

        assert!(matches!(
            session.unlock("wrong").await,
            Err(VaultError::AuthenticationFailed)
        ));
        assert_eq!(session.state().await, VaultState::Unlocked);
        session.unlock("right").await.unwrap();
    }

    #[tokio::test]
    async fn test_lock_is_idempotent() {
        let (session, _storage, _clock) = test_session().await;
        session.setup("secret").await.unwrap();

        session.lock().await;
        assert_eq!(session.state().await, VaultState::Locked);
        session.lock().await;
        assert_eq!(session.state().await, VaultState::Locked);
    }

    #[tokio::test]
    async fn test_idle_past_threshold_auto_locks() {
        let (session, _storage, clock) = test_session().await;
        session.setup("secret").await.unwrap();
        for title in ["one", "two", "three"] {
            session
                .add_credential(CredentialDraft::new(title, "user", "pw", Category::Social))
                .await
                .unwrap();
        }

        clock.advance(Duration::minutes(5) + Duration::seconds(1));
        assert!(session.idle_check().await);

        assert_eq!(session.state().await, VaultState::Locked);
        assert!(matches!(
            session.list_credentials().await,
            Err(VaultError::VaultLocked)
        ));
    }

    #[tokio::test]
    async fn test_idle_at_threshold_does_not_lock() {
        let (session, _storage, clock) = test_session().await;
        session.setup("secret").await.unwrap();

        clock.advance(Duration::minutes(5));
        assert!(!session.idle_check().await);
        assert_eq!(session.state().await, VaultState::Unlocked);
    }

    #[tokio::test]
    async fn test_activity_resets_idle_timer() {
        let (session, storage, clock) = test_session().await;
        session.setup("secret").await.unwrap();

        clock.advance(Duration::minutes(4));
        session.activity().await.unwrap();
        assert_eq!(storage.get_last_activity().await.unwrap(), Some(clock.now()));

        clock.advance(Duration::minutes(4));
        assert!(!session.idle_check().await);

        clock.advance(Duration::minutes(2));
        assert!(session.idle_check().await);
    }

    #[tokio::test]
    async fn test_mutation_counts_as_activity() {
        let (session, _storage, clock) = test_session().await;
        session.setup("secret").await.unwrap();

        clock.advance(Duration::minutes(4));
        session.add_credential(example_draft()).await.unwrap();
        clock.advance(Duration::minutes(4));

        assert!(!session.idle_check().await);
    }

    #[tokio::test]
    async fn test_persisted_activity_from_elsewhere_keeps_session_open() {
        let (session, storage, clock) = test_session().await;
        session.setup("secret").await.unwrap();

        clock.advance(Duration::minutes(6));
        storage
            .put_last_activity(clock.now() - Duration::minutes(1))
            .await
            .unwrap();

        assert!(!session.idle_check().await);
        assert_eq!(session.state().await, VaultState::Unlocked);
    }

    #[tokio::test]
    async fn test_idle_check_on_locked_session_is_noop() {
        let (session, _storage, clock) = test_session().await;
        assert!(!session.idle_check().await);

        session.setup("secret").await.unwrap();
        session.lock().await;
        clock.advance(Duration::hours(1));
        assert!(!session.idle_check().await);
        assert_eq!(session.state().await, VaultState::Locked);
    }

    #[tokio::test]
    async fn test_zero_timeout_never_auto_locks() {
        let storage: Arc<dyn VaultPersistence> = Arc::new(MemoryStorage::new());
        let clock = ManualClock::default();
        let settings = Settings {
            idle_timeout_secs: 0,
            ..test_settings()
        };
        let session = SessionManager::open_with_clock(storage, &settings, Arc::new(clock.clone()))
            .await
            .unwrap();
        session.setup("secret").await.unwrap();

        clock.advance(Duration::days(1));
        assert!(!session.idle_check().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_lock_task_locks_idle_session() {
        let (session, _storage, clock) = test_session().await;
        session.setup("secret").await.unwrap();
        let session = Arc::new(session);

        let auto_lock = AutoLock::spawn(session.clone(), std::time::Duration::from_secs(10));

        tokio::time::sleep(std::time::Duration::from_secs(15)).await;
        assert_eq!(session.state().await, VaultState::Unlocked);

        clock.advance(Duration::minutes(6));
        tokio::time::sleep(std::time::Duration::from_secs(15)).await;
        assert_eq!(session.state().await, VaultState::Locked);

        drop(auto_lock);
    }

    #[tokio::test]
    async fn test_change_master_secret() {
        let (session, storage, _clock) = test_session().await;
        session.setup("old").await.unwrap();
        session.add_credential(example_draft()).await.unwrap();
        let before = session.list_credentials().await.unwrap();
        let old_salt = storage.get_encrypted_blob().await.unwrap().unwrap().salt;

        session.change_master_secret("old", "new").await.unwrap();

        let new_salt = storage.get_encrypted_blob().await.unwrap().unwrap().salt;
        assert_ne!(old_salt, new_salt);

        session.lock().await;
        session.unlock("new").await.unwrap();
        assert_eq!(session.list_credentials().await.unwrap(), before);

        session.lock().await;
        assert!(matches!(
            session.unlock("old").await,
            Err(VaultError::AuthenticationFailed)
        ));
    }

    #[tokio::test]
    async fn test_mutations_after_change_use_new_key() {
        let (session, _storage, _clock) = test_session().await;
        session.setup("old").await.unwrap();
        session.change_master_secret("old", "new").await.unwrap();

        session.add_credential(example_draft()).await.unwrap();
        session.lock().await;
        session.unlock("new").await.unwrap();

        assert_eq!(session.list_credentials().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_change_master_secret_wrong_current() {
        let (session, storage, _clock) = test_session().await;
        session.setup("old").await.unwrap();
        let record = storage.get_master_secret_record().await.unwrap();

        assert!(matches!(
            session.change_master_secret("not-old", "new").await,
            Err(VaultError::AuthenticationFailed)
        ));
        assert_eq!(storage.get_master_secret_record().await.unwrap(), record);
        assert_eq!(session.state().await, VaultState::Unlocked);
    }

    #[tokio::test]
    async fn test_change_master_secret_requires_unlock() {
        let (session, _storage, _clock) = test_session().await;
        session.setup("old").await.unwrap();
        session.lock().await;

        assert!(matches!(
            session.change_master_secret("old", "new").await,
            Err(VaultError::VaultLocked)
        ));
    }

    #[tokio::test]
    async fn test_change_master_secret_rejects_empty_new() {
        let (session, _storage, _clock) = test_session().await;
        session.setup("old").await.unwrap();

        assert!(matches!(
            session.change_master_secret("old", "").await,
            Err(VaultError::ValidationError(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_verifier_write_keeps_old_secret() {
        let storage = Arc::new(FlakyStorage::default());
        let (session, _clock) = session_on(storage.clone()).await;
        session.setup("old").await.unwrap();
        let added = session.add_credential(example_draft()).await.unwrap();

        storage.fail_record_writes.store(true, Ordering::SeqCst);
        assert!(matches!(
            session.change_master_secret("old", "new").await,
            Err(VaultError::PersistenceError(_))
        ));
        storage.fail_record_writes.store(false, Ordering::SeqCst);

        // The session still works with the old key
        session
            .add_credential(CredentialDraft::new("Second", "me", "pw", Category::Email))
            .await
            .unwrap();

        session.lock().await;
        assert!(matches!(
            session.unlock("new").await,
            Err(VaultError::AuthenticationFailed)
        ));
        session.unlock("old").await.unwrap();

        let list = session.list_credentials().await.unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0], added);
    }

    #[tokio::test]
    async fn test_failed_blob_write_keeps_old_secret() {
        let storage = Arc::new(FlakyStorage::default());
        let (session, _clock) = session_on(storage.clone()).await;
        session.setup("old").await.unwrap();
        session.add_credential(example_draft()).await.unwrap();

        storage.fail_blob_writes.store(true, Ordering::SeqCst);
        assert!(session.change_master_secret("old", "new").await.is_err());
        storage.fail_blob_writes.store(false, Ordering::SeqCst);

        session.lock().await;
        session.unlock("old").await.unwrap();
        assert_eq!(session.list_credentials().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_state_write_with_every_write_failing() {
        let storage = Arc::new(FlakyStorage::default());
        let (session, _clock) = session_on(storage.clone()).await;
        session.setup("old").await.unwrap();
        session.add_credential(example_draft()).await.unwrap();
        let record_before = storage.get_master_secret_record().await.unwrap();
        let blob_before = storage.get_encrypted_blob().await.unwrap();

        storage.fail_record_writes.store(true, Ordering::SeqCst);
        storage.fail_blob_writes.store(true, Ordering::SeqCst);
        assert!(session.change_master_secret("old", "new").await.is_err());
        storage.fail_record_writes.store(false, Ordering::SeqCst);
        storage.fail_blob_writes.store(false, Ordering::SeqCst);

        assert_eq!(storage.get_master_secret_record().await.unwrap(), record_before);
        assert_eq!(storage.get_encrypted_blob().await.unwrap(), blob_before);

        session.lock().await;
        session.unlock("old").await.unwrap();
        assert_eq!(session.list_credentials().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unlock_after_kdf_settings_change() {
        let storage = Arc::new(MemoryStorage::new());
        let (session, _clock) = session_on(storage.clone()).await;
        session.setup("correct horse").await.unwrap();
        let added = session.add_credential(example_draft()).await.unwrap();
        drop(session);

        let stronger = KeyDerivationParams {
            time_cost: 2,
            ..TEST_PARAMS
        };
        let settings = Settings {
            kdf: stronger,
            verifier_kdf: stronger,
            ..Settings::default()
        };
        let reopened = SessionManager::open_with_clock(
            storage.clone(),
            &settings,
            Arc::new(ManualClock::default()),
        )
        .await
        .unwrap();

        reopened.unlock("correct horse").await.unwrap();
        assert_eq!(reopened.list_credentials().await.unwrap(), vec![added]);

        // Saves keep the key's own work factor
        reopened
            .add_credential(CredentialDraft::new("Second", "me", "pw", Category::Email))
            .await
            .unwrap();
        let blob = storage.get_encrypted_blob().await.unwrap().unwrap();
        assert_eq!(blob.params, TEST_PARAMS);

        // A new master secret picks up the configured work factor
        reopened
            .change_master_secret("correct horse", "battery staple")
            .await
            .unwrap();
        let record = storage.get_master_secret_record().await.unwrap().unwrap();
        let blob = storage.get_encrypted_blob().await.unwrap().unwrap();
        assert_eq!(record.params, stronger);
        assert_eq!(blob.params, stronger);

        reopened.lock().await;
        reopened.unlock("battery staple").await.unwrap();
        assert_eq!(reopened.list_credentials().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_save_leaves_collection_unchanged() {
        let storage = Arc::new(FlakyStorage::default());
        let (session, _clock) = session_on(storage.clone()).await;
        session.setup("secret").await.unwrap();
        session.add_credential(example_draft()).await.unwrap();

        storage.fail_blob_writes.store(true, Ordering::SeqCst);
        let result = session
            .add_credential(CredentialDraft::new("Lost", "me", "pw", Category::Email))
            .await;
        assert!(matches!(result, Err(VaultError::PersistenceError(_))));

        assert_eq!(session.list_credentials().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_missing_credential() {
        let (session, storage, _clock) = test_session().await;
        session.setup("secret").await.unwrap();
        session.add_credential(example_draft()).await.unwrap();
        let before = session.list_credentials().await.unwrap();
        let blob_before = storage.get_encrypted_blob().await.unwrap();

        let patch = CredentialPatch::default().with_password("newpass");
        let result = session.update_credential(Uuid::new_v4(), patch).await;

        assert!(matches!(result, Err(VaultError::CredentialNotFound(_))));
        assert_eq!(session.list_credentials().await.unwrap(), before);
        assert_eq!(storage.get_encrypted_blob().await.unwrap(), blob_before);
    }

    #[tokio::test]
    async fn test_update_and_remove_persist() {
        let (session, _storage, clock) = test_session().await;
        session.setup("secret").await.unwrap();
        let cred = session.add_credential(example_draft()).await.unwrap();
        let other = session
            .add_credential(CredentialDraft::new("Other", "me", "pw", Category::Shopping))
            .await
            .unwrap();

        clock.advance(Duration::seconds(30));
        let patch = CredentialPatch::default().with_password("newpass");
        let updated = session.update_credential(cred.id, patch).await.unwrap();
        assert_eq!(updated.updated_at, clock.now());
        assert_eq!(updated.created_at, cred.created_at);

        session.remove_credential(other.id).await.unwrap();
        assert!(matches!(
            session.remove_credential(other.id).await,
            Err(VaultError::CredentialNotFound(_))
        ));

        session.lock().await;
        session.unlock("secret").await.unwrap();

        let list = session.list_credentials().await.unwrap();
        assert_eq!(list, vec![updated]);
        assert_eq!(
            session.get_credential(cred.id).await.unwrap().password,
            "newpass"
        );
    }

    #[tokio::test]
    async fn test_search_requires_unlock() {
        let (session, _storage, _clock) = test_session().await;
        session.setup("secret").await.unwrap();
        session.add_credential(example_draft()).await.unwrap();

        let hits = session
            .search_credentials("example", Some(Category::Work))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);

        session.lock().await;
        assert!(matches!(
            session.search_credentials("example", None).await,
            Err(VaultError::VaultLocked)
        ));
    }

    #[tokio::test]
    async fn test_corrupt_payload_is_distinct_from_wrong_key() {
        let (session, storage, _clock) = test_session().await;
        session.setup("secret").await.unwrap();
        session.lock().await;

        // Right key, plaintext that is not a credential collection
        let salt = generate_salt();
        let key = derive_key("secret", &salt, &TEST_PARAMS).unwrap();
        let blob = EncryptedVaultBlob::seal(b"{\"not\":\"a list\"}", &key, salt, TEST_PARAMS).unwrap();
        storage.put_encrypted_blob(&blob).await.unwrap();

        let err = session.unlock("secret").await.unwrap_err();
        assert!(matches!(err, VaultError::CorruptData(_)));
        assert_eq!(err.user_message(), crate::error::INCORRECT_MASTER_PASSWORD);
        assert_eq!(session.state().await, VaultState::Locked);
    }

    #[tokio::test]
    async fn test_export_import() {
        let (session, _storage, _clock) = test_session().await;
        session.setup("secret").await.unwrap();
        let first = session.add_credential(example_draft()).await.unwrap();

        let exported = session.export_blob().await.unwrap().unwrap();

        session
            .add_credential(CredentialDraft::new("Later", "me", "pw", Category::Gaming))
            .await
            .unwrap();

        session.import_blob(&exported).await.unwrap();
        assert_eq!(session.state().await, VaultState::Locked);

        session.unlock("secret").await.unwrap();
        assert_eq!(session.list_credentials().await.unwrap(), vec![first]);
    }

    #[tokio::test]
    async fn test_import_foreign_blob_fails_at_unlock() {
        let (source, _s1, _c1) = test_session().await;
        source.setup("someone-else").await.unwrap();
        source.add_credential(example_draft()).await.unwrap();
        let foreign = source.export_blob().await.unwrap().unwrap();

        let (session, _storage, _clock) = test_session().await;
        session.setup("secret").await.unwrap();

        // Accepted without checking the secret
        session.import_blob(&foreign).await.unwrap();

        let err = session.unlock("secret").await.unwrap_err();
        assert!(matches!(err, VaultError::DecryptionError(_)));
        assert_eq!(session.state().await, VaultState::Locked);
    }

    #[tokio::test]
    async fn test_import_rejects_malformed_blob() {
        let (session, storage, _clock) = test_session().await;
        session.setup("secret").await.unwrap();
        let blob_before = storage.get_encrypted_blob().await.unwrap();

        assert!(matches!(
            session.import_blob("definitely not a blob").await,
            Err(VaultError::DecryptionError(_))
        ));
        assert_eq!(storage.get_encrypted_blob().await.unwrap(), blob_before);
        assert_eq!(session.state().await, VaultState::Unlocked);
    }

    #[tokio::test]
    async fn test_missing_blob_unlocks_empty() {
        let storage = Arc::new(MemoryStorage::new());
        let record = hash_secret("secret", &TEST_PARAMS).unwrap();
        storage.put_master_secret_record(&record).await.unwrap();

        let (session, _clock) = session_on(storage.clone()).await;
        assert_eq!(session.state().await, VaultState::Locked);

        session.unlock("secret").await.unwrap();
        assert!(session.list_credentials().await.unwrap().is_empty());

        session.add_credential(example_draft()).await.unwrap();
        session.lock().await;
        session.unlock("secret").await.unwrap();
        assert_eq!(session.list_credentials().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_verifier_is_integrity_error() {
        let (session, storage, _clock) = test_session().await;
        session.setup("secret").await.unwrap();
        session.lock().await;

        let broken = MasterSecretRecord {
            verifier_hash: vec![1, 2, 3],
            verifier_salt: vec![0u8; SALT_LEN],
            params: TEST_PARAMS,
        };
        storage.put_master_secret_record(&broken).await.unwrap();

        assert!(matches!(
            session.unlock("secret").await,
            Err(VaultError::IntegrityError(_))
        ));
    }

    #[tokio::test]
    async fn test_reset() {
        let (session, storage, _clock) = test_session().await;
        session.setup("secret").await.unwrap();
        session.add_credential(example_draft()).await.unwrap();

        session.reset().await.unwrap();

        assert_eq!(session.state().await, VaultState::Uninitialized);
        assert!(storage.get_master_secret_record().await.unwrap().is_none());
        assert!(storage.get_encrypted_blob().await.unwrap().is_none());

        session.setup("fresh").await.unwrap();
        assert!(session.list_credentials().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_breach_outage_does_not_affect_vault() {
        let (session, _storage, _clock) = test_session().await;
        session.setup("secret").await.unwrap();

        let status = check_password(
            &UnreachableOracle,
            "hunter2",
            std::time::Duration::from_secs(1),
        )
        .await;
        assert_eq!(status, BreachStatus::Unknown);

        session.add_credential(example_draft()).await.unwrap();
        session.lock().await;
        session.unlock("secret").await.unwrap();
        assert_eq!(session.list_credentials().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_independent_sessions_on_file_storage() {
        let temp_dir = TempDir::new().unwrap();

        {
            let storage = Arc::new(FileStorage::with_dir(temp_dir.path().to_path_buf()).unwrap());
            let (session, _clock) = session_on(storage).await;
            session.setup("Tr0ub4dor&3").await.unwrap();
            session.add_credential(example_draft()).await.unwrap();
        }

        let storage = Arc::new(FileStorage::with_dir(temp_dir.path().to_path_buf()).unwrap());
        let (session, _clock) = session_on(storage).await;
        assert_eq!(session.state().await, VaultState::Locked);

        session.unlock("Tr0ub4dor&3").await.unwrap();
        let list = session.list_credentials().await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].title, "Example");
    }
}
