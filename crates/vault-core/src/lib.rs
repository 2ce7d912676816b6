//! # vault-core
//!
//! Core functionality for a local password vault:
//! - Argon2id master-secret verification and key derivation
//! - AES-256-GCM encryption of the whole credential collection
//! - Session state machine with idle auto-lock
//! - Pluggable persistence (single JSON file or memory)
//! - Advisory breach lookups using k-anonymity

pub mod breach;
pub mod clock;
pub mod credential;
pub mod crypto;
pub mod error;
pub mod password;
pub mod session;
pub mod settings;
pub mod storage;

pub use breach::{check_password, BreachOracle, BreachReport, BreachStatus, PwnedPasswordsClient};
pub use clock::{Clock, ManualClock, SystemClock};
pub use credential::{Category, Credential, CredentialDraft, CredentialPatch, CredentialStore};
pub use crypto::{EncryptedVaultBlob, KeyDerivationParams, MasterKey, MasterSecretRecord};
pub use error::{Result, VaultError, INCORRECT_MASTER_PASSWORD};
pub use password::{generate_password, password_strength, PasswordOptions, PasswordStrength};
pub use session::{AutoLock, SessionManager, VaultState};
pub use settings::{BreachCheckSettings, Settings, SettingsManager};
pub use storage::{FileStorage, MemoryStorage, VaultPersistence};
