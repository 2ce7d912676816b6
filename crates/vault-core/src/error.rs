//! Error types for vault-core

use thiserror::Error;
use uuid::Uuid;

/// Result type alias for vault operations
pub type Result<T> = std::result::Result<T, VaultError>;

/// Message shown to users for every failure caused by a bad master secret
pub const INCORRECT_MASTER_PASSWORD: &str = "Incorrect master password";

/// Vault error types
#[derive(Error, Debug)]
pub enum VaultError {
    #[error("Master secret verification failed")]
    AuthenticationFailed,

    #[error("Decryption failed: {0}")]
    DecryptionError(String),

    #[error("Corrupt vault data: {0}")]
    CorruptData(String),

    #[error("Credential not found: {0}")]
    CredentialNotFound(Uuid),

    #[error("Validation failed: {0}")]
    ValidationError(String),

    #[error("Stored verifier record is malformed: {0}")]
    IntegrityError(String),

    #[error("Persistence error: {0}")]
    PersistenceError(String),

    #[error("Vault is locked - unlock with the master password first")]
    VaultLocked,

    #[error("Vault is not initialized - run setup first")]
    VaultNotInitialized,

    #[error("Vault is already initialized")]
    AlreadyInitialized,

    #[error("Key derivation failed: {0}")]
    KeyDerivationError(String),

    #[error("Encryption failed: {0}")]
    EncryptionError(String),

    #[error("Breach check failed: {0}")]
    BreachCheckFailed(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl VaultError {
    /// Whether this failure may have been caused by a wrong master secret.
    ///
    /// Corrupt storage and a wrong key are not told apart at the cipher
    /// layer, so all three kinds count.
    pub fn is_secret_failure(&self) -> bool {
        matches!(
            self,
            VaultError::AuthenticationFailed
                | VaultError::DecryptionError(_)
                | VaultError::CorruptData(_)
        )
    }

    /// Message suitable for showing to an end user.
    pub fn user_message(&self) -> String {
        if self.is_secret_failure() {
            INCORRECT_MASTER_PASSWORD.to_string()
        } else {
            self.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_failures_share_user_message() {
        let errors = [
            VaultError::AuthenticationFailed,
            VaultError::DecryptionError("aead::Error".to_string()),
            VaultError::CorruptData("expected value at line 1".to_string()),
        ];

        for err in errors {
            assert_eq!(err.user_message(), INCORRECT_MASTER_PASSWORD);
        }
    }

    #[test]
    fn test_other_errors_keep_their_message() {
        let id = Uuid::new_v4();
        let err = VaultError::CredentialNotFound(id);
        assert!(!err.is_secret_failure());
        assert!(err.user_message().contains(&id.to_string()));
    }
}
