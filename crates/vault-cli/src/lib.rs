//! # vault-cli
//!
//! Command-line front end for the vault engine in `vault-core`.

pub mod cli;
mod commands;
pub mod output;
pub mod prompt;
mod shell;

pub use cli::{Cli, Command};
pub use commands::VaultApp;
pub use prompt::{SecretSource, TerminalPrompt, PASSWORD_ENV};

use vault_core::VaultError;

/// Message to show for a failed command
///
/// Vault errors use their user-facing text, so a wrong password and a
/// tampered vault read the same.
pub fn user_message(err: &anyhow::Error) -> String {
    match err.downcast_ref::<VaultError>() {
        Some(vault_err) => vault_err.user_message(),
        None => format!("{:#}", err),
    }
}
