//! Command-line arguments

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use vault_core::password::DEFAULT_LENGTH;
use vault_core::Category;

/// Secure Vault - local password manager
#[derive(Parser, Debug)]
#[command(name = "secure-vault", version, about = "Local encrypted password vault")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Vault directory (default: the platform data directory)
    #[arg(long, env = "SECURE_VAULT_DIR", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Log progress to stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a new vault protected by a master password
    Init,

    /// Show whether the vault exists and where it is stored
    Status,

    /// Add a credential
    Add(AddArgs),

    /// List credentials
    List {
        /// Only show credentials whose title, username or url contain this
        #[arg(short, long)]
        search: Option<String>,

        /// Only show one category
        #[arg(short, long)]
        category: Option<Category>,
    },

    /// Show one credential
    Show {
        /// Credential id or a unique prefix of it
        id: String,

        /// Print the password instead of masking it
        #[arg(long)]
        reveal: bool,
    },

    /// Change fields of a credential
    Edit(EditArgs),

    /// Delete a credential
    Remove {
        /// Credential id or a unique prefix of it
        id: String,
    },

    /// Change the master password
    Passwd,

    /// Write the encrypted vault to a backup file
    Export {
        /// Destination file
        file: PathBuf,
    },

    /// Replace the encrypted vault with a backup file
    Import {
        /// Backup file produced by `export`
        file: PathBuf,
    },

    /// Check a password against known breaches
    Breach {
        /// Credential to check (prompts for a password when omitted)
        id: Option<String>,
    },

    /// Generate a random password
    Generate(GenerateArgs),

    /// Show or change settings
    Config {
        /// Idle seconds before auto-lock (0 disables it)
        #[arg(long)]
        idle_timeout: Option<u64>,
    },

    /// Interactive session that locks itself when idle
    Shell,

    /// Delete the vault and every credential in it
    Reset {
        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Args, Debug)]
pub struct AddArgs {
    /// Display name
    pub title: String,

    #[arg(short, long)]
    pub username: String,

    #[arg(short, long)]
    pub category: Category,

    #[arg(long)]
    pub url: Option<String>,

    #[arg(long)]
    pub notes: Option<String>,

    /// Generate the password instead of prompting for it
    #[arg(short, long)]
    pub generate: bool,

    /// Length of a generated password
    #[arg(short, long, default_value_t = DEFAULT_LENGTH, requires = "generate")]
    pub length: usize,
}

#[derive(Args, Debug)]
pub struct EditArgs {
    /// Credential id or a unique prefix of it
    pub id: String,

    #[arg(long)]
    pub title: Option<String>,

    #[arg(short, long)]
    pub username: Option<String>,

    #[arg(short, long)]
    pub category: Option<Category>,

    #[arg(long, conflicts_with = "clear_url")]
    pub url: Option<String>,

    #[arg(long)]
    pub clear_url: bool,

    #[arg(long, conflicts_with = "clear_notes")]
    pub notes: Option<String>,

    #[arg(long)]
    pub clear_notes: bool,

    /// Prompt for a new password
    #[arg(short, long, conflicts_with = "generate")]
    pub password: bool,

    /// Replace the password with a generated one
    #[arg(short, long)]
    pub generate: bool,
}

#[derive(Args, Debug)]
pub struct GenerateArgs {
    #[arg(short, long, default_value_t = DEFAULT_LENGTH)]
    pub length: usize,

    #[arg(long)]
    pub no_uppercase: bool,

    #[arg(long)]
    pub no_lowercase: bool,

    #[arg(long)]
    pub no_numbers: bool,

    #[arg(long)]
    pub no_symbols: bool,
}
