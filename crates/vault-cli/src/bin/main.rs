//! Secure Vault CLI
//!
//! Every invocation opens the vault from disk, unlocks it when the command
//! needs credentials, and drops the key again on exit. Set
//! `SECURE_VAULT_PASSWORD` to skip the master-password prompt in scripts.

use clap::Parser;
use std::process;
use tracing_subscriber::EnvFilter;

use vault_cli::{output, user_message, Cli, TerminalPrompt, VaultApp};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Logs go to stderr so command output stays pipeable
    let filter = if cli.verbose {
        EnvFilter::new("info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli).await {
        output::error(&user_message(&e));
        process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut app = VaultApp::open(cli.data_dir, Box::new(TerminalPrompt)).await?;
    app.run(cli.command).await
}
