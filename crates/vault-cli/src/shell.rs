//! Interactive session
//!
//! Keeps one vault session open across commands with the auto-lock task
//! running. Each command counts as activity; once the vault has locked
//! itself the next command asks for the master password again.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use vault_core::{AutoLock, Category, VaultState};

use crate::commands::VaultApp;
use crate::output;

#[derive(Parser, Debug)]
#[command(no_binary_name = true, disable_version_flag = true)]
struct ShellLine {
    #[command(subcommand)]
    command: ShellCommand,
}

#[derive(Subcommand, Debug)]
enum ShellCommand {
    /// List credentials, optionally filtered
    List {
        query: Option<String>,

        #[arg(short, long)]
        category: Option<Category>,
    },
    /// Show one credential
    Show {
        id: String,

        #[arg(long)]
        reveal: bool,
    },
    /// Lock the vault now
    Lock,
    /// Unlock the vault
    Unlock,
    /// Show the vault state
    Status,
    /// Leave the shell
    #[command(alias = "exit")]
    Quit,
}

pub async fn run(app: &mut VaultApp) -> Result<()> {
    app.ensure_unlocked().await?;

    let _auto_lock = AutoLock::spawn(app.session.clone(), app.settings.get().idle_check_interval());
    output::info("Type `help` for commands, `quit` to leave.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("vault> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let words: Vec<&str> = line.split_whitespace().collect();
        if words.is_empty() {
            continue;
        }

        let command = match ShellLine::try_parse_from(words) {
            Ok(parsed) => parsed.command,
            Err(e) => {
                // Help output and usage errors both land here
                let _ = e.print();
                continue;
            }
        };

        match execute(app, command).await {
            Ok(true) => continue,
            Ok(false) => break,
            Err(e) => output::error(&crate::user_message(&e)),
        }
    }

    app.session.lock().await;
    Ok(())
}

/// Run one shell command; `Ok(false)` ends the shell
async fn execute(app: &VaultApp, command: ShellCommand) -> Result<bool> {
    match command {
        ShellCommand::Quit => return Ok(false),
        ShellCommand::Lock => {
            app.session.lock().await;
            output::success("Vault locked");
            return Ok(true);
        }
        ShellCommand::Status => {
            let state = app.session.state().await;
            output::info(&format!("{:?}", state));
            return Ok(true);
        }
        _ => {}
    }

    if app.session.state().await == VaultState::Locked {
        output::info("Vault is locked.");
    }
    ensure_active(app).await?;

    match command {
        ShellCommand::List { query, category } => {
            let credentials = app
                .session
                .search_credentials(query.as_deref().unwrap_or(""), category)
                .await?;
            output::print_credentials(&credentials);
        }
        ShellCommand::Show { id, reveal } => {
            let id = app.resolve_id(&id).await?;
            let credential = app.session.get_credential(id).await?;
            output::print_credential(&credential, reveal);
        }
        ShellCommand::Unlock => output::success("Vault unlocked"),
        ShellCommand::Quit | ShellCommand::Lock | ShellCommand::Status => {}
    }

    Ok(true)
}

/// Unlock if needed and record activity so the command that follows runs
/// on an open vault
async fn ensure_active(app: &VaultApp) -> Result<()> {
    app.ensure_unlocked().await?;
    app.session.activity().await?;

    // Auto-lock can land between the state check and the activity; activity
    // on a locked session is a no-op, so unlock again. Unlocking records
    // activity itself.
    if !app.session.is_unlocked().await {
        app.ensure_unlocked().await?;
    }
    Ok(())
}
