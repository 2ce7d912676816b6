//! Command implementations

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;
use zeroize::Zeroizing;

use vault_core::password::StrengthLabel;
use vault_core::{
    check_password, generate_password, password_strength, BreachStatus, CredentialDraft,
    CredentialPatch, FileStorage, PasswordOptions, PwnedPasswordsClient, SessionManager,
    SettingsManager, VaultPersistence, VaultState,
};

use crate::cli::{AddArgs, Command, EditArgs, GenerateArgs};
use crate::output;
use crate::prompt::SecretSource;
use crate::shell;

/// One CLI invocation: the vault session plus where secrets come from
pub struct VaultApp {
    pub(crate) session: Arc<SessionManager>,
    pub(crate) settings: SettingsManager,
    storage_dir: PathBuf,
    backend: &'static str,
    secrets: Box<dyn SecretSource>,
}

impl VaultApp {
    pub async fn open(data_dir: Option<PathBuf>, secrets: Box<dyn SecretSource>) -> Result<Self> {
        let storage = match data_dir {
            Some(dir) => FileStorage::with_dir(dir)?,
            None => FileStorage::new()?,
        };
        let storage_dir = storage.storage_dir().to_path_buf();
        let backend = storage.backend_name();

        let settings = SettingsManager::new(&storage_dir);
        let session = SessionManager::open(Arc::new(storage), settings.get()).await?;

        debug!("Using vault in {:?}", storage_dir);

        Ok(Self {
            session: Arc::new(session),
            settings,
            storage_dir,
            backend,
            secrets,
        })
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    pub async fn run(&mut self, command: Command) -> Result<()> {
        match command {
            Command::Init => self.init().await,
            Command::Status => self.status().await,
            Command::Add(args) => self.add(args).await,
            Command::List { search, category } => {
                self.ensure_unlocked().await?;
                let credentials = match (&search, category) {
                    (None, None) => self.session.list_credentials().await?,
                    _ => {
                        self.session
                            .search_credentials(search.as_deref().unwrap_or(""), category)
                            .await?
                    }
                };
                output::print_credentials(&credentials);
                Ok(())
            }
            Command::Show { id, reveal } => {
                self.ensure_unlocked().await?;
                let id = self.resolve_id(&id).await?;
                let credential = self.session.get_credential(id).await?;
                output::print_credential(&credential, reveal);
                Ok(())
            }
            Command::Edit(args) => self.edit(args).await,
            Command::Remove { id } => {
                self.ensure_unlocked().await?;
                let id = self.resolve_id(&id).await?;
                self.session.remove_credential(id).await?;
                output::success("Credential deleted");
                Ok(())
            }
            Command::Passwd => self.passwd().await,
            Command::Export { file } => self.export(&file).await,
            Command::Import { file } => self.import(&file).await,
            Command::Breach { id } => self.breach(id.as_deref()).await,
            Command::Generate(args) => generate(args),
            Command::Config { idle_timeout } => self.config(idle_timeout).await,
            Command::Shell => shell::run(self).await,
            Command::Reset { yes } => self.reset(yes).await,
        }
    }

    /// Prompt for the master password unless the session is already open
    pub(crate) async fn ensure_unlocked(&self) -> Result<()> {
        match self.session.state().await {
            VaultState::Unlocked => Ok(()),
            VaultState::Uninitialized => {
                bail!("No vault found. Run `secure-vault init` first.")
            }
            VaultState::Locked => {
                let password = self.secrets.master_password()?;
                self.session.unlock(&password).await?;
                Ok(())
            }
        }
    }

    /// Accept a full id or a unique prefix of one
    pub(crate) async fn resolve_id(&self, raw: &str) -> Result<Uuid> {
        if let Ok(id) = Uuid::parse_str(raw) {
            return Ok(id);
        }

        let needle = raw.trim().to_ascii_lowercase().replace('-', "");
        if needle.is_empty() {
            bail!("Credential id is required");
        }

        let matches: Vec<Uuid> = self
            .session
            .list_credentials()
            .await?
            .iter()
            .map(|c| c.id)
            .filter(|id| id.simple().to_string().starts_with(&needle))
            .collect();

        match matches.as_slice() {
            [id] => Ok(*id),
            [] => bail!("No credential matches '{}'", raw),
            _ => bail!(
                "'{}' matches {} credentials; use more characters",
                raw,
                matches.len()
            ),
        }
    }

    async fn init(&self) -> Result<()> {
        if self.session.state().await != VaultState::Uninitialized {
            bail!(
                "A vault already exists in {}",
                self.storage_dir.display()
            );
        }

        let password = self.secrets.new_master_password()?;
        let strength = password_strength(&password);
        if strength.label < StrengthLabel::Good {
            output::warning(&format!("Master password strength: {}", strength.label));
        }

        self.session.setup(&password).await?;
        output::success(&format!("Vault created in {}", self.storage_dir.display()));
        Ok(())
    }

    async fn status(&self) -> Result<()> {
        let state = match self.session.state().await {
            VaultState::Uninitialized => "not initialized",
            VaultState::Locked => "locked",
            VaultState::Unlocked => "unlocked",
        };

        let auto_lock = match self.session.idle_timeout() {
            Some(timeout) => format!("after {}s idle", timeout.num_seconds()),
            None => "disabled".to_string(),
        };

        println!("Vault:     {}", state);
        println!("Location:  {}", self.storage_dir.display());
        println!("Backend:   {}", self.backend);
        println!("Auto-lock: {}", auto_lock);
        Ok(())
    }

    async fn add(&self, args: AddArgs) -> Result<()> {
        self.ensure_unlocked().await?;

        let password = if args.generate {
            Zeroizing::new(generate_password(args.length, PasswordOptions::default())?)
        } else {
            self.secrets.credential_password()?
        };

        let mut draft =
            CredentialDraft::new(args.title, args.username, password.as_str(), args.category);
        if let Some(url) = args.url {
            draft = draft.with_url(url);
        }
        if let Some(notes) = args.notes {
            draft = draft.with_notes(notes);
        }

        let credential = self.session.add_credential(draft).await?;
        output::success(&format!(
            "Added '{}' ({})",
            credential.title,
            output::short_id(&credential)
        ));

        self.warn_if_breached(&password).await;
        Ok(())
    }

    async fn edit(&self, args: EditArgs) -> Result<()> {
        self.ensure_unlocked().await?;
        let id = self.resolve_id(&args.id).await?;

        let new_password = if args.generate {
            Some(Zeroizing::new(generate_password(
                vault_core::password::DEFAULT_LENGTH,
                PasswordOptions::default(),
            )?))
        } else if args.password {
            Some(self.secrets.credential_password()?)
        } else {
            None
        };

        let mut patch = CredentialPatch::default();
        if let Some(title) = args.title {
            patch = patch.with_title(title);
        }
        if let Some(username) = args.username {
            patch = patch.with_username(username);
        }
        if let Some(category) = args.category {
            patch = patch.with_category(category);
        }
        if args.clear_url {
            patch = patch.with_url(None);
        } else if let Some(url) = args.url {
            patch = patch.with_url(Some(url));
        }
        if args.clear_notes {
            patch = patch.with_notes(None);
        } else if let Some(notes) = args.notes {
            patch = patch.with_notes(Some(notes));
        }
        if let Some(password) = &new_password {
            patch = patch.with_password(password.as_str());
        }

        if patch.is_empty() {
            bail!("Nothing to change");
        }

        let credential = self.session.update_credential(id, patch).await?;
        output::success(&format!("Updated '{}'", credential.title));

        if let Some(password) = &new_password {
            self.warn_if_breached(password).await;
        }
        Ok(())
    }

    async fn passwd(&self) -> Result<()> {
        let state = self.session.state().await;
        if state == VaultState::Uninitialized {
            bail!("No vault found. Run `secure-vault init` first.");
        }

        let current = self.secrets.master_password()?;
        if state == VaultState::Locked {
            self.session.unlock(&current).await?;
        }

        let new = self.secrets.new_master_password()?;
        self.session.change_master_secret(&current, &new).await?;

        output::success("Master password changed");
        Ok(())
    }

    async fn export(&self, file: &Path) -> Result<()> {
        let Some(blob) = self.session.export_blob().await? else {
            bail!("Nothing to export: no vault has been created");
        };

        tokio::fs::write(file, blob)
            .await
            .with_context(|| format!("writing {}", file.display()))?;

        output::success(&format!("Encrypted vault written to {}", file.display()));
        Ok(())
    }

    async fn import(&self, file: &Path) -> Result<()> {
        let data = tokio::fs::read_to_string(file)
            .await
            .with_context(|| format!("reading {}", file.display()))?;

        self.session.import_blob(data.trim()).await?;

        output::success(&format!("Imported {}", file.display()));
        output::info("The vault is locked; it opens with the master password it was exported under.");
        Ok(())
    }

    async fn breach(&self, id: Option<&str>) -> Result<()> {
        let password = match id {
            Some(raw) => {
                self.ensure_unlocked().await?;
                let id = self.resolve_id(raw).await?;
                let credential = self.session.get_credential(id).await?;
                Zeroizing::new(credential.password.clone())
            }
            None => self.secrets.credential_password()?,
        };

        let settings = &self.settings.get().breach_check;
        let client = PwnedPasswordsClient::new(settings)?;

        match check_password(&client, &password, settings.timeout()).await {
            BreachStatus::Breached { count } => output::warning(&format!(
                "This password has appeared in {} known breaches",
                count
            )),
            BreachStatus::NotBreached => output::success("Not found in any known breach"),
            BreachStatus::Unknown => output::warning("Breach check unavailable right now"),
        }
        Ok(())
    }

    /// Advisory lookup after storing a password; never fails the command
    async fn warn_if_breached(&self, password: &str) {
        let settings = &self.settings.get().breach_check;
        if !settings.enabled {
            return;
        }

        let client = match PwnedPasswordsClient::new(settings) {
            Ok(client) => client,
            Err(e) => {
                debug!("Skipping breach check: {}", e);
                return;
            }
        };

        match check_password(&client, password, settings.timeout()).await {
            BreachStatus::Breached { count } => output::warning(&format!(
                "This password has appeared in {} known breaches; consider changing it",
                count
            )),
            BreachStatus::NotBreached => {}
            BreachStatus::Unknown => debug!("Breach status unknown"),
        }
    }

    async fn config(&mut self, idle_timeout: Option<u64>) -> Result<()> {
        if let Some(secs) = idle_timeout {
            self.settings.set_idle_timeout(secs).await?;
            output::success("Settings saved");
        }

        println!("{}", serde_json::to_string_pretty(self.settings.get())?);
        Ok(())
    }

    async fn reset(&self, yes: bool) -> Result<()> {
        if !yes {
            bail!("Refusing to reset without --yes: this deletes every credential");
        }

        self.session.reset().await?;
        output::success("Vault deleted");
        Ok(())
    }
}

fn generate(args: GenerateArgs) -> Result<()> {
    let options = PasswordOptions {
        uppercase: !args.no_uppercase,
        lowercase: !args.no_lowercase,
        numbers: !args.no_numbers,
        symbols: !args.no_symbols,
    };

    let password = Zeroizing::new(generate_password(args.length, options)?);
    println!("{}", *password);
    eprintln!("Strength: {}", password_strength(&password).label);
    Ok(())
}
