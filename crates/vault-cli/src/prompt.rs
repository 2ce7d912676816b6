//! Where passwords come from
//!
//! Every secret is returned as `Zeroizing<String>` so it is wiped on drop.

use anyhow::Result;
use zeroize::Zeroizing;

use crate::output;

/// Environment variable consulted before prompting for the master password
pub const PASSWORD_ENV: &str = "SECURE_VAULT_PASSWORD";

/// Source of passwords for commands
pub trait SecretSource: Send + Sync {
    /// Master password for an existing vault
    fn master_password(&self) -> Result<Zeroizing<String>>;

    /// A new master password (init, passwd)
    fn new_master_password(&self) -> Result<Zeroizing<String>>;

    /// Password to store in a credential
    fn credential_password(&self) -> Result<Zeroizing<String>>;
}

/// Reads from the terminal without echo, or from [`PASSWORD_ENV`]
#[derive(Debug, Default)]
pub struct TerminalPrompt;

fn from_env() -> Option<Zeroizing<String>> {
    std::env::var(PASSWORD_ENV)
        .ok()
        .filter(|pw| !pw.is_empty())
        .map(Zeroizing::new)
}

fn read(prompt: &str) -> Result<Zeroizing<String>> {
    Ok(Zeroizing::new(rpassword::prompt_password(prompt)?))
}

impl SecretSource for TerminalPrompt {
    fn master_password(&self) -> Result<Zeroizing<String>> {
        match from_env() {
            Some(pw) => Ok(pw),
            None => read("Master password: "),
        }
    }

    fn new_master_password(&self) -> Result<Zeroizing<String>> {
        if let Some(pw) = from_env() {
            return Ok(pw);
        }

        loop {
            let password = read("New master password: ")?;
            if password.is_empty() {
                output::warning("Master password cannot be empty. Try again.");
                continue;
            }

            let confirm = read("Confirm master password: ")?;
            if *password == *confirm {
                return Ok(password);
            }
            output::warning("Passwords do not match, try again.");
        }
    }

    fn credential_password(&self) -> Result<Zeroizing<String>> {
        loop {
            let password = read("Password: ")?;
            if !password.trim().is_empty() {
                return Ok(password);
            }
            output::warning("Password cannot be empty. Try again.");
        }
    }
}

#[cfg(test)]
pub(crate) struct FixedSecrets {
    pub master: &'static str,
    pub new_master: &'static str,
    pub credential: &'static str,
}

#[cfg(test)]
impl SecretSource for FixedSecrets {
    fn master_password(&self) -> Result<Zeroizing<String>> {
        Ok(Zeroizing::new(self.master.to_string()))
    }

    fn new_master_password(&self) -> Result<Zeroizing<String>> {
        Ok(Zeroizing::new(self.new_master.to_string()))
    }

    fn credential_password(&self) -> Result<Zeroizing<String>> {
        Ok(Zeroizing::new(self.credential.to_string()))
    }
}
