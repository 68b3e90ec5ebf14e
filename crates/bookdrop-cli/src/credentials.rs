use std::io::{self, BufRead};

use bookdrop_core::credentials::{CredentialRecord, CredentialStatus, CredentialStore};
use color_eyre::{
    eyre::{bail, WrapErr},
    Result,
};
use zeroize::Zeroizing;

use crate::{cli::CredentialsCommand, config, vault};

/// Execute a credentials subcommand against the configured vault.
pub fn handle(cmd: CredentialsCommand, config: &config::Config) -> Result<()> {
    match cmd {
        CredentialsCommand::Set {
            email,
            password_stdin,
        } => {
            let vault = vault::vault_from_config(config)?;
            let password = if password_stdin {
                read_password_from(io::stdin().lock())?
            } else {
                Zeroizing::new(rpassword::prompt_password("Tolino password: ")?)
            };
            let record = CredentialRecord::new(email, password.as_str())?;
            vault.save(&record).wrap_err("could not save credentials")?;
            println!(
                "Saved credentials for {} to {}",
                record.masked_account(),
                vault.path().display()
            );
        }
        CredentialsCommand::Status => {
            let vault = vault::vault_from_config(config)?;
            println!("{}", status_line(&vault.status()));
        }
        CredentialsCommand::Clear => {
            // No key needed, so a broken key setting cannot block teardown.
            let path = config.credentials_file();
            bookdrop_vault::clear(&path).wrap_err("could not clear credentials")?;
            println!("Cleared credentials at {}", path.display());
        }
    }

    Ok(())
}

pub fn status_line(status: &CredentialStatus) -> String {
    match status {
        CredentialStatus::Missing => "No credentials stored.".to_string(),
        CredentialStatus::Present { account } => format!("Credentials stored for {account}."),
        CredentialStatus::Unreadable { reason } => {
            format!("Stored credentials are unusable: {reason}")
        }
    }
}

/// First line of `reader`, without the line ending.
fn read_password_from(mut reader: impl BufRead) -> Result<Zeroizing<String>> {
    let mut line = Zeroizing::new(String::new());
    reader.read_line(&mut line)?;
    let trimmed = line.trim_end_matches(['\r', '\n']);
    if trimmed.is_empty() {
        bail!("no password given on stdin");
    }
    Ok(Zeroizing::new(trimmed.to_string()))
}
