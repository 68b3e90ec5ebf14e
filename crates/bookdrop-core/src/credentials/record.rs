use std::fmt;

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::VaultError;

/// Decrypted cloud-account credentials (the unit of encryption).
///
/// Serialized as `{"username": ..., "password": ...}` inside the vault blob.
/// Contents are wiped from memory on drop and never shown by `Debug`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct CredentialRecord {
    #[serde(rename = "username")]
    account_identifier: String,
    #[serde(rename = "password")]
    secret: String,
}

impl CredentialRecord {
    /// Build a record, rejecting empty fields.
    pub fn new(
        account_identifier: impl Into<String>,
        secret: impl Into<String>,
    ) -> Result<Self, VaultError> {
        let record = Self {
            account_identifier: account_identifier.into(),
            secret: secret.into(),
        };
        record.validate()?;
        Ok(record)
    }

    /// Check the stored-record invariant: both fields non-empty.
    pub fn validate(&self) -> Result<(), VaultError> {
        if self.account_identifier.is_empty() {
            return Err(VaultError::InvalidRecord {
                reason: "account identifier is empty".to_string(),
            });
        }
        if self.secret.is_empty() {
            return Err(VaultError::InvalidRecord {
                reason: "secret is empty".to_string(),
            });
        }
        Ok(())
    }

    pub fn account_identifier(&self) -> &str {
        &self.account_identifier
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Account identifier safe to print or log.
    pub fn masked_account(&self) -> String {
        mask_account(&self.account_identifier)
    }
}

impl fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("account_identifier", &self.masked_account())
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Keep the first character and the mail domain: `user@example.com` -> `u***@example.com`.
pub fn mask_account(account: &str) -> String {
    let (local, domain) = match account.split_once('@') {
        Some((local, domain)) => (local, Some(domain)),
        None => (account, None),
    };
    let head: String = local.chars().take(1).collect();
    match domain {
        Some(domain) => format!("{head}***@{domain}"),
        None => format!("{head}***"),
    }
}
