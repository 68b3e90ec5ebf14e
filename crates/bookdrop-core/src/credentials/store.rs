use std::sync::{Arc, Mutex};

use thiserror::Error;

use super::CredentialRecord;

/// Errors produced by credential vault implementations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum VaultError {
    /// Missing or invalid key, path, or toggle.
    #[error("configuration error: {reason}")]
    Configuration { reason: String },
    /// No vault file present on load.
    #[error("no stored credentials at {path}")]
    NotFound { path: String },
    /// Integrity check failed: wrong key or corrupted blob.
    #[error("could not decrypt stored credentials: {reason}")]
    Decryption { reason: String },
    /// Filesystem failure on read, write, or delete.
    #[error("i/o failure: {reason}")]
    Io { reason: String },
    /// Record rejected before storing.
    #[error("invalid credentials: {reason}")]
    InvalidRecord { reason: String },
    /// Cipher failure while sealing a record.
    #[error("could not encrypt credentials: {reason}")]
    Encryption { reason: String },
}

/// What a vault currently holds, without exposing the secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialStatus {
    Missing,
    Present { account: String },
    Unreadable { reason: String },
}

impl CredentialStatus {
    pub fn is_present(&self) -> bool {
        matches!(self, CredentialStatus::Present { .. })
    }
}

/// Contract for the single-account credential vault.
///
/// `load` failures are hard failures: callers must not fall back to empty or
/// default credentials.
pub trait CredentialStore: Send + Sync {
    /// Persist the record, atomically replacing any previous one.
    fn save(&self, record: &CredentialRecord) -> Result<(), VaultError>;

    /// Retrieve and verify the stored record.
    fn load(&self) -> Result<CredentialRecord, VaultError>;

    /// Remove stored credentials (idempotent).
    fn clear(&self) -> Result<(), VaultError>;

    /// Summarize the vault contents for status displays.
    fn status(&self) -> CredentialStatus {
        match self.load() {
            Ok(record) => CredentialStatus::Present {
                account: record.masked_account(),
            },
            Err(VaultError::NotFound { .. }) => CredentialStatus::Missing,
            Err(err) => CredentialStatus::Unreadable {
                reason: err.to_string(),
            },
        }
    }
}

impl<S: CredentialStore + ?Sized> CredentialStore for Arc<S> {
    fn save(&self, record: &CredentialRecord) -> Result<(), VaultError> {
        (**self).save(record)
    }

    fn load(&self) -> Result<CredentialRecord, VaultError> {
        (**self).load()
    }

    fn clear(&self) -> Result<(), VaultError> {
        (**self).clear()
    }

    fn status(&self) -> CredentialStatus {
        (**self).status()
    }
}

/// In-memory vault that simulates encryption for tests and dry runs.
/// This is not cryptographically secure; the file vault uses AES-GCM.
#[derive(Debug, Default, Clone)]
pub struct InMemoryCredentialStore {
    inner: Arc<Mutex<Option<Vec<u8>>>>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for InMemoryCredentialStore {
    fn save(&self, record: &CredentialRecord) -> Result<(), VaultError> {
        record.validate()?;
        let plain = serde_json::to_vec(record).map_err(|err| VaultError::Encryption {
            reason: err.to_string(),
        })?;
        let mut slot = self.inner.lock().map_err(|err| VaultError::Io {
            reason: format!("lock poisoned: {err}"),
        })?;

        // XOR is a placeholder to avoid keeping plaintext around in tests.
        *slot = Some(mask(&plain));
        Ok(())
    }

    fn load(&self) -> Result<CredentialRecord, VaultError> {
        let slot = self.inner.lock().map_err(|err| VaultError::Io {
            reason: format!("lock poisoned: {err}"),
        })?;
        let masked = slot.as_ref().ok_or_else(|| VaultError::NotFound {
            path: "<memory>".to_string(),
        })?;
        serde_json::from_slice(&mask(masked)).map_err(|err| VaultError::Decryption {
            reason: err.to_string(),
        })
    }

    fn clear(&self) -> Result<(), VaultError> {
        let mut slot = self.inner.lock().map_err(|err| VaultError::Io {
            reason: format!("lock poisoned: {err}"),
        })?;
        *slot = None;
        Ok(())
    }
}

const MASK_BYTE: u8 = 0xA5;

fn mask(input: &[u8]) -> Vec<u8> {
    input.iter().map(|b| b ^ MASK_BYTE).collect()
}
