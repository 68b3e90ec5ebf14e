use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use bookdrop_core::credentials::{CredentialRecord, CredentialStore, VaultError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};
use zeroize::Zeroizing;

use crate::{
    atomic,
    envelope::{self, KdfParams},
    key_provider::KeyProvider,
};

/// Where the vault lives and whether it may be used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultSettings {
    pub path: PathBuf,
    /// When false, `save` and `load` refuse to run; `clear` still works.
    pub enabled: bool,
    #[serde(default)]
    pub kdf: KdfParams,
}

impl VaultSettings {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            enabled: true,
            kdf: KdfParams::default(),
        }
    }
}

/// AES-GCM encrypted single-file vault implementing the shared `CredentialStore` contract.
pub struct CredentialVault<P: KeyProvider> {
    settings: VaultSettings,
    key_provider: P,
}

impl<P: KeyProvider> CredentialVault<P> {
    pub fn new(settings: VaultSettings, key_provider: P) -> Result<Self, VaultError> {
        if settings.path.as_os_str().is_empty() {
            return Err(VaultError::Configuration {
                reason: "vault path is empty".to_string(),
            });
        }
        if settings.path.file_name().is_none() {
            return Err(VaultError::Configuration {
                reason: format!("vault path {} does not name a file", settings.path.display()),
            });
        }
        settings
            .kdf
            .validate()
            .map_err(|reason| VaultError::Configuration { reason })?;
        Ok(Self {
            settings,
            key_provider,
        })
    }

    pub fn path(&self) -> &Path {
        &self.settings.path
    }

    pub fn settings(&self) -> &VaultSettings {
        &self.settings
    }

    /// Whether a vault file is present (its contents are not checked).
    pub fn exists(&self) -> bool {
        self.settings.path.is_file()
    }

    fn ensure_enabled(&self) -> Result<(), VaultError> {
        if self.settings.enabled {
            Ok(())
        } else {
            Err(VaultError::Configuration {
                reason: "credential vault is disabled".to_string(),
            })
        }
    }
}

impl<P: KeyProvider> CredentialStore for CredentialVault<P> {
    #[instrument(skip_all, fields(path = %self.settings.path.display()))]
    fn save(&self, record: &CredentialRecord) -> Result<(), VaultError> {
        self.ensure_enabled()?;
        record.validate()?;

        let key = self.key_provider.get_or_create()?;
        let plaintext =
            Zeroizing::new(
                serde_json::to_vec(record).map_err(|e| VaultError::Encryption {
                    reason: format!("serialize failed: {e}"),
                })?,
            );
        let blob = envelope::seal(&key, &self.settings.kdf, &plaintext)?;

        atomic::replace_with(&self.settings.path, |file| file.write_all(&blob))
            .map_err(|err| io_err(&self.settings.path, err))?;
        info!(account = %record.masked_account(), "credentials saved");
        Ok(())
    }

    #[instrument(skip_all, fields(path = %self.settings.path.display()))]
    fn load(&self) -> Result<CredentialRecord, VaultError> {
        self.ensure_enabled()?;

        let blob = read_blob(&self.settings.path)?;
        let key = self.key_provider.get()?;
        let plaintext = envelope::open(&key, &blob)?;

        let record: CredentialRecord =
            serde_json::from_slice(&plaintext).map_err(|e| VaultError::Decryption {
                reason: format!("decrypted record is malformed: {e}"),
            })?;
        record.validate().map_err(|e| VaultError::Decryption {
            reason: format!("decrypted record is incomplete: {e}"),
        })?;
        debug!(account = %record.masked_account(), "credentials loaded");
        Ok(record)
    }

    #[instrument(skip_all, fields(path = %self.settings.path.display()))]
    fn clear(&self) -> Result<(), VaultError> {
        remove_vault_file(&self.settings.path)
    }
}

pub(crate) fn remove_vault_file(path: &Path) -> Result<(), VaultError> {
    match fs::remove_file(path) {
        Ok(()) => {
            info!(path = %path.display(), "credentials cleared");
            Ok(())
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(path, err)),
    }
}

fn read_blob(path: &Path) -> Result<Vec<u8>, VaultError> {
    fs::read(path).map_err(|err| {
        if err.kind() == io::ErrorKind::NotFound {
            VaultError::NotFound {
                path: path.display().to_string(),
            }
        } else {
            io_err(path, err)
        }
    })
}

fn io_err(path: &Path, err: io::Error) -> VaultError {
    VaultError::Io {
        reason: format!("{}: {err}", path.display()),
    }
}
