//! Credential vault with authenticated encryption at rest.
//! AES-256-GCM over a single file, keyed by a configured passphrase (Argon2id),
//! a raw key, a generated key file, or the OS keyring.

mod atomic;
pub mod credential_vault;
pub mod envelope;
pub mod key_provider;

use std::path::Path;

use bookdrop_core::credentials::{CredentialRecord, CredentialStore, VaultError};

pub use credential_vault::{CredentialVault, VaultSettings};
pub use envelope::KdfParams;
pub use key_provider::{KeyMaterial, KeyProvider, StaticKeyProvider};

/// Encrypt `account_identifier`/`secret` under `key` and atomically replace `path`.
pub fn save(
    account_identifier: &str,
    secret: &str,
    key: &str,
    path: impl AsRef<Path>,
) -> Result<(), VaultError> {
    let record = CredentialRecord::new(account_identifier, secret)?;
    vault_at(key, path.as_ref())?.save(&record)
}

/// Read and decrypt the record stored at `path`.
pub fn load(key: &str, path: impl AsRef<Path>) -> Result<CredentialRecord, VaultError> {
    vault_at(key, path.as_ref())?.load()
}

/// Delete the vault file at `path`; succeeds if it is already gone.
pub fn clear(path: impl AsRef<Path>) -> Result<(), VaultError> {
    credential_vault::remove_vault_file(path.as_ref())
}

fn vault_at(key: &str, path: &Path) -> Result<CredentialVault<StaticKeyProvider>, VaultError> {
    let provider = StaticKeyProvider::parse(key)?;
    CredentialVault::new(VaultSettings::new(path), provider)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn documented_example_round_trips_and_rejects_other_key() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("v.enc");

        save("user@example.com", "p@ss", "k1", &path).expect("save");
        let record = load("k1", &path).expect("load with same key");
        assert_eq!(record.account_identifier(), "user@example.com");
        assert_eq!(record.secret(), "p@ss");

        let err = load("k2", &path).expect_err("other key must fail");
        assert!(matches!(err, VaultError::Decryption { .. }));
    }

    #[test]
    fn empty_key_is_configuration_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("v.enc");

        let err = save("user@example.com", "p@ss", "", &path).expect_err("empty key");
        assert!(matches!(err, VaultError::Configuration { .. }));
        assert!(!path.exists(), "nothing may be written on configuration errors");
    }

    #[test]
    fn raw_key_of_wrong_length_is_configuration_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = save("a@b.c", "pw", "base64:c2hvcnQ=", dir.path().join("v.enc"))
            .expect_err("16-bit raw key must be rejected");
        assert!(matches!(err, VaultError::Configuration { .. }));
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = load("k1", dir.path().join("absent.enc")).expect_err("missing");
        assert!(matches!(err, VaultError::NotFound { .. }));
    }

    #[test]
    fn clear_twice_succeeds() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("v.enc");
        save("user@example.com", "p@ss", "k1", &path).expect("save");

        clear(&path).expect("first clear");
        clear(&path).expect("second clear");
        assert!(!path.exists());
    }
}
