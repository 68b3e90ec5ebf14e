use bookdrop_vault::{
    key_provider::{KeyFileProvider, KeyringProvider},
    CredentialVault, KeyProvider, StaticKeyProvider,
};
use color_eyre::{eyre::WrapErr, Result};
use tracing::{debug, warn};

use crate::config::{Config, KeySource};

pub type ConfiguredVault = CredentialVault<Box<dyn KeyProvider>>;

/// Build the credential vault described by the config.
pub fn vault_from_config(config: &Config) -> Result<ConfiguredVault> {
    let provider = key_provider_from_config(config)?;
    let settings = config.vault_settings();
    debug!(path = %settings.path.display(), source = ?config.tolino.key_source, "initializing credential vault");
    CredentialVault::new(settings, provider).wrap_err("invalid vault configuration")
}

fn key_provider_from_config(config: &Config) -> Result<Box<dyn KeyProvider>> {
    let provider: Box<dyn KeyProvider> = match config.tolino.key_source {
        KeySource::Passphrase => {
            if config.uses_documented_default_key() {
                warn!(
                    "TOLINO_ENCRYPTION_KEY is not set; the vault uses the publicly documented \
                     default key and offers no real confidentiality"
                );
            }
            Box::new(
                StaticKeyProvider::parse(config.encryption_key())
                    .wrap_err("invalid TOLINO_ENCRYPTION_KEY")?,
            )
        }
        KeySource::KeyFile => Box::new(KeyFileProvider::new(config.key_file())),
        KeySource::Keyring => Box::new(KeyringProvider::new("bookdrop", "vault-key")),
    };
    Ok(provider)
}

/// Helper for tests: a config whose vault lives in `root` with cheap KDF settings.
#[cfg(test)]
pub fn test_config(root: &std::path::Path) -> Config {
    let mut config = Config {
        tmp_dir: Some(root.to_path_buf()),
        ..Config::default()
    };
    config.tolino.encryption_key = Some("test-passphrase".to_string());
    config.tolino.kdf = bookdrop_vault::KdfParams {
        memory_kib: 64,
        iterations: 1,
        parallelism: 1,
    };
    config.library.ingest_dir = Some(root.join("ingest"));
    config
}
