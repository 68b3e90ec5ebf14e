use std::{
    fmt, fs, io,
    io::Write,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use base64::{
    engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD},
    Engine as _,
};
use bookdrop_core::credentials::VaultError;
use rand::{rngs::OsRng, RngCore};
use thiserror::Error;
use tracing::info;
use zeroize::Zeroizing;

use crate::atomic;

/// Length of an AES-256 key.
pub const KEY_LEN: usize = 32;

/// Prefix marking a configured key as raw base64 bytes rather than a passphrase.
pub const RAW_KEY_PREFIX: &str = "base64:";

/// Key material used for encryption at rest. Never logged.
#[derive(Clone, PartialEq, Eq)]
pub enum KeyMaterial {
    /// 256-bit key used directly as the AES key.
    Raw(Zeroizing<[u8; KEY_LEN]>),
    /// Secret stretched with Argon2id and a per-blob salt.
    Passphrase(Zeroizing<String>),
}

impl KeyMaterial {
    /// Parse a configured key: `base64:<32 bytes>` is a raw key, anything else
    /// non-empty is a passphrase.
    pub fn parse(input: &str) -> Result<Self, KeyError> {
        if input.is_empty() {
            return Err(KeyError::Invalid("encryption key is empty".to_string()));
        }
        match input.strip_prefix(RAW_KEY_PREFIX) {
            Some(encoded) => decode_key(encoded),
            None => Ok(KeyMaterial::Passphrase(Zeroizing::new(input.to_string()))),
        }
    }

    /// Fresh random raw key.
    pub fn generate() -> Self {
        let mut bytes = Zeroizing::new([0u8; KEY_LEN]);
        OsRng.fill_bytes(bytes.as_mut());
        KeyMaterial::Raw(bytes)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            KeyMaterial::Raw(_) => "raw",
            KeyMaterial::Passphrase(_) => "passphrase",
        }
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyMaterial::{}(<redacted>)", self.kind())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("invalid key: {0}")]
    Invalid(String),
    #[error("no key available: {0}")]
    Missing(String),
    #[error("keyring error: {0}")]
    Keyring(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("key file error: {0}")]
    Io(String),
}

impl From<KeyError> for VaultError {
    fn from(err: KeyError) -> Self {
        match err {
            KeyError::Io(_) => VaultError::Io {
                reason: err.to_string(),
            },
            other => VaultError::Configuration {
                reason: other.to_string(),
            },
        }
    }
}

/// Provides the vault key (configuration, key file, OS keychain, or memory in tests).
pub trait KeyProvider: Send + Sync {
    /// Key for sealing; providers that own their key may create it here.
    fn get_or_create(&self) -> Result<KeyMaterial, KeyError>;

    /// Key for opening; must not create a new key.
    fn get(&self) -> Result<KeyMaterial, KeyError> {
        self.get_or_create()
    }
}

impl<P: KeyProvider + ?Sized> KeyProvider for Box<P> {
    fn get_or_create(&self) -> Result<KeyMaterial, KeyError> {
        (**self).get_or_create()
    }

    fn get(&self) -> Result<KeyMaterial, KeyError> {
        (**self).get()
    }
}

/// Key fixed by deployment configuration.
#[derive(Debug, Clone)]
pub struct StaticKeyProvider {
    material: KeyMaterial,
}

impl StaticKeyProvider {
    pub fn new(material: KeyMaterial) -> Self {
        Self { material }
    }

    pub fn parse(input: &str) -> Result<Self, KeyError> {
        KeyMaterial::parse(input).map(Self::new)
    }
}

impl KeyProvider for StaticKeyProvider {
    fn get_or_create(&self) -> Result<KeyMaterial, KeyError> {
        Ok(self.material.clone())
    }
}

/// Raw key stored base64-encoded in a file, generated on first save.
#[derive(Debug, Clone)]
pub struct KeyFileProvider {
    path: PathBuf,
}

impl KeyFileProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<Option<KeyMaterial>, KeyError> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => {
                let contents = Zeroizing::new(contents);
                decode_key(contents.trim()).map(Some)
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(key_file_err(&self.path, err)),
        }
    }
}

impl KeyProvider for KeyFileProvider {
    fn get_or_create(&self) -> Result<KeyMaterial, KeyError> {
        if let Some(existing) = self.read()? {
            return Ok(existing);
        }

        let material = KeyMaterial::generate();
        let encoded = Zeroizing::new(encode_key(&material)?);
        atomic::replace_with(&self.path, |file| file.write_all(encoded.as_bytes()))
            .map_err(|err| key_file_err(&self.path, err))?;
        info!(path = %self.path.display(), "generated new encryption key file");
        Ok(material)
    }

    fn get(&self) -> Result<KeyMaterial, KeyError> {
        self.read()?.ok_or_else(|| {
            KeyError::Missing(format!("key file {} does not exist", self.path.display()))
        })
    }
}

/// OS keyring-backed provider. Uses the `keyring` crate to store the key.
pub struct KeyringProvider {
    service: String,
    account: String,
}

impl KeyringProvider {
    pub fn new(service: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            account: account.into(),
        }
    }

    fn entry(&self) -> Result<keyring::Entry, KeyError> {
        keyring::Entry::new(&self.service, &self.account)
            .map_err(|err| KeyError::Keyring(err.to_string()))
    }
}

impl KeyProvider for KeyringProvider {
    fn get_or_create(&self) -> Result<KeyMaterial, KeyError> {
        load_or_generate(&self.entry()?)
    }

    fn get(&self) -> Result<KeyMaterial, KeyError> {
        match self.entry()?.get_password() {
            Ok(secret) => decode_key(&Zeroizing::new(secret)),
            Err(keyring::Error::NoEntry) => Err(KeyError::Missing(format!(
                "no keyring entry for {}/{}",
                self.service, self.account
            ))),
            Err(err) => Err(KeyError::Keyring(err.to_string())),
        }
    }
}

/// Only a missing entry triggers generation; any other keyring failure is
/// returned so an existing key is never replaced.
fn load_or_generate(entry: &keyring::Entry) -> Result<KeyMaterial, KeyError> {
    match entry.get_password() {
        Ok(secret) => decode_key(&Zeroizing::new(secret)),
        Err(keyring::Error::NoEntry) => {
            let material = KeyMaterial::generate();
            entry
                .set_password(&encode_key(&material)?)
                .map_err(|e| KeyError::Keyring(e.to_string()))?;
            info!("generated new encryption key in OS keyring");
            Ok(material)
        }
        Err(err) => Err(KeyError::Keyring(err.to_string())),
    }
}

/// In-memory key provider for tests and ephemeral sessions.
#[derive(Debug, Default, Clone)]
pub struct InMemoryKeyProvider {
    inner: Arc<Mutex<Option<KeyMaterial>>>,
}

impl KeyProvider for InMemoryKeyProvider {
    fn get_or_create(&self) -> Result<KeyMaterial, KeyError> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|err| KeyError::Missing(format!("lock poisoned: {err}")))?;

        if let Some(existing) = guard.clone() {
            return Ok(existing);
        }

        let material = KeyMaterial::generate();
        *guard = Some(material.clone());
        Ok(material)
    }
}

/// Base64 form of a raw key, as stored in key files and the keyring.
pub fn encode_key(material: &KeyMaterial) -> Result<String, KeyError> {
    match material {
        KeyMaterial::Raw(bytes) => Ok(STANDARD.encode(&bytes[..])),
        KeyMaterial::Passphrase(_) => Err(KeyError::Invalid(
            "only raw keys can be encoded".to_string(),
        )),
    }
}

/// Decode a raw key from any common base64 alphabet.
pub fn decode_key(encoded: &str) -> Result<KeyMaterial, KeyError> {
    let encoded = encoded.trim();
    let bytes = Zeroizing::new(
        [&STANDARD, &URL_SAFE, &STANDARD_NO_PAD, &URL_SAFE_NO_PAD]
            .iter()
            .find_map(|engine| engine.decode(encoded).ok())
            .ok_or_else(|| KeyError::Decode("key is not valid base64".to_string()))?,
    );

    if bytes.len() != KEY_LEN {
        return Err(KeyError::Invalid(format!(
            "expected {KEY_LEN} key bytes for AES-256, got {}",
            bytes.len()
        )));
    }

    let mut out = Zeroizing::new([0u8; KEY_LEN]);
    out.copy_from_slice(&bytes);
    Ok(KeyMaterial::Raw(out))
}

fn key_file_err(path: &Path, err: io::Error) -> KeyError {
    KeyError::Io(format!("{}: {err}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_provider_returns_same_key() {
        let provider = InMemoryKeyProvider::default();
        let first = provider.get_or_create().unwrap();
        let second = provider.get().unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn parse_distinguishes_raw_and_passphrase() {
        let raw = format!("{RAW_KEY_PREFIX}{}", STANDARD.encode([7u8; KEY_LEN]));
        assert_eq!(KeyMaterial::parse(&raw).unwrap().kind(), "raw");
        assert_eq!(KeyMaterial::parse("k1").unwrap().kind(), "passphrase");
    }

    #[test]
    fn parse_rejects_empty_and_short_keys() {
        assert!(matches!(
            KeyMaterial::parse(""),
            Err(KeyError::Invalid(_))
        ));
        assert!(matches!(
            KeyMaterial::parse("base64:abcd"),
            Err(KeyError::Invalid(_))
        ));
        assert!(matches!(
            KeyMaterial::parse("base64:!!not base64!!"),
            Err(KeyError::Decode(_))
        ));
    }

    #[test]
    fn decode_accepts_url_safe_keys() {
        let bytes = [0xFBu8; KEY_LEN];
        let decoded = decode_key(&URL_SAFE.encode(bytes)).expect("url-safe key");
        assert_eq!(decoded, KeyMaterial::Raw(Zeroizing::new(bytes)));
    }

    #[test]
    fn debug_redacts_key_bytes() {
        let rendered = format!("{:?}", KeyMaterial::parse("hunter2").unwrap());
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn key_file_is_generated_once_and_reused() {
        let dir = tempfile::tempdir().expect("tempdir");
        let provider = KeyFileProvider::new(dir.path().join("keys").join("encryption_key.bin"));

        let err = provider.get().expect_err("no key file yet");
        assert!(matches!(err, KeyError::Missing(_)));

        let first = provider.get_or_create().expect("generate");
        let second = provider.get_or_create().expect("reuse");
        let read_back = provider.get().expect("read");
        assert_eq!(first, second);
        assert_eq!(first, read_back);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(provider.path()).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn corrupt_key_file_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("encryption_key.bin");
        fs::write(&path, "too-short").unwrap();

        let provider = KeyFileProvider::new(&path);
        assert!(provider.get().is_err());
        assert!(provider.get_or_create().is_err(), "must not overwrite a corrupt key");
    }

    #[test]
    fn key_errors_map_to_vault_taxonomy() {
        let io: VaultError = KeyError::Io("denied".into()).into();
        assert!(matches!(io, VaultError::Io { .. }));
        let invalid: VaultError = KeyError::Invalid("empty".into()).into();
        assert!(matches!(invalid, VaultError::Configuration { .. }));
    }

    fn mock_entry() -> keyring::Entry {
        keyring::set_default_credential_builder(keyring::mock::default_credential_builder());
        keyring::Entry::new("bookdrop-test", "vault-key").unwrap()
    }

    #[test]
    fn keyring_generates_only_when_entry_is_missing() {
        let entry = mock_entry();
        let created = load_or_generate(&entry).unwrap();
        let stored = entry.get_password().unwrap();
        assert_eq!(decode_key(&stored).unwrap(), created);
        assert_eq!(load_or_generate(&entry).unwrap(), created);
    }

    #[test]
    fn keyring_failure_does_not_replace_existing_key() {
        let entry = mock_entry();
        let existing = load_or_generate(&entry).unwrap();

        let mock: &keyring::mock::MockCredential =
            entry.get_credential().downcast_ref().unwrap();
        mock.set_error(keyring::Error::PlatformFailure("keychain locked".into()));

        let err = load_or_generate(&entry).unwrap_err();
        assert!(matches!(err, KeyError::Keyring(_)));
        assert_eq!(load_or_generate(&entry).unwrap(), existing);
    }

    #[test]
    fn keyring_failure_on_empty_entry_generates_nothing() {
        let entry = mock_entry();
        let mock: &keyring::mock::MockCredential =
            entry.get_credential().downcast_ref().unwrap();
        mock.set_error(keyring::Error::PlatformFailure("dbus unavailable".into()));

        assert!(matches!(load_or_generate(&entry), Err(KeyError::Keyring(_))));
        assert!(matches!(entry.get_password(), Err(keyring::Error::NoEntry)));
    }
}
