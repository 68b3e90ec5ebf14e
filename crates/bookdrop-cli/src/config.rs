use std::{
    fs,
    path::{Path, PathBuf},
};

use bookdrop_library::IngestSettings;
use bookdrop_vault::{KdfParams, VaultSettings};
use color_eyre::{eyre::eyre, Result};
use dirs::{config_dir, data_dir};
use serde::{Deserialize, Serialize};

/// Encryption key shipped in the deployment docs. Anyone can read it, so a
/// vault sealed with it is obfuscated rather than protected; callers warn.
pub const DOCUMENTED_DEFAULT_KEY: &str = "tolino-integration-secret-key";

/// User-level configuration loaded from `~/.config/bookdrop/config.toml`
/// (platform-specific), then overridden by environment variables.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Explicit log level (`trace` .. `error`); `RUST_LOG` still wins.
    pub log_level: Option<String>,
    /// Forces debug logging.
    pub debug: bool,
    /// Scratch directory; vault and key file default to living here.
    pub tmp_dir: Option<PathBuf>,
    pub tolino: TolinoConfig,
    pub library: LibraryConfig,
}

/// Cloud upload and credential vault settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct TolinoConfig {
    pub enabled: bool,
    pub credentials_file: Option<PathBuf>,
    pub encryption_key: Option<String>,
    pub key_source: KeySource,
    pub key_file: Option<PathBuf>,
    pub webshop: String,
    /// `[program, args...]` run per upload; empty means dry run.
    ///
    /// `TOLINO_UPLOADER_COMMAND` is split on whitespace with no quoting, so a
    /// program path or argument containing spaces must be set here as an array.
    pub uploader_command: Vec<String>,
    pub kdf: KdfParams,
}

impl Default for TolinoConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            credentials_file: None,
            encryption_key: None,
            key_source: KeySource::default(),
            key_file: None,
            webshop: "hugendubel".to_string(),
            uploader_command: Vec::new(),
            kdf: KdfParams::default(),
        }
    }
}

/// Where the vault key comes from.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum KeySource {
    /// `encryption_key` (passphrase or `base64:` raw key).
    #[default]
    Passphrase,
    /// Generated key stored in `key_file`.
    KeyFile,
    /// Generated key stored in the OS keyring.
    Keyring,
}

impl KeySource {
    fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "passphrase" | "key" => Ok(KeySource::Passphrase),
            "key-file" | "keyfile" | "file" => Ok(KeySource::KeyFile),
            "keyring" => Ok(KeySource::Keyring),
            other => Err(eyre!(
                "unknown key source {other:?} (expected passphrase, key-file, or keyring)"
            )),
        }
    }
}

/// Ingest folder settings.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct LibraryConfig {
    pub ingest_dir: Option<PathBuf>,
    pub use_book_title: bool,
    pub custom_script: Option<PathBuf>,
}

impl Config {
    pub fn tmp_dir(&self) -> PathBuf {
        self.tmp_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("bookdrop"))
    }

    pub fn credentials_file(&self) -> PathBuf {
        self.tolino
            .credentials_file
            .clone()
            .unwrap_or_else(|| self.tmp_dir().join("tolino_credentials.enc"))
    }

    pub fn key_file(&self) -> PathBuf {
        self.tolino
            .key_file
            .clone()
            .unwrap_or_else(|| self.tmp_dir().join("encryption_key.bin"))
    }

    pub fn encryption_key(&self) -> &str {
        self.tolino
            .encryption_key
            .as_deref()
            .unwrap_or(DOCUMENTED_DEFAULT_KEY)
    }

    /// True when the vault would be sealed with the publicly documented key.
    pub fn uses_documented_default_key(&self) -> bool {
        self.tolino.key_source == KeySource::Passphrase
            && self.encryption_key() == DOCUMENTED_DEFAULT_KEY
    }

    pub fn ingest_dir(&self) -> PathBuf {
        self.library.ingest_dir.clone().unwrap_or_else(|| {
            data_dir()
                .map(|base| base.join("bookdrop").join("ingest"))
                .unwrap_or_else(|| self.tmp_dir().join("ingest"))
        })
    }

    pub fn vault_settings(&self) -> VaultSettings {
        VaultSettings {
            path: self.credentials_file(),
            enabled: self.tolino.enabled,
            kdf: self.tolino.kdf,
        }
    }

    pub fn ingest_settings(&self) -> IngestSettings {
        IngestSettings {
            ingest_dir: self.ingest_dir(),
            use_book_title: self.library.use_book_title,
            custom_script: self.library.custom_script.clone(),
        }
    }

    /// Filter directive for the tracing subscriber.
    pub fn log_filter(&self) -> String {
        if self.debug {
            return "debug".to_string();
        }
        self.log_level
            .as_deref()
            .map(str::trim)
            .filter(|level| !level.is_empty())
            .map(str::to_ascii_lowercase)
            .unwrap_or_else(|| "info".to_string())
    }

    /// Apply deployment environment variables on top of file values.
    /// Blank values are treated as unset.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        if let Some(value) = get("ENABLE_TOLINO") {
            self.tolino.enabled = string_to_bool(&value);
        }
        if let Some(value) = get("TOLINO_CREDENTIALS_FILE") {
            self.tolino.credentials_file = Some(value.into());
        }
        if let Some(value) = lookup("TOLINO_ENCRYPTION_KEY").filter(|v| !v.is_empty()) {
            // Keys are taken verbatim; whitespace may be part of a passphrase.
            self.tolino.encryption_key = Some(value);
        }
        if let Some(value) = get("TOLINO_KEY_SOURCE") {
            self.tolino.key_source = KeySource::parse(&value)?;
        }
        if let Some(value) = get("ENCRYPTION_KEY_FILE") {
            self.tolino.key_file = Some(value.into());
        }
        if let Some(value) = get("TOLINO_WEBSHOP") {
            self.tolino.webshop = value;
        }
        // Whitespace split only; see `TolinoConfig::uploader_command`.
        if let Some(value) = get("TOLINO_UPLOADER_COMMAND") {
            self.tolino.uploader_command = value.split_whitespace().map(String::from).collect();
        }
        if let Some(value) = get("TMP_DIR") {
            self.tmp_dir = Some(value.into());
        }
        if let Some(value) = get("INGEST_DIR") {
            self.library.ingest_dir = Some(value.into());
        }
        if let Some(value) = get("USE_BOOK_TITLE") {
            self.library.use_book_title = string_to_bool(&value);
        }
        if let Some(value) = get("CUSTOM_SCRIPT") {
            self.library.custom_script = Some(value.into());
        }
        if let Some(value) = get("LOG_LEVEL") {
            self.log_level = Some(value);
        }
        if let Some(value) = get("DEBUG") {
            self.debug = string_to_bool(&value);
        }
        Ok(())
    }

    /// Copy safe to print: secrets replaced.
    pub fn redacted(&self) -> Config {
        let mut copy = self.clone();
        if copy.tolino.encryption_key.is_some() {
            copy.tolino.encryption_key = Some("<redacted>".to_string());
        }
        copy
    }
}

pub fn string_to_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "yes" | "1" | "y"
    )
}

/// Load config from `path` (or the default path) and apply environment overrides.
pub fn load(path: Option<&Path>) -> Result<Config> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => default_path()?,
    };
    let mut cfg = load_from_path(path)?;
    cfg.apply_env_overrides(|name| std::env::var(name).ok())?;
    Ok(cfg)
}

/// Load config from a given path; if missing or empty, return defaults.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(Config::default());
    }
    let contents = fs::read_to_string(path)?;
    if contents.trim().is_empty() {
        return Ok(Config::default());
    }
    let cfg: Config = toml::from_str(&contents)?;
    Ok(cfg)
}

/// Resolve the default config path (platform aware).
pub fn default_path() -> Result<PathBuf> {
    let base = config_dir().ok_or_else(|| eyre!("no config dir available"))?;
    Ok(base.join("bookdrop").join("config.toml"))
}

/// Write `config` to `path` unless a file already exists there, to avoid
/// clobbering user edits. Returns the path either way.
pub fn write_if_missing(config: &Config, path: &Path) -> Result<PathBuf> {
    if path.exists() {
        return Ok(path.to_path_buf());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let body = toml::to_string_pretty(config)?;
    fs::write(path, body)?;
    Ok(path.to_path_buf())
}
