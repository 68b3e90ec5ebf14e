use std::{
    path::{Path, PathBuf},
    process::Stdio,
};

use anyhow::{bail, Context};
use async_trait::async_trait;
use bookdrop_core::{
    credentials::{CredentialRecord, CredentialStore, VaultError},
    upload::{CloudUploader, UploadReceipt, UploadRequest},
};
use chrono::Utc;
use thiserror::Error;
use tokio::process::Command;
use tracing::{info, instrument, warn};

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("cloud upload is disabled")]
    Disabled,
    #[error("book file not found: {path}")]
    BookMissing { path: String },
    #[error("credentials unavailable: {0}")]
    Credentials(#[from] VaultError),
    #[error("{uploader} upload failed: {reason}")]
    Uploader {
        uploader: &'static str,
        reason: String,
    },
}

/// Fetches credentials from the vault right before each upload and hands
/// them to the configured uploader. Never retries and never falls back to
/// empty credentials.
pub struct UploadCoordinator<S: CredentialStore, U: CloudUploader> {
    store: S,
    uploader: U,
    webshop: String,
    enabled: bool,
}

impl<S: CredentialStore, U: CloudUploader> UploadCoordinator<S, U> {
    pub fn new(store: S, uploader: U, webshop: impl Into<String>, enabled: bool) -> Self {
        Self {
            store,
            uploader,
            webshop: webshop.into(),
            enabled,
        }
    }

    pub fn uploader_name(&self) -> &'static str {
        self.uploader.name()
    }

    #[instrument(skip_all, fields(book = %book_path.display(), uploader = self.uploader.name()))]
    pub async fn upload(&self, book_path: &Path) -> Result<UploadReceipt, UploadError> {
        if !self.enabled {
            return Err(UploadError::Disabled);
        }
        if !book_path.is_file() {
            return Err(UploadError::BookMissing {
                path: book_path.display().to_string(),
            });
        }

        let credentials = self.store.load().inspect_err(|err| {
            warn!("refusing to upload without valid credentials: {err}");
        })?;

        let request = UploadRequest {
            book_path: book_path.to_path_buf(),
            webshop: self.webshop.clone(),
        };
        let receipt = self
            .uploader
            .upload(&credentials, &request)
            .await
            .map_err(|err| UploadError::Uploader {
                uploader: self.uploader.name(),
                reason: format!("{err:#}"),
            })?;
        drop(credentials);

        info!(dry_run = receipt.dry_run, "book uploaded");
        Ok(receipt)
    }
}

/// Runs an external automation program (e.g. a browser script) per upload.
///
/// The book path is appended as the last argument. Credentials travel only
/// through the child's environment: `BOOKDROP_ACCOUNT`, `BOOKDROP_SECRET`,
/// and `BOOKDROP_WEBSHOP`.
#[derive(Debug, Clone)]
pub struct CommandUploader {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandUploader {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Build from a `[program, args...]` list as written in configuration.
    pub fn from_command_line(command: &[String]) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self::new(program, args.to_vec()))
    }
}

#[async_trait]
impl CloudUploader for CommandUploader {
    fn name(&self) -> &'static str {
        "command"
    }

    async fn upload(
        &self,
        credentials: &CredentialRecord,
        request: &UploadRequest,
    ) -> anyhow::Result<UploadReceipt> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(&request.book_path)
            .env("BOOKDROP_ACCOUNT", credentials.account_identifier())
            .env("BOOKDROP_SECRET", credentials.secret())
            .env("BOOKDROP_WEBSHOP", &request.webshop)
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("could not start {}", self.program.display()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("{} exited with {}: {}", self.program.display(), output.status, stderr.trim());
        }

        Ok(UploadReceipt {
            uploader: self.name().to_string(),
            book_path: request.book_path.clone(),
            uploaded_at: Utc::now(),
            dry_run: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use bookdrop_core::{credentials::InMemoryCredentialStore, upload::DryRunUploader};
    use bookdrop_vault::{CredentialVault, KdfParams, StaticKeyProvider, VaultSettings};

    use super::*;

    /// Records which accounts it was asked to upload for.
    #[derive(Default)]
    struct RecordingUploader {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CloudUploader for RecordingUploader {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn upload(
            &self,
            credentials: &CredentialRecord,
            request: &UploadRequest,
        ) -> anyhow::Result<UploadReceipt> {
            self.calls
                .lock()
                .expect("lock")
                .push(credentials.account_identifier().to_string());
            Ok(UploadReceipt {
                uploader: self.name().to_string(),
                book_path: request.book_path.clone(),
                uploaded_at: Utc::now(),
                dry_run: false,
            })
        }
    }

    fn book(dir: &Path) -> PathBuf {
        let path = dir.join("dune.epub");
        std::fs::write(&path, b"epub").expect("write book");
        path
    }

    fn stored(account: &str) -> InMemoryCredentialStore {
        let store = InMemoryCredentialStore::new();
        store
            .save(&CredentialRecord::new(account, "pw").expect("record"))
            .expect("save");
        store
    }

    #[tokio::test]
    async fn uploads_with_vault_credentials() {
        let dir = tempfile::tempdir().expect("tempdir");
        let coordinator = UploadCoordinator::new(
            stored("reader@example.com"),
            RecordingUploader::default(),
            "hugendubel",
            true,
        );

        let receipt = coordinator.upload(&book(dir.path())).await.expect("upload");
        assert_eq!(receipt.uploader, "recording");
        assert_eq!(
            *coordinator.uploader.calls.lock().unwrap(),
            vec!["reader@example.com".to_string()]
        );
    }

    #[tokio::test]
    async fn refuses_when_disabled_or_book_missing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let disabled =
            UploadCoordinator::new(stored("a@b.c"), RecordingUploader::default(), "x", false);
        assert!(matches!(
            disabled.upload(&book(dir.path())).await,
            Err(UploadError::Disabled)
        ));

        let enabled =
            UploadCoordinator::new(stored("a@b.c"), RecordingUploader::default(), "x", true);
        assert!(matches!(
            enabled.upload(&dir.path().join("missing.epub")).await,
            Err(UploadError::BookMissing { .. })
        ));
        assert!(enabled.uploader.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_credentials_abort_upload() {
        let dir = tempfile::tempdir().expect("tempdir");
        let coordinator = UploadCoordinator::new(
            InMemoryCredentialStore::new(),
            RecordingUploader::default(),
            "x",
            true,
        );
        let err = coordinator
            .upload(&book(dir.path()))
            .await
            .expect_err("no credentials");
        assert!(matches!(
            err,
            UploadError::Credentials(VaultError::NotFound { .. })
        ));
        assert!(coordinator.uploader.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn decryption_failure_never_reaches_uploader() {
        let dir = tempfile::tempdir().expect("tempdir");
        let vault_path = dir.path().join("tolino_credentials.enc");
        let kdf = KdfParams {
            memory_kib: 64,
            iterations: 1,
            parallelism: 1,
        };
        let settings = VaultSettings {
            path: vault_path,
            enabled: true,
            kdf,
        };

        CredentialVault::new(settings.clone(), StaticKeyProvider::parse("k1").unwrap())
            .unwrap()
            .save(&CredentialRecord::new("a@b.c", "pw").unwrap())
            .expect("save");

        let wrong_key =
            CredentialVault::new(settings, StaticKeyProvider::parse("k2").unwrap()).unwrap();
        let coordinator =
            UploadCoordinator::new(wrong_key, RecordingUploader::default(), "x", true);

        let err = coordinator
            .upload(&book(dir.path()))
            .await
            .expect_err("wrong key");
        assert!(matches!(
            err,
            UploadError::Credentials(VaultError::Decryption { .. })
        ));
        assert!(coordinator.uploader.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn dry_run_uploader_is_accepted() {
        let dir = tempfile::tempdir().expect("tempdir");
        let coordinator = UploadCoordinator::new(stored("a@b.c"), DryRunUploader, "x", true);
        let receipt = coordinator.upload(&book(dir.path())).await.expect("upload");
        assert!(receipt.dry_run);
        assert_eq!(coordinator.uploader_name(), "dry-run");
    }

    #[test]
    fn command_line_needs_a_program() {
        assert!(CommandUploader::from_command_line(&[]).is_none());
        let uploader =
            CommandUploader::from_command_line(&["node".into(), "upload.js".into()]).unwrap();
        assert_eq!(uploader.program, PathBuf::from("node"));
        assert_eq!(uploader.args, vec!["upload.js".to_string()]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_uploader_passes_credentials_through_environment() {
        let dir = tempfile::tempdir().expect("tempdir");
        let uploader = CommandUploader::new(
            "sh",
            vec![
                "-c".into(),
                r#"test "$BOOKDROP_ACCOUNT" = reader@example.com \
                   && test "$BOOKDROP_SECRET" = pw \
                   && test "$BOOKDROP_WEBSHOP" = hugendubel \
                   && test -f "$1""#
                    .into(),
                "upload".into(),
            ],
        );
        let coordinator =
            UploadCoordinator::new(stored("reader@example.com"), uploader, "hugendubel", true);

        let receipt = coordinator.upload(&book(dir.path())).await.expect("upload");
        assert!(!receipt.dry_run);
        assert_eq!(receipt.uploader, "command");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_uploader_reports_failures() {
        let dir = tempfile::tempdir().expect("tempdir");
        let uploader = CommandUploader::new(
            "sh",
            vec!["-c".into(), "echo login rejected >&2; exit 3".into()],
        );
        let coordinator = UploadCoordinator::new(stored("a@b.c"), uploader, "x", true);

        let err = coordinator
            .upload(&book(dir.path()))
            .await
            .expect_err("non-zero exit");
        match err {
            UploadError::Uploader { uploader, reason } => {
                assert_eq!(uploader, "command");
                assert!(reason.contains("login rejected"), "{reason}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
