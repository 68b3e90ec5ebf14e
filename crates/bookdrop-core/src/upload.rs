use std::path::PathBuf;

use anyhow::{ensure, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::credentials::CredentialRecord;

/// A book to push into the cloud reading account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UploadRequest {
    pub book_path: PathBuf,
    /// Partner webshop whose reader login is used (e.g. `hugendubel`).
    pub webshop: String,
}

/// Result of a completed upload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UploadReceipt {
    pub uploader: String,
    pub book_path: PathBuf,
    pub uploaded_at: DateTime<Utc>,
    /// Whether anything was actually sent.
    pub dry_run: bool,
}

/// Contract for anything that drives an authenticated cloud session
/// (browser automation, external scripts, stubs).
///
/// Implementations receive credentials per call and must not persist them.
#[async_trait]
pub trait CloudUploader: Send + Sync {
    /// Short name used for logging and receipts.
    fn name(&self) -> &'static str;

    async fn upload(
        &self,
        credentials: &CredentialRecord,
        request: &UploadRequest,
    ) -> Result<UploadReceipt>;
}

/// Uploader that only logs; useful for tests and deployments without automation.
pub struct DryRunUploader;

#[async_trait]
impl CloudUploader for DryRunUploader {
    fn name(&self) -> &'static str {
        "dry-run"
    }

    async fn upload(
        &self,
        credentials: &CredentialRecord,
        request: &UploadRequest,
    ) -> Result<UploadReceipt> {
        ensure!(
            request.book_path.is_file(),
            "book file not found: {}",
            request.book_path.display()
        );
        info!(
            account = %credentials.masked_account(),
            webshop = %request.webshop,
            book = %request.book_path.display(),
            "dry run: skipping cloud upload"
        );
        Ok(UploadReceipt {
            uploader: self.name().to_string(),
            book_path: request.book_path.clone(),
            uploaded_at: Utc::now(),
            dry_run: true,
        })
    }
}
