use std::path::{Path, PathBuf};

use bookdrop_core::{
    book::BookFile,
    credentials::CredentialStore,
    upload::{CloudUploader, DryRunUploader, UploadReceipt},
};
use bookdrop_library::{CommandUploader, Library, UploadCoordinator};
use color_eyre::{eyre::WrapErr, Result};
use tracing::info;

use crate::{config, vault};

pub struct IngestArgs {
    pub file: PathBuf,
    pub id: String,
    pub title: String,
    pub format: String,
    pub upload: bool,
}

/// Place a downloaded book in the ingest folder, optionally uploading it afterwards.
pub async fn ingest(args: IngestArgs, config: &config::Config) -> Result<()> {
    let library = Library::new(config.ingest_settings());
    let book = BookFile::new(args.id, args.title, args.format);
    let final_path = library
        .ingest(&book, &args.file)
        .wrap_err("could not ingest book")?;
    println!("Ingested {}", final_path.display());

    if args.upload {
        if !config.tolino.enabled {
            println!("Cloud upload is disabled; skipping.");
            return Ok(());
        }
        let receipt = upload_path(&final_path, config).await?;
        print_receipt(&receipt);
    }
    Ok(())
}

/// Upload a book file with the stored credentials.
pub async fn upload(file: &Path, config: &config::Config) -> Result<()> {
    let receipt = upload_path(file, config).await?;
    print_receipt(&receipt);
    Ok(())
}

async fn upload_path(file: &Path, config: &config::Config) -> Result<UploadReceipt> {
    let vault = vault::vault_from_config(config)?;
    let webshop = config.tolino.webshop.clone();
    let enabled = config.tolino.enabled;

    match CommandUploader::from_command_line(&config.tolino.uploader_command) {
        Some(uploader) => {
            run_upload(&UploadCoordinator::new(vault, uploader, webshop, enabled), file).await
        }
        None => {
            run_upload(
                &UploadCoordinator::new(vault, DryRunUploader, webshop, enabled),
                file,
            )
            .await
        }
    }
}

async fn run_upload<S, U>(coordinator: &UploadCoordinator<S, U>, file: &Path) -> Result<UploadReceipt>
where
    S: CredentialStore,
    U: CloudUploader,
{
    info!(uploader = coordinator.uploader_name(), "starting upload");
    coordinator
        .upload(file)
        .await
        .wrap_err_with(|| format!("could not upload {}", file.display()))
}

fn print_receipt(receipt: &UploadReceipt) {
    if receipt.dry_run {
        println!(
            "Dry run: {} was not sent (configure tolino.uploader_command to upload).",
            receipt.book_path.display()
        );
    } else {
        println!(
            "Uploaded {} via {} at {}",
            receipt.book_path.display(),
            receipt.uploader,
            receipt.uploaded_at.to_rfc3339()
        );
    }
}
