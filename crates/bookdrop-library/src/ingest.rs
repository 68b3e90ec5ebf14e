use std::{
    fs, io,
    path::{Component, Path, PathBuf},
    process::Command,
};

use bookdrop_core::book::BookFile;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// How finished downloads are placed into the library ingest folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestSettings {
    pub ingest_dir: PathBuf,
    /// Name files after the sanitized title instead of the book id.
    pub use_book_title: bool,
    /// Program run with the downloaded path before the file is moved.
    pub custom_script: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("downloaded file not found: {path}")]
    SourceMissing { path: String },
    #[error("book id {id:?} cannot be used as a file name")]
    InvalidId { id: String },
    #[error("could not move {from} into the library: {reason}")]
    Move { from: String, reason: String },
}

/// The ingest folder watched by the library manager.
pub struct Library {
    settings: IngestSettings,
}

impl Library {
    pub fn new(settings: IngestSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &IngestSettings {
        &self.settings
    }

    /// File name (with extension) the book will get in the ingest folder.
    pub fn file_name_for(&self, book: &BookFile) -> String {
        let stem = if self.settings.use_book_title {
            let title = sanitize_filename(&book.title);
            if title.is_empty() {
                book.id.clone()
            } else {
                title
            }
        } else {
            book.id.clone()
        };
        format!("{stem}.{}", book.format)
    }

    /// Move a finished download into the ingest folder and return its final path.
    ///
    /// The file first lands under the bare book id (no extension) and is then
    /// renamed, so watchers never pick up a partially copied book.
    #[instrument(skip_all, fields(book = %book.id))]
    pub fn ingest(&self, book: &BookFile, downloaded: &Path) -> Result<PathBuf, IngestError> {
        if !downloaded.is_file() {
            return Err(IngestError::SourceMissing {
                path: downloaded.display().to_string(),
            });
        }

        if !is_plain_file_name(&book.id) {
            return Err(IngestError::InvalidId { id: book.id.clone() });
        }

        if let Some(script) = &self.settings.custom_script {
            run_custom_script(script, downloaded);
        }

        let move_err = |reason: io::Error| IngestError::Move {
            from: downloaded.display().to_string(),
            reason: reason.to_string(),
        };
        fs::create_dir_all(&self.settings.ingest_dir).map_err(move_err)?;

        let intermediate = self.settings.ingest_dir.join(&book.id);
        let final_path = self.settings.ingest_dir.join(self.file_name_for(book));
        info!(
            from = %downloaded.display(),
            to = %final_path.display(),
            "moving book into ingest folder"
        );
        move_file(downloaded, &intermediate).map_err(move_err)?;
        fs::rename(&intermediate, &final_path).map_err(move_err)?;
        Ok(final_path)
    }
}

/// Keep alphanumerics, spaces, dots and underscores; drop trailing whitespace.
pub fn sanitize_filename(name: &str) -> String {
    let kept: String = name
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '.' | '_'))
        .collect();
    kept.trim_end().to_string()
}

/// A single normal path component, so joining it stays inside the ingest folder.
fn is_plain_file_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !name.contains(['/', '\\'])
}

fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(err) => {
            // Rename fails across filesystems (e.g. tmpfs download dir).
            debug!("rename failed ({err}), copying instead");
            fs::copy(from, to)?;
            fs::remove_file(from)
        }
    }
}

fn run_custom_script(script: &Path, book: &Path) {
    info!(script = %script.display(), "running custom script");
    match Command::new(script).arg(book).status() {
        Ok(status) if status.success() => {}
        Ok(status) => warn!(script = %script.display(), %status, "custom script failed"),
        Err(err) => warn!(script = %script.display(), "could not run custom script: {err}"),
    }
}
