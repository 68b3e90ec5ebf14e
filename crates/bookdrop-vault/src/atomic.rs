use std::{
    fs::{self, File},
    io::{self, Write},
    path::Path,
};

use tempfile::Builder;
use tracing::debug;

/// Replace `path` with whatever `write` puts into a sibling temp file.
///
/// The temp file is synced and renamed over the target only after `write`
/// succeeds; on any error it is deleted and `path` keeps its old contents.
/// Files are created owner-readable only on Unix.
pub(crate) fn replace_with<F>(path: &Path, write: F) -> io::Result<()>
where
    F: FnOnce(&mut File) -> io::Result<()>,
{
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let file_name = path.file_name().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} does not name a file", path.display()),
        )
    })?;
    fs::create_dir_all(parent)?;

    let mut tmp = Builder::new()
        .prefix(&format!(".{}.", file_name.to_string_lossy()))
        .suffix(".tmp")
        .tempfile_in(parent)?;
    restrict_permissions(tmp.as_file())?;

    write(tmp.as_file_mut())?;
    tmp.as_file_mut().flush()?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;

    sync_dir(parent);
    Ok(())
}

#[cfg(unix)]
fn restrict_permissions(file: &File) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_file: &File) -> io::Result<()> {
    Ok(())
}

// Makes the rename itself durable; failure only weakens crash durability.
#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Err(err) = File::open(dir).and_then(|d| d.sync_all()) {
        debug!(dir = %dir.display(), "directory fsync failed: {err}");
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}
