//! Atomic file write helpers.
//!
//! Writes go to a temp file in the destination directory which is then renamed
//! over the target. Where rename-over-existing fails, the old file is parked as
//! `<name>.bak` for the duration of the swap and restored on failure.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use tempfile::NamedTempFile;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPolicy {
    /// `fsync` the temp file before the rename.
    Durable,
    /// Skip the `fsync`. Used for scratch data and tests.
    Fast,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOptions {
    pub sync: SyncPolicy,
    /// Restrict the written file to the current user (0o600 on Unix).
    pub owner_only: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            sync: SyncPolicy::Durable,
            owner_only: true,
        }
    }
}

/// Restore `path` from `path.bak` if a previous swap was interrupted.
///
/// Returns `true` when a backup was put back in place.
pub fn recover_bak_file(path: &Path) -> bool {
    let backup = path.with_extension("bak");
    if path.exists() || !backup.exists() {
        return false;
    }
    match fs::rename(&backup, path) {
        Ok(()) => {
            tracing::warn!(path = %path.display(), "Recovered .bak file from interrupted write");
            true
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), "Failed to recover .bak file: {e}");
            false
        }
    }
}

pub fn atomic_write(path: impl AsRef<Path>, bytes: &[u8]) -> io::Result<()> {
    atomic_write_with_options(path, bytes, WriteOptions::default())
}

pub fn atomic_write_with_options(
    path: impl AsRef<Path>,
    bytes: &[u8],
    options: WriteOptions,
) -> io::Result<()> {
    let path = path.as_ref();
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(bytes)?;
    if options.sync == SyncPolicy::Durable {
        tmp.as_file().sync_all()?;
    }
    restrict_permissions(tmp.path(), options.owner_only)?;

    if let Err(err) = tmp.persist(path) {
        if !path.exists() {
            return Err(err.error);
        }
        let backup = path.with_extension("bak");
        let _ = fs::remove_file(&backup);
        fs::rename(path, &backup)?;

        if let Err(retry) = err.file.persist(path) {
            let _ = fs::rename(&backup, path);
            return Err(retry.error);
        }
        if let Err(e) = fs::remove_file(&backup) {
            tracing::debug!(path = %backup.display(), "Failed to remove .bak after write: {e}");
        }
    }
    Ok(())
}

#[cfg(unix)]
fn restrict_permissions(path: &Path, owner_only: bool) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    if owner_only {
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path, _owner_only: bool) -> io::Result<()> {
    Ok(())
}
