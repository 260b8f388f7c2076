//! Owner-only file writes for keys and signed artifacts.
//!
//! Files are created with mode 0600 before any byte is written, so private
//! keys are never visible to other users even briefly. [`write_atomic`]
//! additionally writes through a sibling temporary file and renames it into
//! place, so a reader sees either the old file or the complete new one.

use rand::distributions::Alphanumeric;
use rand::Rng;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Permission bits for sensitive files.
#[cfg(unix)]
pub const SECURE_FILE_MODE: u32 = 0o600;

/// Permission bits for directories holding sensitive files.
#[cfg(unix)]
pub const SECURE_DIR_MODE: u32 = 0o700;

#[cfg(unix)]
fn create_secure_file(path: &Path) -> std::io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;

    OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(SECURE_FILE_MODE)
        .open(path)
}

#[cfg(not(unix))]
fn create_secure_file(path: &Path) -> std::io::Result<File> {
    tracing::warn!(
        path = %path.display(),
        "Restrictive file permissions are not supported on this platform"
    );
    OpenOptions::new().write(true).create_new(true).open(path)
}

fn temp_sibling(path: &Path) -> PathBuf {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(12)
        .map(char::from)
        .collect();
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    path.with_file_name(format!(".{}.tmp-{}", name, suffix))
}

/// Atomically replace `path` with `data`, owner read/write only.
pub fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let tmp = temp_sibling(path);
    let result = (|| {
        let mut file = create_secure_file(&tmp)?;
        file.write_all(data)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

/// Create a directory (and parents) readable only by the owner.
///
/// An existing directory is tightened to [`SECURE_DIR_MODE`].
pub fn create_secure_dir(path: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
        fs::DirBuilder::new()
            .recursive(true)
            .mode(SECURE_DIR_MODE)
            .create(path)?;
        fs::set_permissions(path, fs::Permissions::from_mode(SECURE_DIR_MODE))
    }

    #[cfg(not(unix))]
    {
        fs::create_dir_all(path)
    }
}

/// Warn when a sensitive file is readable by group or others.
#[cfg(unix)]
pub fn check_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mode = fs::metadata(path)?.permissions().mode() & 0o777;
    if mode & 0o077 != 0 {
        tracing::warn!(
            path = %path.display(),
            mode = %format!("{:o}", mode),
            "Key file is accessible by other users; consider chmod 600"
        );
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn check_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
