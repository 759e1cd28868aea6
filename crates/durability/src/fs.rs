//! Crash-safe file replacement

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

/// Replace `path` with `bytes` using write-fsync-rename.
///
/// Readers see either the previous contents or the new ones, never a mix.
/// The parent directory is synced so the rename itself survives a crash.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut temp_name = path.as_os_str().to_owned();
    temp_name.push(".tmp");
    let temp_path = Path::new(&temp_name);

    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(temp_path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);

    std::fs::rename(temp_path, path)?;
    sync_parent(path)
}

/// fsync the directory containing `path`
pub fn sync_parent(path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if parent.exists() {
            // Directory handles cannot be synced on Windows.
            #[cfg(unix)]
            File::open(parent)?.sync_all()?;
        }
    }
    Ok(())
}
