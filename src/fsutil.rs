//! Atomic file persistence helpers
//!
//! State files are replaced with write-temp-then-rename so a reader never
//! observes a torn write.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Sibling temp path used while writing `path`
pub(crate) fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("state"));
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write `contents` to `path` atomically.
///
/// The data is written and synced to a sibling temp file which is then
/// renamed over the destination.
pub(crate) async fn atomic_write(path: &Path, contents: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }

    let tmp = temp_path(path);
    let result = async {
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(contents).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&tmp, path).await
    }
    .await;

    if result.is_err() {
        let _ = fs::remove_file(&tmp).await;
    }
    result
}

/// Check that files can be created next to `path`.
///
/// Creates the parent directory and round-trips a probe file.
pub(crate) async fn ensure_writable(path: &Path) -> io::Result<()> {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("state"));
    name.push(".probe");
    let probe = path.with_file_name(name);

    atomic_write(&probe, b"").await?;
    fs::remove_file(&probe).await
}
