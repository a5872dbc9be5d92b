//! Atomic file persistence shared by every component that owns a durable file.
//!
//! All durable artifacts (cookie bundle, progress snapshot, per-skill result
//! files) are rewritten whole. Writes go to a temp file in the same directory
//! followed by a rename, so readers never observe a torn file.

use std::io;
use std::path::Path;

use serde::Serialize;

/// Writes `bytes` to `path` atomically (temp file in the same directory, then
/// rename). Parent directories are created when missing.
///
/// # Errors
///
/// Returns an [`io::Error`] when the directory cannot be created, the temp
/// file cannot be written, or the rename fails.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }

    let tmp = tmp_sibling(path);
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Serializes `value` as pretty JSON and writes it atomically.
///
/// # Errors
///
/// Returns an [`io::Error`] on serialization or write failure.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
    let bytes = serde_json::to_vec_pretty(value).map_err(io::Error::other)?;
    write_atomic(path, &bytes)
}

fn tmp_sibling(path: &Path) -> std::path::PathBuf {
    let mut name = path
        .file_name()
        .map_or_else(|| std::ffi::OsString::from("file"), ToOwned::to_owned);
    name.push(".tmp");
    path.with_file_name(name)
}
