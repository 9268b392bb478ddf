//! VFS source staging.
//!
//! Resolves a VFS source (directory, `.tar`, or `.tar.gz`), stages it as a
//! gzip-compressed tarball in a securely named temp file, and enforces the
//! archive size guards. The returned temp path belongs to the caller, which
//! unlinks it once injection is done.

use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::{Error, Result};

/// Hard cap on a staged archive (1 GiB).
pub const MAX_ARCHIVE_BYTES: u64 = 1024 * 1024 * 1024;

/// Archives past this size draw a warning (100 MiB).
pub const WARN_ARCHIVE_BYTES: u64 = 100 * 1024 * 1024;

/// What a VFS source path points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VfsSource {
    /// Path does not exist.
    Missing,
    /// A directory to archive.
    Dir,
    /// An uncompressed tarball.
    Tar,
    /// An already-compressed tarball.
    TarGz,
    /// A file this tool cannot stage.
    Invalid,
}

/// Classify a VFS source path.
pub fn detect_source_type(path: &Path) -> VfsSource {
    let Ok(meta) = fs::metadata(path) else {
        return VfsSource::Missing;
    };
    if meta.is_dir() {
        return VfsSource::Dir;
    }
    if !meta.is_file() {
        return VfsSource::Invalid;
    }
    let name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
    if name.ends_with(".tar.gz") {
        VfsSource::TarGz
    } else if name.ends_with(".tar") {
        VfsSource::Tar
    } else {
        VfsSource::Invalid
    }
}

/// Resolve `source` against the directory containing `base_file`.
pub fn resolve_relative(base_file: &Path, source: &str) -> PathBuf {
    let src = Path::new(source);
    if src.is_absolute() {
        return src.to_path_buf();
    }
    base_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .join(src)
}

/// Temp directory for staging, honoring TMPDIR/TMP/TEMP.
fn staging_dir() -> PathBuf {
    for var in ["TMPDIR", "TMP", "TEMP"] {
        if let Ok(value) = std::env::var(var) {
            if !value.is_empty() {
                return PathBuf::from(value);
            }
        }
    }
    std::env::temp_dir()
}

fn staging_temp() -> Result<tempfile::NamedTempFile> {
    tempfile::Builder::new()
        .prefix("binject-vfs-")
        .suffix(".tar.gz")
        .tempfile_in(staging_dir())
        .map_err(Error::Io)
}

fn guard_archive_size(len: u64) -> Result<()> {
    if len > MAX_ARCHIVE_BYTES {
        return Err(Error::invalid_args(format!(
            "staged VFS archive is {len} bytes, over the {MAX_ARCHIVE_BYTES}-byte cap"
        )));
    }
    if len > WARN_ARCHIVE_BYTES {
        tracing::warn!(bytes = len, "VFS archive is large; startup extraction will be slow");
    }
    Ok(())
}

/// Archive a directory as TAR + GZIP(9) into a caller-owned temp file.
pub fn create_archive_from_dir(dir: &Path) -> Result<PathBuf> {
    let tmp = staging_temp()?;
    {
        let file = tmp.as_file().try_clone().map_err(Error::Io)?;
        let encoder = GzEncoder::new(file, Compression::new(9));
        let mut builder = tar::Builder::new(encoder);
        builder.append_dir_all("", dir).map_err(Error::Io)?;
        let encoder = builder.into_inner().map_err(Error::Io)?;
        let mut file = encoder.finish().map_err(Error::Io)?;
        file.flush().map_err(Error::Io)?;
    }

    guard_archive_size(tmp.as_file().metadata().map_err(Error::Io)?.len())?;
    let (_file, path) = tmp
        .keep()
        .map_err(|e| Error::write_failed(format!("keep staged archive: {e}")))?;
    Ok(path)
}

/// GZIP(9) an existing tarball into a caller-owned temp file.
pub fn compress_tar(tar: &Path) -> Result<PathBuf> {
    let meta = fs::metadata(tar).map_err(Error::Io)?;
    if meta.len() > MAX_ARCHIVE_BYTES {
        return Err(Error::invalid_args(format!(
            "tarball is {} bytes, over the {MAX_ARCHIVE_BYTES}-byte cap",
            meta.len()
        )));
    }
    let data = fs::read(tar).map_err(Error::Io)?;

    let tmp = staging_temp()?;
    {
        let file = tmp.as_file().try_clone().map_err(Error::Io)?;
        let mut encoder = GzEncoder::new(file, Compression::new(9));
        encoder.write_all(&data).map_err(Error::Io)?;
        let mut file = encoder.finish().map_err(Error::Io)?;
        file.flush().map_err(Error::Io)?;
    }

    guard_archive_size(tmp.as_file().metadata().map_err(Error::Io)?.len())?;
    let (_file, path) = tmp
        .keep()
        .map_err(|e| Error::write_failed(format!("keep staged archive: {e}")))?;
    Ok(path)
}
