//! Code signing and atomic on-disk rewrite.
//!
//! Every mutation lands through the same contract: render to a
//! `<dest>.tmp.<pid>` sibling, fsync, chmod, sign (macOS), then rename over
//! the destination. A crash at any point leaves the destination either
//! pristine or fully written; the temporary is unlinked on every failure
//! path.

use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Sibling temporary path for an atomic rewrite of `dest`.
pub fn temp_path_for(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    dest.with_file_name(format!("{}.tmp.{}", name, std::process::id()))
}

/// Write a mutated executable image: temp, fsync, chmod, sign, rename.
pub fn write_signed(bytes: &[u8], dest: &Path) -> Result<()> {
    write_atomic(bytes, dest, true)
}

/// Write extracted payload bytes with the same atomic discipline but no
/// signing step.
pub fn write_payload(bytes: &[u8], dest: &Path) -> Result<()> {
    write_atomic(bytes, dest, false)
}

fn write_atomic(bytes: &[u8], dest: &Path, sign: bool) -> Result<()> {
    if let Some(parent) = dest.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .map_err(|e| Error::write_failed(format!("create {}: {e}", parent.display())))?;
        }
    }

    let tmp = temp_path_for(dest);
    let result = write_and_rename(bytes, &tmp, dest, sign);
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

fn write_and_rename(bytes: &[u8], tmp: &Path, dest: &Path, sign: bool) -> Result<()> {
    {
        let mut file = fs::File::create(tmp)
            .map_err(|e| Error::write_failed(format!("create {}: {e}", tmp.display())))?;
        file.write_all(bytes)
            .map_err(|e| Error::write_failed(format!("write {}: {e}", tmp.display())))?;
        file.sync_all()
            .map_err(|e| Error::write_failed(format!("fsync {}: {e}", tmp.display())))?;
    }

    set_executable(tmp)?;
    if sign {
        sign_in_place(tmp)?;
    }
    prepare_destination(dest)?;
    fs::rename(tmp, dest)
        .map_err(|e| Error::write_failed(format!("rename to {}: {e}", dest.display())))
}

#[cfg(unix)]
fn set_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = fs::metadata(path)
        .map_err(|e| Error::write_failed(format!("stat {}: {e}", path.display())))?
        .permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms)
        .map_err(|e| Error::write_failed(format!("chmod {}: {e}", path.display())))
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> Result<()> {
    Ok(())
}

/// POSIX rename replaces an existing destination; Windows requires the
/// destination gone first.
#[cfg(windows)]
fn prepare_destination(dest: &Path) -> Result<()> {
    if dest.exists() {
        fs::remove_file(dest)
            .map_err(|e| Error::write_failed(format!("remove {}: {e}", dest.display())))?;
    }
    Ok(())
}

#[cfg(not(windows))]
fn prepare_destination(_dest: &Path) -> Result<()> {
    Ok(())
}

/// Ad-hoc sign the temporary file via the platform signer.
///
/// Exit code 127 means the signer itself failed to execute, which gets a
/// distinct message from a signing failure. The follow-up `--verify` is
/// advisory only and downgrades to a warning.
#[cfg(target_os = "macos")]
fn sign_in_place(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    use std::process::Command;

    const CODESIGN: &str = "/usr/bin/codesign";

    let meta = fs::metadata(CODESIGN)
        .map_err(|_| Error::write_failed("codesign not found at /usr/bin/codesign"))?;
    if meta.permissions().mode() & 0o111 == 0 {
        return Err(Error::write_failed("/usr/bin/codesign is not executable"));
    }

    // Command::status waits with EINTR retried inside the standard library.
    let status = Command::new(CODESIGN)
        .args(["--sign", "-", "--force"])
        .arg(path)
        .status()
        .map_err(|e| Error::write_failed(format!("spawn codesign: {e}")))?;

    match status.code() {
        Some(0) => {}
        Some(127) => return Err(Error::write_failed("codesign could not be executed")),
        Some(code) => {
            return Err(Error::write_failed(format!(
                "codesign failed with status {code}"
            )))
        }
        None => return Err(Error::write_failed("codesign terminated by signal")),
    }

    match Command::new(CODESIGN).arg("--verify").arg(path).status() {
        Ok(s) if s.success() => {}
        Ok(s) => tracing::warn!(status = ?s.code(), "signature verification failed"),
        Err(e) => tracing::warn!(error = %e, "could not run signature verification"),
    }
    Ok(())
}

#[cfg(not(target_os = "macos"))]
fn sign_in_place(_path: &Path) -> Result<()> {
    Ok(())
}
