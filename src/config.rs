//! Build-config JSON for the CLI shell.
//!
//! An optional JSON file supplies the VFS settings and self-updater fields
//! that end up in the SVFG/SMFG records. CLI flags always win over the
//! file; the file is capped at 1 MB before parsing.

use std::fs;
use std::path::Path;

use serde::Deserialize;

use binject_pack::{Error, Result, UpdaterConfig, VfsConfig};

/// Hard cap on the build-config file.
pub const MAX_CONFIG_BYTES: u64 = 1024 * 1024;

/// Parsed build-config file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// VFS settings; overridden by any `--vfs*` flag.
    pub vfs: Option<VfsConfig>,
    /// Self-updater settings for the SMFG record.
    pub update: Option<UpdaterConfig>,
}

impl BuildConfig {
    /// Load a build config from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let meta = fs::metadata(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                Error::invalid_args(format!("config file {} not found", path.display()))
            }
            _ => Error::Io(e),
        })?;
        if meta.len() > MAX_CONFIG_BYTES {
            return Err(Error::invalid_args(format!(
                "config file {} is {} bytes, over the {MAX_CONFIG_BYTES}-byte cap",
                path.display(),
                meta.len()
            )));
        }
        let data = fs::read(path)?;
        serde_json::from_slice(&data)
            .map_err(|e| Error::invalid_args(format!("parse {}: {e}", path.display())))
    }
}
