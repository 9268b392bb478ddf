//! SVFG virtual-filesystem config serializer.
//!
//! A 366-byte record the runtime stub reads to decide how the embedded VFS
//! archive is exposed: unpacked to disk, kept in memory, or a zero-length
//! compatibility marker.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Record magic; the file leads with the ASCII bytes `SVFG`.
pub const SVFG_MAGIC: [u8; 4] = *b"SVFG";

/// Record version emitted by this serializer.
pub const SVFG_VERSION: u16 = 1;

/// Record length.
pub const SVFG_LEN: usize = 366;

/// Accepted VFS modes.
pub const VFS_MODES: &[&str] = &["on-disk", "in-memory", "compat"];

/// VFS settings fed to [`serialize_svfg`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VfsConfig {
    /// One of `on-disk`, `in-memory`, `compat`.
    pub mode: String,
    /// Source path the archive was staged from.
    pub source: Option<String>,
    /// Mount prefix inside the virtual filesystem.
    pub prefix: Option<String>,
}

impl Default for VfsConfig {
    fn default() -> Self {
        Self {
            mode: "on-disk".to_string(),
            source: None,
            prefix: None,
        }
    }
}

fn put_str1(out: &mut Vec<u8>, field: &'static str, value: &str, max: usize) -> Result<()> {
    let bytes = value.as_bytes();
    if bytes.len() > max {
        return Err(Error::TooLong {
            field,
            max,
            len: bytes.len(),
        });
    }
    out.push(bytes.len() as u8);
    out.extend_from_slice(bytes);
    out.extend(std::iter::repeat(0).take(max - bytes.len()));
    Ok(())
}

fn put_str2(out: &mut Vec<u8>, field: &'static str, value: &str, max: usize) -> Result<()> {
    let bytes = value.as_bytes();
    if bytes.len() > max {
        return Err(Error::TooLong {
            field,
            max,
            len: bytes.len(),
        });
    }
    out.extend(&(bytes.len() as u16).to_le_bytes());
    out.extend_from_slice(bytes);
    out.extend(std::iter::repeat(0).take(max - bytes.len()));
    Ok(())
}

/// Serialize the 366-byte VFS config record.
pub fn serialize_svfg(config: &VfsConfig) -> Result<Vec<u8>> {
    if !VFS_MODES.contains(&config.mode.as_str()) {
        return Err(Error::invalid_args(format!(
            "vfs mode must be one of {VFS_MODES:?}, got {}",
            config.mode
        )));
    }

    let mut out = Vec::with_capacity(SVFG_LEN);
    out.extend(&SVFG_MAGIC);
    out.extend(&SVFG_VERSION.to_le_bytes());
    put_str1(&mut out, "mode", &config.mode, 32)?;
    put_str2(&mut out, "source", config.source.as_deref().unwrap_or(""), 256)?;
    put_str1(&mut out, "prefix", config.prefix.as_deref().unwrap_or(""), 64)?;
    out.extend(&[0u8; 4]);

    if out.len() != SVFG_LEN {
        return Err(Error::invalid_args(format!(
            "serialized vfs config is {} bytes, expected {SVFG_LEN}",
            out.len()
        )));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_invariant() {
        for mode in VFS_MODES {
            let config = VfsConfig {
                mode: mode.to_string(),
                source: Some("/work/app-assets".into()),
                prefix: Some("/app".into()),
            };
            assert_eq!(serialize_svfg(&config).unwrap().len(), SVFG_LEN);
        }
    }

    #[test]
    fn test_layout() {
        let config = VfsConfig {
            mode: "in-memory".to_string(),
            source: Some("assets.tar.gz".into()),
            prefix: None,
        };
        let bytes = serialize_svfg(&config).unwrap();
        assert_eq!(&bytes[0..4], b"SVFG");
        assert_eq!(u16::from_le_bytes(bytes[4..6].try_into().unwrap()), 1);
        assert_eq!(bytes[6], 9);
        assert_eq!(&bytes[7..16], b"in-memory");
        // Source slot starts after the 32-byte mode slot.
        assert_eq!(&bytes[39..41], &[13, 0]);
        assert_eq!(&bytes[41..54], b"assets.tar.gz");
    }

    #[test]
    fn test_invalid_mode_rejected() {
        let config = VfsConfig {
            mode: "ramdisk".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            serialize_svfg(&config),
            Err(Error::InvalidArgs(_))
        ));
    }

    #[test]
    fn test_oversize_prefix_rejected() {
        let config = VfsConfig {
            prefix: Some("p".repeat(65)),
            ..Default::default()
        };
        assert!(matches!(
            serialize_svfg(&config),
            Err(Error::TooLong { field: "prefix", .. })
        ));
    }

    #[test]
    fn test_deterministic_output() {
        let config = VfsConfig {
            mode: "compat".to_string(),
            source: Some("/srv/data".into()),
            prefix: Some("/data".into()),
        };
        assert_eq!(
            serialize_svfg(&config).unwrap(),
            serialize_svfg(&config).unwrap()
        );
    }
}
