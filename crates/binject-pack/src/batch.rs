//! One-pass injection of the SEA payload family.
//!
//! Injects the SEA blob, VFS archive, and VFS config record together,
//! replacing the whole `NODE_SEA` segment (or the flat payload sections on
//! ELF/PE). Presence of the target segment is used as the
//! fuse-already-flipped proxy; re-scanning section references after repeated
//! mutation cycles is unstable, so the flip runs at most once per binary.

use std::path::Path;

use crate::adapter::{guard_mutable_path, Format, Image};
use crate::error::{Error, Result};
use crate::inject::{flip_sea_fuse, MAX_VFS_BYTES, SECTION_ALIGN_LOG2};
use crate::names;
use crate::sign;
use crate::svfg::SVFG_LEN;

const MAX_SEA_BYTES: u64 = i32::MAX as u64;

/// Payloads for one batch injection.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchPayloads<'a> {
    /// SEA blob bytes.
    pub sea: Option<&'a [u8]>,
    /// VFS archive bytes.
    pub vfs: Option<&'a [u8]>,
    /// Emit a zero-length VFS section even without archive bytes.
    pub vfs_compat: bool,
    /// Serialized 366-byte VFS config record.
    pub vfs_config: Option<&'a [u8]>,
}

impl BatchPayloads<'_> {
    fn is_empty(&self) -> bool {
        self.sea.is_none() && self.vfs.is_none() && !self.vfs_compat && self.vfs_config.is_none()
    }
}

/// Whether the binary already carries the SEA payload family.
fn has_sea_payloads(image: &Image) -> bool {
    match image.format() {
        Format::MachO => image.has_segment(names::SEG_NODE_SEA),
        format => image.has_section(None, names::SEA_BLOB.for_format(format)),
    }
}

/// Inject the SEA payload family in one pass.
pub fn inject_batch(executable: &Path, output: &Path, payloads: &BatchPayloads) -> Result<()> {
    guard_mutable_path(executable)?;
    guard_mutable_path(output)?;

    if payloads.is_empty() {
        return Err(Error::invalid_args("no payloads to inject"));
    }
    if let Some(sea) = payloads.sea {
        if sea.len() as u64 > MAX_SEA_BYTES {
            return Err(Error::invalid_args("SEA blob exceeds the 2 GiB cap"));
        }
    }
    if let Some(vfs) = payloads.vfs {
        if vfs.len() as u64 > MAX_VFS_BYTES {
            return Err(Error::invalid_args("VFS blob exceeds the 500 MB cap"));
        }
    }
    if let Some(config) = payloads.vfs_config {
        if config.len() != SVFG_LEN {
            return Err(Error::invalid_args(format!(
                "vfs config must be exactly {SVFG_LEN} bytes, got {}",
                config.len()
            )));
        }
    }

    let mut image = Image::parse_file(executable)?;
    let format = image.format();

    // Segment presence proxies "fuse already flipped"; when the segment is
    // absent the flip happens before any structural removal.
    if has_sea_payloads(&image) {
        tracing::debug!("SEA payloads already present, skipping fuse scan");
    } else {
        flip_sea_fuse(&mut image)?;
    }

    match format {
        Format::MachO => {
            if image.has_segment(names::SEG_NODE_SEA) {
                image.remove_segment(names::SEG_NODE_SEA)?;
            }
        }
        _ => {
            for table in [names::SEA_BLOB, names::VFS_BLOB, names::VFS_CONFIG] {
                let name = table.for_format(format);
                if image.has_section(None, name) {
                    image.remove_section(None, name, true)?;
                }
            }
        }
    }

    if let Some(sea) = payloads.sea {
        image.add_section(
            names::SEG_NODE_SEA,
            names::SEA_BLOB.for_format(format),
            sea,
            SECTION_ALIGN_LOG2,
        )?;
    }
    if payloads.vfs.is_some() || payloads.vfs_compat {
        image.add_section(
            names::SEG_NODE_SEA,
            names::VFS_BLOB.for_format(format),
            payloads.vfs.unwrap_or(&[]),
            SECTION_ALIGN_LOG2,
        )?;
    }
    if let Some(config) = payloads.vfs_config {
        image.add_section(
            names::SEG_NODE_SEA,
            names::VFS_CONFIG.for_format(format),
            config,
            SECTION_ALIGN_LOG2,
        )?;
    }

    image.remove_code_signature();
    let bytes = image.write()?;
    sign::write_signed(&bytes, output)
}
