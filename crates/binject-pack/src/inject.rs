//! Single-section injection, listing, extraction, and verification.

use std::path::Path;

use crate::adapter::{guard_mutable_path, Format, Image, SectionInfo};
use crate::error::{Error, Result};
use crate::names;
use crate::sign;

/// Injected payload sections are 4-byte aligned.
pub(crate) const SECTION_ALIGN_LOG2: u32 = 2;

/// SEA blob size cap.
const MAX_SEA_BYTES: u64 = i32::MAX as u64;

/// VFS blob size cap (500 MB).
pub(crate) const MAX_VFS_BYTES: u64 = 500 * 1024 * 1024;

/// Hash-tagged fuse the host runtime reads to decide whether SEA mode is on.
const FUSE_PREFIX: &str = "NODE_SEA_FUSE_fce680ab2cc467b6e072b8b5df1996b2";

fn fuse_unflipped() -> Vec<u8> {
    format!("{FUSE_PREFIX}:0").into_bytes()
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Flip the SEA fuse from `:0` to `:1` in place.
///
/// Scans every section, patches the first match, and stops. A missing
/// marker is a warning, not an error: stubs built without the fuse string
/// still accept payload sections.
pub(crate) fn flip_sea_fuse(image: &mut Image) -> Result<bool> {
    let marker = fuse_unflipped();

    let mut target = None;
    for info in image.sections() {
        let Some(bytes) = image.section_data(info.segment.as_deref(), &info.name) else {
            continue;
        };
        if let Some(pos) = find_subsequence(bytes, &marker) {
            target = Some((info.segment, info.name, pos));
            break;
        }
    }

    match target {
        Some((segment, name, pos)) => {
            tracing::debug!(section = %name, "flipping SEA fuse");
            image.patch_section(segment.as_deref(), &name, pos + marker.len() - 1, b"1")?;
            Ok(true)
        }
        None => {
            tracing::warn!("SEA fuse marker not found; runtime may not enter SEA mode");
            Ok(false)
        }
    }
}

fn validate_payload(section: &str, len: u64) -> Result<()> {
    if names::SEA_BLOB.matches(section) && len > MAX_SEA_BYTES {
        return Err(Error::invalid_args(format!(
            "SEA blob of {len} bytes exceeds the {MAX_SEA_BYTES}-byte cap"
        )));
    }
    if names::VFS_BLOB.matches(section) && len > MAX_VFS_BYTES {
        return Err(Error::invalid_args(format!(
            "VFS blob of {len} bytes exceeds the {MAX_VFS_BYTES}-byte cap"
        )));
    }
    Ok(())
}

fn segment_hint<'a>(format: Format, segment: &'a str) -> Option<&'a str> {
    match format {
        Format::MachO => Some(segment),
        _ => None,
    }
}

/// Inject one payload section, overwriting any previous copy.
///
/// `data = None` produces a valid zero-length section. The input file is
/// left untouched; the result lands at `output` via the atomic write path.
pub fn inject(
    executable: &Path,
    output: &Path,
    segment: &str,
    section: &str,
    data: Option<&[u8]>,
) -> Result<()> {
    guard_mutable_path(executable)?;
    guard_mutable_path(output)?;

    let payload = data.unwrap_or(&[]);
    validate_payload(section, payload.len() as u64)?;

    let mut image = Image::parse_file(executable)?;
    let hint = segment_hint(image.format(), segment);

    if image.has_section(hint, section) {
        image.remove_section(hint, section, true)?;
    }
    image.add_section(segment, section, payload, SECTION_ALIGN_LOG2)?;

    if names::is_sea_blob(image.format(), section) {
        flip_sea_fuse(&mut image)?;
    }

    image.remove_code_signature();
    let bytes = image.write()?;
    sign::write_signed(&bytes, output)
}

/// Payload sections present in the executable.
///
/// Mach-O reports everything under the `NODE_SEA` and `SMOL` segments;
/// ELF/PE report the canonical flat names.
pub fn list(executable: &Path) -> Result<Vec<SectionInfo>> {
    let image = Image::parse_file(executable)?;
    Ok(image
        .sections()
        .into_iter()
        .filter(|info| match &info.segment {
            Some(seg) => seg == names::SEG_NODE_SEA || seg == names::SEG_SMOL,
            None => names::is_known_section(&info.name),
        })
        .collect())
}

/// Locate a payload section's bytes, searching `NODE_SEA` then `SMOL` on
/// Mach-O and the flat table elsewhere.
pub(crate) fn find_payload<'a>(image: &'a Image, section: &str) -> Result<&'a [u8]> {
    let bytes = match image.format() {
        Format::MachO => image
            .section_data(Some(names::SEG_NODE_SEA), section)
            .or_else(|| image.section_data(Some(names::SEG_SMOL), section)),
        _ => image.section_data(None, section),
    };
    bytes.ok_or_else(|| Error::section_not_found(section))
}

/// Extract a payload section to `output` (0755, parents created).
pub fn extract(executable: &Path, section: &str, output: &Path) -> Result<()> {
    let image = Image::parse_file(executable)?;
    let bytes = find_payload(&image, section)?;
    if bytes.is_empty() {
        return Err(Error::section_not_found(format!("{section} is empty")));
    }
    sign::write_payload(bytes, output)
}

/// What [`verify`] reports about a payload section.
#[derive(Debug, Clone)]
pub struct VerifyReport {
    /// Containing segment (Mach-O only).
    pub segment: Option<String>,
    /// Section name.
    pub section: String,
    /// Content size in bytes.
    pub size: u64,
    /// File offset of the content.
    pub offset: u64,
}

/// Check that a payload section exists and is non-empty.
pub fn verify(executable: &Path, section: &str) -> Result<VerifyReport> {
    let image = Image::parse_file(executable)?;
    let info = image
        .sections()
        .into_iter()
        .find(|info| {
            info.name == section
                && match &info.segment {
                    Some(seg) => seg == names::SEG_NODE_SEA || seg == names::SEG_SMOL,
                    None => true,
                }
        })
        .ok_or_else(|| Error::section_not_found(section))?;

    if info.size == 0 {
        return Err(Error::section_not_found(format!("{section} is empty")));
    }
    Ok(VerifyReport {
        segment: info.segment,
        section: info.name,
        size: info.size,
        offset: info.offset,
    })
}
