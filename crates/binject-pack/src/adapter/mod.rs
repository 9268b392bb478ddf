//! Three-variant abstraction over executable image formats.
//!
//! [`Image`] wraps the Mach-O, ELF, and PE mutators behind one section-level
//! API: parse, enumerate, add, remove, patch, render. Variant-specific
//! knowledge (Mach-O segments contain sections, ELF/PE have flat tables,
//! PE names are capped at 8 bytes) stays inside this module.

pub mod elf;
pub mod macho;
pub mod pe;

use std::path::Path;

use crate::error::{Error, Result};
use crate::names::SIP_PREFIXES;

pub use elf::ElfImage;
pub use macho::MachImage;
pub use pe::PeImage;

/// Recognized executable formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    MachO,
    Elf,
    Pe,
}

impl Format {
    /// Detect the format from the leading magic bytes.
    pub fn detect(data: &[u8]) -> Option<Self> {
        if data.len() < 4 {
            return None;
        }
        if data[0..2] == [b'M', b'Z'] {
            return Some(Self::Pe);
        }
        if data[0..4] == elf::ELF_MAGIC {
            return Some(Self::Elf);
        }
        if data[0..4] == macho::FAT_MAGIC || data[0..4] == macho::FAT_CIGAM {
            return Some(Self::MachO);
        }
        let magic = u32::from_le_bytes(data[0..4].try_into().unwrap());
        match magic {
            macho::MH_MAGIC_64
            | macho::MH_CIGAM_64
            | macho::MH_MAGIC_32
            | macho::MH_CIGAM_32 => Some(Self::MachO),
            _ => None,
        }
    }
}

impl std::fmt::Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Format::MachO => write!(f, "Mach-O"),
            Format::Elf => write!(f, "ELF"),
            Format::Pe => write!(f, "PE"),
        }
    }
}

/// One section as reported by [`Image::sections`].
#[derive(Debug, Clone)]
pub struct SectionInfo {
    /// Containing segment (Mach-O only).
    pub segment: Option<String>,
    /// Section name.
    pub name: String,
    /// Content size in bytes.
    pub size: u64,
    /// File offset of the content.
    pub offset: u64,
}

/// A parsed executable image of any supported format.
#[derive(Debug)]
pub enum Image {
    MachO(MachImage),
    Elf(ElfImage),
    Pe(PeImage),
}

impl Image {
    /// Parse an image from bytes, dispatching on the magic prefix.
    pub fn parse(data: &[u8]) -> Result<Self> {
        match Format::detect(data) {
            Some(Format::MachO) => Ok(Self::MachO(MachImage::parse(data)?)),
            Some(Format::Elf) => Ok(Self::Elf(ElfImage::parse(data)?)),
            Some(Format::Pe) => Ok(Self::Pe(PeImage::parse(data)?)),
            None => Err(Error::invalid_format(
                "magic bytes match no supported executable format",
            )),
        }
    }

    /// Read and parse an executable file.
    pub fn parse_file(path: &Path) -> Result<Self> {
        let data = std::fs::read(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::PermissionDenied => Error::permission_denied(path),
            _ => Error::Io(e),
        })?;
        Self::parse(&data)
    }

    /// The image's format.
    pub fn format(&self) -> Format {
        match self {
            Self::MachO(_) => Format::MachO,
            Self::Elf(_) => Format::Elf,
            Self::Pe(_) => Format::Pe,
        }
    }

    /// Enumerate every section in the image.
    pub fn sections(&self) -> Vec<SectionInfo> {
        match self {
            Self::MachO(m) => m
                .sections()
                .into_iter()
                .map(|(seg, name, size, offset)| SectionInfo {
                    segment: Some(seg),
                    name,
                    size,
                    offset,
                })
                .collect(),
            Self::Elf(e) => e
                .sections()
                .into_iter()
                .map(|(name, size, offset)| SectionInfo {
                    segment: None,
                    name,
                    size,
                    offset,
                })
                .collect(),
            Self::Pe(p) => p
                .sections()
                .into_iter()
                .map(|(name, size, offset)| SectionInfo {
                    segment: None,
                    name,
                    size,
                    offset,
                })
                .collect(),
        }
    }

    /// Borrow a section's content bytes.
    pub fn section_data(&self, segment: Option<&str>, name: &str) -> Option<&[u8]> {
        match self {
            Self::MachO(m) => m.section_bytes(segment, name),
            Self::Elf(e) => e.section_bytes(name),
            Self::Pe(p) => p.section_bytes(name),
        }
    }

    /// Whether a section with this name exists.
    pub fn has_section(&self, segment: Option<&str>, name: &str) -> bool {
        match self {
            Self::MachO(m) => m.find_section(segment, name).is_some(),
            Self::Elf(e) => e.find_section(name).is_some(),
            Self::Pe(p) => p.find_section(name).is_some(),
        }
    }

    /// Whether a Mach-O segment with this name exists (always false for
    /// ELF/PE, which have no segment layer).
    pub fn has_segment(&self, name: &str) -> bool {
        match self {
            Self::MachO(m) => m.find_segment(name).is_some(),
            _ => false,
        }
    }

    /// Add a section. On Mach-O the target segment is created RWX when
    /// missing; ELF/PE ignore the segment component.
    pub fn add_section(
        &mut self,
        segment: &str,
        name: &str,
        content: &[u8],
        align_log2: u32,
    ) -> Result<()> {
        match self {
            Self::MachO(m) => m.add_section(segment, name, content, align_log2),
            Self::Elf(e) => e.add_section(name, content, align_log2),
            Self::Pe(p) => p.add_section(name, content),
        }
    }

    /// Remove a section by name.
    pub fn remove_section(
        &mut self,
        segment: Option<&str>,
        name: &str,
        clear_bytes: bool,
    ) -> Result<()> {
        match self {
            Self::MachO(m) => m.remove_section(segment, name, clear_bytes),
            Self::Elf(e) => e.remove_section(name, clear_bytes),
            Self::Pe(p) => p.remove_section(name, clear_bytes),
        }
    }

    /// Remove a whole Mach-O segment with its file content.
    pub fn remove_segment(&mut self, name: &str) -> Result<()> {
        match self {
            Self::MachO(m) => m.remove_segment(name),
            _ => Err(Error::invalid_args("segments are a Mach-O concept")),
        }
    }

    /// Whether the image carries a code signature (Mach-O only).
    pub fn has_code_signature(&self) -> bool {
        match self {
            Self::MachO(m) => m.has_code_signature(),
            _ => false,
        }
    }

    /// Remove the code signature when present (Mach-O only).
    pub fn remove_code_signature(&mut self) -> bool {
        match self {
            Self::MachO(m) => m.remove_code_signature(),
            _ => false,
        }
    }

    /// Patch bytes inside a section's content in place.
    pub fn patch_section(
        &mut self,
        segment: Option<&str>,
        name: &str,
        offset: usize,
        bytes: &[u8],
    ) -> Result<()> {
        match self {
            Self::MachO(m) => m.patch_section(segment, name, offset, bytes),
            Self::Elf(e) => e.patch_section(name, offset, bytes),
            Self::Pe(p) => p.patch_section(name, offset, bytes),
        }
    }

    /// Render the mutated image to bytes.
    ///
    /// Mach-O linkedit content is carried through verbatim; a single-slice
    /// fat input is written back thin.
    pub fn write(&self) -> Result<Vec<u8>> {
        match self {
            Self::MachO(m) => Ok(m.write()),
            Self::Elf(e) => Ok(e.write()),
            Self::Pe(p) => p.write(),
        }
    }
}

/// Reject mutation targets under SIP-protected path prefixes.
///
/// Runs before any parse or write so a protected binary is never even read
/// for mutation.
pub fn guard_mutable_path(path: &Path) -> Result<()> {
    let text = path.to_string_lossy();
    if SIP_PREFIXES.iter().any(|p| text.starts_with(p)) {
        return Err(Error::permission_denied(path));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_detect_dispatch() {
        assert_eq!(Format::detect(b"MZ\x90\x00"), Some(Format::Pe));
        assert_eq!(Format::detect(b"\x7fELF\x02\x01"), Some(Format::Elf));
        assert_eq!(
            Format::detect(&macho::MH_MAGIC_64.to_le_bytes()),
            Some(Format::MachO)
        );
        assert_eq!(Format::detect(&[0xca, 0xfe, 0xba, 0xbe]), Some(Format::MachO));
        assert_eq!(Format::detect(b"#!/usr/bin/env node"), None);
        assert_eq!(Format::detect(b"\x00"), None);
    }

    #[test]
    fn test_parse_rejects_unknown_magic() {
        let err = Image::parse(b"not an executable at all").unwrap_err();
        assert!(matches!(err, Error::InvalidFormat(_)));
    }

    #[test]
    fn test_parse_rejects_32bit_macho() {
        let mut data = vec![0u8; 64];
        data[0..4].copy_from_slice(&macho::MH_MAGIC_32.to_le_bytes());
        assert!(matches!(
            Image::parse(&data),
            Err(Error::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_sip_guard() {
        for prefix in crate::names::SIP_PREFIXES {
            let path = PathBuf::from(format!("{prefix}target"));
            assert!(matches!(
                guard_mutable_path(&path),
                Err(Error::PermissionDenied { .. })
            ));
        }
        assert!(guard_mutable_path(Path::new("/tmp/node")).is_ok());
        assert!(guard_mutable_path(Path::new("/usr/local/bin/node")).is_ok());
    }

    #[test]
    fn test_cross_format_section_api() {
        let mut image = Image::parse(&macho::tests::build_fixture(false)).unwrap();
        image.add_section("NODE_SEA", "__NODE_SEA_BLOB", b"m", 2).unwrap();
        assert!(image.has_segment("NODE_SEA"));
        assert!(image.has_section(Some("NODE_SEA"), "__NODE_SEA_BLOB"));

        let mut image = Image::parse(&elf::tests::build_fixture()).unwrap();
        image.add_section("NODE_SEA", "NODE_SEA_BLOB", b"e", 2).unwrap();
        assert!(!image.has_segment("NODE_SEA"));
        assert!(image.has_section(None, "NODE_SEA_BLOB"));

        let mut image = Image::parse(&pe::tests::build_fixture()).unwrap();
        image.add_section("NODE_SEA", "NODE_SEA", b"p", 2).unwrap();
        assert_eq!(image.section_data(None, "NODE_SEA"), Some(&b"p"[..]));
    }
}
