//! SMOL self-extracting stub protocol.
//!
//! The stub carries a compressed host binary in its PRESSED_DATA section:
//! a 32-byte marker, a 36-byte metadata header (sizes, cache key, platform
//! triple, config flag), an optional embedded 1176-byte SMFG record, then
//! the compressed payload. This module parses and rebuilds that frame and
//! implements extract/repack over the format adapter.

use std::path::Path;

use lzfse_rust::{LzfseDecoder, LzfseEncoder};

use crate::adapter::{guard_mutable_path, Format, Image};
use crate::error::{Error, Result};
use crate::inject::SECTION_ALIGN_LOG2;
use crate::names;
use crate::sign;
use crate::smfg::{SMFG_EMBEDDED_LEN, SMFG_MAGIC, SMFG_NODE_VERSION_OFFSET};

/// Marker length.
pub const MARKER_LEN: usize = 32;

/// Metadata header length: sizes, cache key, platform triple, config flag.
pub const METADATA_LEN: usize = 8 + 8 + 16 + 3 + 1;

/// Upper bound for the stored uncompressed size (500 GiB).
pub const MAX_UNCOMPRESSED: u64 = 500 * 1024 * 1024 * 1024;

/// Inner binaries larger than this are refused at repack time (200 MB).
const MAX_INNER_BINARY: usize = 200 * 1024 * 1024;

/// Codec id for LZFSE, the only algorithm the dispatch accepts.
pub const COMPRESSION_LZFSE: u8 = 0;

/// The 32-byte PRESSED_DATA marker, assembled from three parts at run time
/// so the literal never lands in this binary's own string pool and a stub
/// scanning itself cannot match our copy.
pub fn pressed_marker() -> [u8; MARKER_LEN] {
    const PARTS: [&[u8]; 3] = [b"::SMOL::", b"PRESSED:DATA:", b"MARKER:v1::"];
    let mut marker = [0u8; MARKER_LEN];
    let mut at = 0;
    for part in PARTS {
        marker[at..at + part.len()].copy_from_slice(part);
        at += part.len();
    }
    debug_assert_eq!(at, MARKER_LEN);
    marker
}

/// Metadata header following the marker.
#[derive(Debug, Clone)]
pub struct StubHeader {
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub cache_key: [u8; 16],
    pub platform: u8,
    pub arch: u8,
    pub libc: u8,
    /// 1 when an embedded SMFG record follows the header.
    pub config_flag: u8,
}

impl StubHeader {
    fn read(buf: &[u8]) -> Self {
        let mut cache_key = [0u8; 16];
        cache_key.copy_from_slice(&buf[16..32]);
        Self {
            compressed_size: u64::from_le_bytes(buf[0..8].try_into().unwrap()),
            uncompressed_size: u64::from_le_bytes(buf[8..16].try_into().unwrap()),
            cache_key,
            platform: buf[32],
            arch: buf[33],
            libc: buf[34],
            config_flag: buf[35],
        }
    }

    fn write(&self, out: &mut Vec<u8>) {
        out.extend(&self.compressed_size.to_le_bytes());
        out.extend(&self.uncompressed_size.to_le_bytes());
        out.extend(&self.cache_key);
        out.push(self.platform);
        out.push(self.arch);
        out.push(self.libc);
        out.push(self.config_flag);
    }
}

/// A parsed PRESSED_DATA frame, borrowing the section bytes.
#[derive(Debug)]
pub struct StubPayload<'a> {
    pub header: StubHeader,
    /// Embedded SMFG record when the config flag is set.
    pub embedded_config: Option<&'a [u8]>,
    pub compressed: &'a [u8],
}

fn find_marker(section: &[u8]) -> Option<usize> {
    let marker = pressed_marker();
    if section.len() < MARKER_LEN {
        return None;
    }
    section.windows(MARKER_LEN).position(|w| w == marker)
}

/// Parse and validate a PRESSED_DATA section.
pub fn parse_stub_section(section: &[u8]) -> Result<StubPayload<'_>> {
    let marker_off =
        find_marker(section).ok_or_else(|| Error::decompress("stub marker not found"))?;
    let meta_start = marker_off + MARKER_LEN;
    if section.len() < meta_start + METADATA_LEN {
        return Err(Error::decompress("stub metadata truncated"));
    }
    let header = StubHeader::read(&section[meta_start..meta_start + METADATA_LEN]);

    if header.uncompressed_size == 0 || header.uncompressed_size > MAX_UNCOMPRESSED {
        return Err(Error::decompress(format!(
            "implausible uncompressed size {}",
            header.uncompressed_size
        )));
    }
    let budget = (section.len() - meta_start - METADATA_LEN) as u64;
    if header.compressed_size == 0 || header.compressed_size > budget {
        return Err(Error::decompress(format!(
            "stored compressed size {} exceeds section budget {budget}",
            header.compressed_size
        )));
    }

    let mut cursor = meta_start + METADATA_LEN;
    let embedded_config = if header.config_flag == 1 {
        let end = cursor + SMFG_EMBEDDED_LEN;
        if section.len() < end {
            return Err(Error::decompress("embedded updater config truncated"));
        }
        let config = &section[cursor..end];
        cursor = end;
        Some(config)
    } else {
        None
    };

    let end = cursor + header.compressed_size as usize;
    if section.len() < end {
        return Err(Error::decompress("compressed payload overruns section"));
    }

    Ok(StubPayload {
        header,
        embedded_config,
        compressed: &section[cursor..end],
    })
}

/// Assemble a PRESSED_DATA frame from its parts.
pub fn build_stub_section(
    header: &StubHeader,
    embedded_config: Option<&[u8]>,
    compressed: &[u8],
) -> Result<Vec<u8>> {
    if header.compressed_size != compressed.len() as u64 {
        return Err(Error::invalid_args("header compressed size disagrees with payload"));
    }
    if let Some(config) = embedded_config {
        if config.len() != SMFG_EMBEDDED_LEN {
            return Err(Error::invalid_args(format!(
                "embedded updater config must be {SMFG_EMBEDDED_LEN} bytes"
            )));
        }
        if header.config_flag != 1 {
            return Err(Error::invalid_args("config flag unset but config supplied"));
        }
    } else if header.config_flag == 1 {
        return Err(Error::invalid_args("config flag set but no config supplied"));
    }

    let config_len = embedded_config.map_or(0, |c| c.len());
    let mut out = Vec::with_capacity(MARKER_LEN + METADATA_LEN + config_len + compressed.len());
    out.extend(&pressed_marker());
    header.write(&mut out);
    if let Some(config) = embedded_config {
        out.extend_from_slice(config);
    }
    out.extend_from_slice(compressed);
    Ok(out)
}

/// Decompress via the codec dispatch. Only algorithm 0 (LZFSE) exists.
pub fn decompress(algorithm: u8, compressed: &[u8], uncompressed_size: usize) -> Result<Vec<u8>> {
    match algorithm {
        COMPRESSION_LZFSE => {
            let mut out = Vec::with_capacity(uncompressed_size);
            LzfseDecoder::default()
                .decode_bytes(compressed, &mut out)
                .map_err(|e| Error::decompress(e.to_string()))?;
            if out.len() != uncompressed_size {
                return Err(Error::decompress(format!(
                    "decompressed {} bytes, expected {uncompressed_size}",
                    out.len()
                )));
            }
            Ok(out)
        }
        other => Err(Error::decompress(format!(
            "unknown compression algorithm {other}"
        ))),
    }
}

/// Compress an inner binary for a stub frame.
pub fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    LzfseEncoder::default()
        .encode_bytes(data, &mut out)
        .map_err(Error::Io)?;
    Ok(out)
}

/// Locate the PRESSED_DATA section's bytes: Mach-O segment `SMOL` first,
/// then the flat-table spellings.
fn pressed_section(image: &Image) -> Result<&[u8]> {
    let bytes = match image.format() {
        Format::MachO => image.section_data(Some(names::SEG_SMOL), names::PRESSED_DATA.macho),
        _ => names::PRESSED_DATA_ALIASES
            .iter()
            .find_map(|name| image.section_data(None, name)),
    };
    bytes.ok_or_else(|| Error::section_not_found(names::PRESSED_DATA.elf))
}

/// Whether the executable carries a PRESSED_DATA section.
pub fn is_smol_stub(path: &Path) -> Result<bool> {
    let image = Image::parse_file(path)?;
    Ok(pressed_section(&image).is_ok())
}

/// Read the raw PRESSED_DATA section bytes from a stub on disk.
pub fn read_pressed_section(stub: &Path) -> Result<Vec<u8>> {
    let image = Image::parse_file(stub)?;
    pressed_section(&image).map(|b| b.to_vec())
}

/// Extract and decompress the inner binary carried by a SMOL stub.
pub fn smol_extract_binary(stub: &Path, output: &Path) -> Result<()> {
    let image = Image::parse_file(stub)?;
    let section = pressed_section(&image)?;
    let payload = parse_stub_section(section)?;
    let inner = decompress(
        COMPRESSION_LZFSE,
        payload.compressed,
        payload.header.uncompressed_size as usize,
    )?;
    sign::write_payload(&inner, output)
}

/// Replace the stub's SMOL payload with `new_section`, whatever its size.
pub(crate) fn replace_pressed_section(image: &mut Image, new_section: &[u8]) -> Result<()> {
    match image.format() {
        Format::MachO => {
            if image.has_segment(names::SEG_SMOL) {
                image.remove_segment(names::SEG_SMOL)?;
            }
            image.add_section(
                names::SEG_SMOL,
                names::PRESSED_DATA.macho,
                new_section,
                SECTION_ALIGN_LOG2,
            )
        }
        format => {
            for name in names::PRESSED_DATA_ALIASES {
                if image.has_section(None, name) {
                    image.remove_section(None, name, true)?;
                }
            }
            image.add_section(
                names::SEG_SMOL,
                names::PRESSED_DATA.for_format(format),
                new_section,
                SECTION_ALIGN_LOG2,
            )
        }
    }
}

/// Rewrite a stub with a new PRESSED_DATA frame, signing and renaming
/// atomically. Works for any grow or shrink of the section.
pub fn smol_repack(stub: &Path, new_section: &[u8], output: &Path) -> Result<()> {
    guard_mutable_path(stub)?;
    guard_mutable_path(output)?;

    let mut image = Image::parse_file(stub)?;
    replace_pressed_section(&mut image, new_section)?;
    image.remove_code_signature();
    let bytes = image.write()?;
    sign::write_signed(&bytes, output)
}

/// Rebuild a stub frame around a new inner binary, preserving the cache
/// key, platform triple, and embedded config of the old frame.
pub fn rebuild_stub_section(old_section: &[u8], new_inner: &[u8]) -> Result<Vec<u8>> {
    if new_inner.len() > MAX_INNER_BINARY {
        return Err(Error::invalid_args(format!(
            "inner binary of {} bytes exceeds the {MAX_INNER_BINARY}-byte cap",
            new_inner.len()
        )));
    }
    let payload = parse_stub_section(old_section)?;
    let embedded_config = payload.embedded_config.map(|c| c.to_vec());
    let compressed = compress(new_inner)?;
    let header = StubHeader {
        compressed_size: compressed.len() as u64,
        uncompressed_size: new_inner.len() as u64,
        ..payload.header
    };
    build_stub_section(&header, embedded_config.as_deref(), &compressed)
}

/// Read the host runtime version recorded in the SMOL_CONFIG section.
///
/// `Ok(None)` when the binary has no config section; errors when the
/// section exists but is malformed.
pub fn smol_extract_node_version(binary: &Path) -> Result<Option<String>> {
    let image = Image::parse_file(binary)?;
    let section = match image.format() {
        Format::MachO => image.section_data(Some(names::SEG_SMOL), names::SMOL_CONFIG.macho),
        format => image.section_data(None, names::SMOL_CONFIG.for_format(format)),
    };
    let Some(section) = section else {
        return Ok(None);
    };

    if section.len() < 1200 {
        return Err(Error::invalid_format(format!(
            "SMOL config section is {} bytes, expected at least 1200",
            section.len()
        )));
    }
    let magic = u32::from_le_bytes(section[0..4].try_into().unwrap());
    if magic != SMFG_MAGIC {
        return Err(Error::invalid_format("SMOL config magic mismatch"));
    }
    let version = u16::from_le_bytes(section[4..6].try_into().unwrap());
    if version < 2 {
        return Err(Error::invalid_format(format!(
            "SMOL config version {version} is too old"
        )));
    }

    let len = section[SMFG_NODE_VERSION_OFFSET] as usize;
    if !(1..=15).contains(&len) {
        return Err(Error::invalid_format("node version slot length out of range"));
    }
    let raw = &section[SMFG_NODE_VERSION_OFFSET + 1..SMFG_NODE_VERSION_OFFSET + 1 + len];
    if !raw.is_ascii() {
        return Err(Error::invalid_format("node version is not ASCII"));
    }
    Ok(Some(String::from_utf8_lossy(raw).into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::macho;
    use crate::smfg::{serialize_smfg, serialize_smfg_embedded, UpdaterConfig};
    use std::fs;

    fn sample_header(compressed: &[u8], inner_len: usize, flag: u8) -> StubHeader {
        StubHeader {
            compressed_size: compressed.len() as u64,
            uncompressed_size: inner_len as u64,
            cache_key: *b"0123456789abcdef",
            platform: 1,
            arch: 2,
            libc: 0,
            config_flag: flag,
        }
    }

    fn sample_inner() -> Vec<u8> {
        // Compressible but non-trivial payload.
        let mut inner = Vec::new();
        for i in 0..4096u32 {
            inner.extend(&(i / 7).to_le_bytes());
        }
        inner
    }

    #[test]
    fn test_marker_is_32_bytes_and_stable() {
        let marker = pressed_marker();
        assert_eq!(marker.len(), MARKER_LEN);
        assert_eq!(marker, pressed_marker());
        assert!(marker.starts_with(b"::SMOL::"));
    }

    #[test]
    fn test_compress_decompress_roundtrip() {
        let inner = sample_inner();
        let compressed = compress(&inner).unwrap();
        assert!(compressed.len() < inner.len());
        let back = decompress(COMPRESSION_LZFSE, &compressed, inner.len()).unwrap();
        assert_eq!(back, inner);
    }

    #[test]
    fn test_unknown_algorithm_rejected() {
        assert!(matches!(
            decompress(1, b"anything", 16),
            Err(Error::Decompress(_))
        ));
    }

    #[test]
    fn test_frame_roundtrip_without_config() {
        let inner = sample_inner();
        let compressed = compress(&inner).unwrap();
        let header = sample_header(&compressed, inner.len(), 0);
        let section = build_stub_section(&header, None, &compressed).unwrap();

        let payload = parse_stub_section(&section).unwrap();
        assert_eq!(payload.header.uncompressed_size, inner.len() as u64);
        assert_eq!(payload.header.cache_key, header.cache_key);
        assert!(payload.embedded_config.is_none());
        let back = decompress(COMPRESSION_LZFSE, payload.compressed, inner.len()).unwrap();
        assert_eq!(back, inner);
    }

    #[test]
    fn test_frame_roundtrip_with_config() {
        let inner = sample_inner();
        let compressed = compress(&inner).unwrap();
        let config = serialize_smfg_embedded(&UpdaterConfig::default()).unwrap();
        let header = sample_header(&compressed, inner.len(), 1);
        let section = build_stub_section(&header, Some(&config), &compressed).unwrap();

        let payload = parse_stub_section(&section).unwrap();
        assert_eq!(payload.embedded_config, Some(&config[..]));
        let back = decompress(COMPRESSION_LZFSE, payload.compressed, inner.len()).unwrap();
        assert_eq!(back, inner);
    }

    #[test]
    fn test_marker_found_at_nonzero_offset() {
        let inner = sample_inner();
        let compressed = compress(&inner).unwrap();
        let header = sample_header(&compressed, inner.len(), 0);
        let mut section = vec![0xEE; 100];
        section.extend(build_stub_section(&header, None, &compressed).unwrap());

        let payload = parse_stub_section(&section).unwrap();
        assert_eq!(payload.header.compressed_size, compressed.len() as u64);
    }

    #[test]
    fn test_corrupt_metadata_rejected() {
        let inner = sample_inner();
        let compressed = compress(&inner).unwrap();
        let header = sample_header(&compressed, inner.len(), 0);
        let mut section = build_stub_section(&header, None, &compressed).unwrap();

        // Claim a compressed size past the end of the section.
        let size_off = MARKER_LEN;
        let claimed_size = (section.len() as u64) * 2;
        section[size_off..size_off + 8].copy_from_slice(&claimed_size.to_le_bytes());
        assert!(matches!(
            parse_stub_section(&section),
            Err(Error::Decompress(_))
        ));

        // Zero uncompressed size.
        let mut section = build_stub_section(&header, None, &compressed).unwrap();
        section[size_off + 8..size_off + 16].copy_from_slice(&0u64.to_le_bytes());
        assert!(matches!(
            parse_stub_section(&section),
            Err(Error::Decompress(_))
        ));
    }

    #[test]
    fn test_extract_binary_from_macho_stub() {
        let dir = tempfile::tempdir().unwrap();
        let inner = sample_inner();
        let compressed = compress(&inner).unwrap();
        let header = sample_header(&compressed, inner.len(), 0);
        let section = build_stub_section(&header, None, &compressed).unwrap();

        let mut image = Image::parse(&macho::tests::build_fixture(false)).unwrap();
        image
            .add_section(names::SEG_SMOL, "__PRESSED_DATA", &section, 2)
            .unwrap();
        let stub = dir.path().join("stub");
        fs::write(&stub, image.write().unwrap()).unwrap();

        let out = dir.path().join("inner");
        smol_extract_binary(&stub, &out).unwrap();
        assert_eq!(fs::read(&out).unwrap(), inner);
    }

    #[test]
    fn test_repack_grows_and_shrinks() {
        let dir = tempfile::tempdir().unwrap();
        let mut image = Image::parse(&macho::tests::build_fixture(false)).unwrap();
        image
            .add_section(names::SEG_SMOL, "__PRESSED_DATA", &vec![0x55; 4000], 2)
            .unwrap();
        let stub = dir.path().join("stub");
        fs::write(&stub, image.write().unwrap()).unwrap();

        // Grow.
        let big = vec![0x66u8; 60_000];
        let grown = dir.path().join("grown");
        smol_repack(&stub, &big, &grown).unwrap();
        let image = Image::parse(&fs::read(&grown).unwrap()).unwrap();
        assert_eq!(
            image.section_data(Some(names::SEG_SMOL), "__PRESSED_DATA"),
            Some(&big[..])
        );

        // Shrink.
        let small = vec![0x77u8; 16];
        let shrunk = dir.path().join("shrunk");
        smol_repack(&grown, &small, &shrunk).unwrap();
        let image = Image::parse(&fs::read(&shrunk).unwrap()).unwrap();
        assert_eq!(
            image.section_data(Some(names::SEG_SMOL), "__PRESSED_DATA"),
            Some(&small[..])
        );
    }

    #[test]
    fn test_rebuild_preserves_frame_fields() {
        let inner = sample_inner();
        let compressed = compress(&inner).unwrap();
        let config = serialize_smfg_embedded(&UpdaterConfig::default()).unwrap();
        let header = sample_header(&compressed, inner.len(), 1);
        let section = build_stub_section(&header, Some(&config), &compressed).unwrap();

        let new_inner = vec![0x42u8; 10_000];
        let rebuilt = rebuild_stub_section(&section, &new_inner).unwrap();
        let payload = parse_stub_section(&rebuilt).unwrap();
        assert_eq!(payload.header.cache_key, header.cache_key);
        assert_eq!(payload.header.platform, header.platform);
        assert_eq!(payload.embedded_config, Some(&config[..]));
        assert_eq!(
            decompress(COMPRESSION_LZFSE, payload.compressed, new_inner.len()).unwrap(),
            new_inner
        );
    }

    #[test]
    fn test_node_version_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let config = serialize_smfg(&UpdaterConfig {
            node_version: Some("22.11.0".into()),
            ..Default::default()
        })
        .unwrap();
        // Producers pad the section to the next 16-byte boundary (1200).
        let mut padded = config;
        padded.resize(1200, 0);

        let mut image = Image::parse(&macho::tests::build_fixture(false)).unwrap();
        image
            .add_section(names::SEG_SMOL, "__SMOL_CONFIG", &padded, 2)
            .unwrap();
        let binary = dir.path().join("stub");
        fs::write(&binary, image.write().unwrap()).unwrap();

        assert_eq!(
            smol_extract_node_version(&binary).unwrap().as_deref(),
            Some("22.11.0")
        );
    }

    #[test]
    fn test_node_version_absent_section() {
        let dir = tempfile::tempdir().unwrap();
        let binary = dir.path().join("plain");
        fs::write(&binary, macho::tests::build_fixture(false)).unwrap();
        assert_eq!(smol_extract_node_version(&binary).unwrap(), None);
    }
}
