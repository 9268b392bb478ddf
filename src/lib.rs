//! binject library façade.
//!
//! The narrow operation surface consumed by the CLI shell and other tools.
//! Everything here delegates to [`binject_pack`]; no state lives in this
//! crate and no operation touches anything but its named paths.

pub mod config;

pub use binject_pack::{
    extract, inject, inject_batch, is_smol_stub, list, read_pressed_section,
    rebuild_stub_section, serialize_smfg, serialize_smfg_embedded, serialize_svfg,
    smol_extract_binary, smol_extract_node_version, smol_repack, verify, BatchPayloads, Error,
    Format, Image, Result, SectionInfo, UpdaterConfig, VerifyReport, VfsConfig,
};

/// Crate version, surfaced by `--version` and startup logging.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
