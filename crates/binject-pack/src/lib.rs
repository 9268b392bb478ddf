//! Executable section injection and SMOL stub packing.
//!
//! binject-pack embeds payloads into already-linked Mach-O, ELF, and PE
//! executables so a host runtime can discover them at process start:
//!
//! - [`inject`] / [`extract`] / [`list`] / [`verify`]: single payload
//!   sections with overwrite semantics and the SEA fuse flip.
//! - [`inject_batch`]: the SEA blob, VFS archive, and VFS config record in
//!   one pass.
//! - [`smol_extract_binary`] / [`smol_repack`]: the self-extracting
//!   compressed-stub frame.
//! - [`serialize_smfg`] / [`serialize_svfg`]: the fixed-size config records
//!   the runtime stub reads.
//!
//! Every mutation is rendered to a sibling temp file, fsynced, signed on
//! macOS, and atomically renamed over the destination; the input binary is
//! never modified in place.

pub mod adapter;
pub mod batch;
pub mod error;
pub mod inject;
pub mod names;
pub mod sign;
pub mod smfg;
pub mod smol;
pub mod svfg;
pub mod vfs;

pub use adapter::{Format, Image, SectionInfo};
pub use batch::{inject_batch, BatchPayloads};
pub use error::{Error, Result};
pub use inject::{extract, inject, list, verify, VerifyReport};
pub use smfg::{serialize_smfg, serialize_smfg_embedded, UpdaterConfig};
pub use smol::{
    is_smol_stub, read_pressed_section, rebuild_stub_section, smol_extract_binary,
    smol_extract_node_version, smol_repack,
};
pub use svfg::{serialize_svfg, VfsConfig};
