//! Canonical segment and section names per executable format.
//!
//! Mach-O names carry the `__` prefix and live inside a named segment;
//! ELF and PE use a flat section table. PE section names are capped at
//! 8 bytes, so the PE column uses shortened spellings.

use crate::adapter::Format;

/// Mach-O segment holding the SEA payload sections.
pub const SEG_NODE_SEA: &str = "NODE_SEA";

/// Mach-O segment holding the SMOL stub sections.
pub const SEG_SMOL: &str = "SMOL";

/// Mach-O section name length limit (including the `__` prefix).
pub const MACHO_NAME_MAX: usize = 16;

/// PE section name length limit.
pub const PE_NAME_MAX: usize = 8;

/// Section names for the Node SEA blob.
pub const SEA_BLOB: NameTable = NameTable {
    macho: "__NODE_SEA_BLOB",
    elf: "NODE_SEA_BLOB",
    pe: "NODE_SEA",
};

/// Section names for the VFS archive blob.
pub const VFS_BLOB: NameTable = NameTable {
    macho: "__SMOL_VFS_BLOB",
    elf: "SMOL_VFS_BLOB",
    pe: "SMOLVFS",
};

/// Section names for the 366-byte VFS config record.
pub const VFS_CONFIG: NameTable = NameTable {
    macho: "__SMOL_VFS_CONFIG",
    elf: "SMOL_VFS_CONFIG",
    pe: "SMOLVCFG",
};

/// Section names for the SMOL compressed payload.
pub const PRESSED_DATA: NameTable = NameTable {
    macho: "__PRESSED_DATA",
    elf: "PRESSED_DATA",
    pe: "PRESSED",
};

/// Section names for the SMOL run-time config record.
pub const SMOL_CONFIG: NameTable = NameTable {
    macho: "__SMOL_CONFIG",
    elf: "SMOL_CONFIG",
    pe: "SMOLCFG",
};

/// Alternate spellings accepted when locating the SMOL payload section.
pub const PRESSED_DATA_ALIASES: &[&str] = &[".PRESSED_DATA", "PRESSED_DATA", "PRESSED"];

/// Absolute path prefixes protected by macOS System Integrity Protection.
///
/// Rejected on every platform: none of these are ever legitimate injection
/// targets, and the unconditional check keeps the behavior testable.
pub const SIP_PREFIXES: &[&str] = &[
    "/System/",
    "/usr/bin/",
    "/usr/sbin/",
    "/usr/libexec/",
    "/bin/",
    "/sbin/",
];

/// Canonical spellings of one logical section across the three formats.
#[derive(Debug, Clone, Copy)]
pub struct NameTable {
    /// Mach-O section name (lives in [`SEG_NODE_SEA`] or [`SEG_SMOL`]).
    pub macho: &'static str,
    /// ELF section name.
    pub elf: &'static str,
    /// PE section name (8 bytes max).
    pub pe: &'static str,
}

impl NameTable {
    /// The spelling for the given format.
    pub fn for_format(&self, format: Format) -> &'static str {
        match format {
            Format::MachO => self.macho,
            Format::Elf => self.elf,
            Format::Pe => self.pe,
        }
    }

    /// Whether `name` is this section's spelling in any format.
    pub fn matches(&self, name: &str) -> bool {
        name == self.macho || name == self.elf || name == self.pe
    }
}

/// Whether `name` is the SEA blob section for `format`.
///
/// Injecting this section is what arms the fuse flip.
pub fn is_sea_blob(format: Format, name: &str) -> bool {
    SEA_BLOB.for_format(format) == name
}

/// All payload sections this tool recognizes, for `list` filtering.
pub const KNOWN_SECTIONS: &[NameTable] =
    &[SEA_BLOB, VFS_BLOB, VFS_CONFIG, PRESSED_DATA, SMOL_CONFIG];

/// Whether `name` names any payload section this tool manages.
pub fn is_known_section(name: &str) -> bool {
    KNOWN_SECTIONS.iter().any(|t| t.matches(name))
        || PRESSED_DATA_ALIASES.contains(&name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pe_names_fit_the_limit() {
        for table in KNOWN_SECTIONS {
            assert!(
                table.pe.len() <= PE_NAME_MAX,
                "PE name {} exceeds 8 bytes",
                table.pe
            );
        }
    }

    #[test]
    fn test_macho_names_fit_the_limit() {
        for table in KNOWN_SECTIONS {
            assert!(table.macho.len() <= MACHO_NAME_MAX);
            assert!(table.macho.starts_with("__"));
        }
    }

    #[test]
    fn test_sea_blob_predicate() {
        assert!(is_sea_blob(Format::MachO, "__NODE_SEA_BLOB"));
        assert!(is_sea_blob(Format::Elf, "NODE_SEA_BLOB"));
        assert!(is_sea_blob(Format::Pe, "NODE_SEA"));
        assert!(!is_sea_blob(Format::Elf, "__NODE_SEA_BLOB"));
    }

    #[test]
    fn test_known_sections_cover_aliases() {
        assert!(is_known_section(".PRESSED_DATA"));
        assert!(is_known_section("SMOL_VFS_CONFIG"));
        assert!(!is_known_section(".text"));
    }
}
