//! Mach-O image mutation.
//!
//! Parses 64-bit Mach-O binaries (thin or fat) into load-command structs,
//! supports adding and removing payload segments/sections, and renders the
//! mutated image back to bytes. Writing never reconstructs `__LINKEDIT`
//! content; the linkedit byte region is carried through verbatim so string
//! constants in `__TEXT,__cstring` survive untouched.

use std::io::{self, Read, Write};

use crate::error::{Error, Result};
use crate::names::MACHO_NAME_MAX;

/// Mach-O magic numbers.
pub const MH_MAGIC_64: u32 = 0xfeedfacf;
pub const MH_CIGAM_64: u32 = 0xcffaedfe;
pub const MH_MAGIC_32: u32 = 0xfeedface;
pub const MH_CIGAM_32: u32 = 0xcefaedfe;

/// Fat (universal) container magic, big-endian on disk.
pub const FAT_MAGIC: [u8; 4] = [0xca, 0xfe, 0xba, 0xbe];
pub const FAT_CIGAM: [u8; 4] = [0xbe, 0xba, 0xfe, 0xca];

/// Load command types.
pub const LC_SEGMENT_64: u32 = 0x19;
pub const LC_CODE_SIGNATURE: u32 = 0x1d;
pub const LC_DYLD_INFO_ONLY: u32 = 0x80000022;
pub const LC_SYMTAB: u32 = 0x2;
pub const LC_DYSYMTAB: u32 = 0xb;
pub const LC_FUNCTION_STARTS: u32 = 0x26;
pub const LC_DATA_IN_CODE: u32 = 0x29;
pub const LC_DYLD_CHAINED_FIXUPS: u32 = 0x80000034;
pub const LC_DYLD_EXPORTS_TRIE: u32 = 0x80000033;

/// Section type flag for plain payload bytes.
pub const S_REGULAR: u32 = 0;

/// RWX protection for injected segments.
pub const VM_PROT_RWX: i32 = 0x7;

/// Segment granularity (16KB pages, arm64).
pub const PAGE_SIZE: usize = 16384;

/// Mach-O 64-bit header.
#[derive(Debug, Clone, Copy)]
pub struct MachHeader64 {
    pub magic: u32,
    pub cputype: i32,
    pub cpusubtype: i32,
    pub filetype: u32,
    pub ncmds: u32,
    pub sizeofcmds: u32,
    pub flags: u32,
    pub reserved: u32,
}

impl MachHeader64 {
    pub const SIZE: usize = 32;

    pub fn read<R: Read>(reader: &mut R) -> io::Result<Self> {
        let mut buf = [0u8; Self::SIZE];
        reader.read_exact(&mut buf)?;
        Ok(Self {
            magic: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
            cputype: i32::from_le_bytes(buf[4..8].try_into().unwrap()),
            cpusubtype: i32::from_le_bytes(buf[8..12].try_into().unwrap()),
            filetype: u32::from_le_bytes(buf[12..16].try_into().unwrap()),
            ncmds: u32::from_le_bytes(buf[16..20].try_into().unwrap()),
            sizeofcmds: u32::from_le_bytes(buf[20..24].try_into().unwrap()),
            flags: u32::from_le_bytes(buf[24..28].try_into().unwrap()),
            reserved: u32::from_le_bytes(buf[28..32].try_into().unwrap()),
        })
    }

    pub fn write<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&self.magic.to_le_bytes())?;
        writer.write_all(&self.cputype.to_le_bytes())?;
        writer.write_all(&self.cpusubtype.to_le_bytes())?;
        writer.write_all(&self.filetype.to_le_bytes())?;
        writer.write_all(&self.ncmds.to_le_bytes())?;
        writer.write_all(&self.sizeofcmds.to_le_bytes())?;
        writer.write_all(&self.flags.to_le_bytes())?;
        writer.write_all(&self.reserved.to_le_bytes())?;
        Ok(())
    }
}

/// Load command header.
#[derive(Debug, Clone, Copy)]
pub struct LoadCommand {
    pub cmd: u32,
    pub cmdsize: u32,
}

impl LoadCommand {
    pub const SIZE: usize = 8;

    pub fn read<R: Read>(reader: &mut R) -> io::Result<Self> {
        let mut buf = [0u8; Self::SIZE];
        reader.read_exact(&mut buf)?;
        Ok(Self {
            cmd: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
            cmdsize: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
        })
    }
}

/// Segment command (64-bit).
#[derive(Debug, Clone)]
pub struct SegmentCommand64 {
    pub cmd: u32,
    pub cmdsize: u32,
    pub segname: [u8; 16],
    pub vmaddr: u64,
    pub vmsize: u64,
    pub fileoff: u64,
    pub filesize: u64,
    pub maxprot: i32,
    pub initprot: i32,
    pub nsects: u32,
    pub flags: u32,
}

impl SegmentCommand64 {
    pub const SIZE: usize = 72;

    pub fn read<R: Read>(reader: &mut R, cmd: u32, cmdsize: u32) -> io::Result<Self> {
        let mut buf = [0u8; Self::SIZE - 8];
        reader.read_exact(&mut buf)?;

        let mut segname = [0u8; 16];
        segname.copy_from_slice(&buf[0..16]);

        Ok(Self {
            cmd,
            cmdsize,
            segname,
            vmaddr: u64::from_le_bytes(buf[16..24].try_into().unwrap()),
            vmsize: u64::from_le_bytes(buf[24..32].try_into().unwrap()),
            fileoff: u64::from_le_bytes(buf[32..40].try_into().unwrap()),
            filesize: u64::from_le_bytes(buf[40..48].try_into().unwrap()),
            maxprot: i32::from_le_bytes(buf[48..52].try_into().unwrap()),
            initprot: i32::from_le_bytes(buf[52..56].try_into().unwrap()),
            nsects: u32::from_le_bytes(buf[56..60].try_into().unwrap()),
            flags: u32::from_le_bytes(buf[60..64].try_into().unwrap()),
        })
    }

    pub fn name(&self) -> &str {
        name_str(&self.segname)
    }

    pub fn write<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&self.cmd.to_le_bytes())?;
        writer.write_all(&self.cmdsize.to_le_bytes())?;
        writer.write_all(&self.segname)?;
        writer.write_all(&self.vmaddr.to_le_bytes())?;
        writer.write_all(&self.vmsize.to_le_bytes())?;
        writer.write_all(&self.fileoff.to_le_bytes())?;
        writer.write_all(&self.filesize.to_le_bytes())?;
        writer.write_all(&self.maxprot.to_le_bytes())?;
        writer.write_all(&self.initprot.to_le_bytes())?;
        writer.write_all(&self.nsects.to_le_bytes())?;
        writer.write_all(&self.flags.to_le_bytes())?;
        Ok(())
    }
}

/// Section (64-bit).
#[derive(Debug, Clone)]
pub struct Section64 {
    pub sectname: [u8; 16],
    pub segname: [u8; 16],
    pub addr: u64,
    pub size: u64,
    pub offset: u32,
    pub align: u32,
    pub reloff: u32,
    pub nreloc: u32,
    pub flags: u32,
    pub reserved1: u32,
    pub reserved2: u32,
    pub reserved3: u32,
}

impl Section64 {
    pub const SIZE: usize = 80;

    pub fn read<R: Read>(reader: &mut R) -> io::Result<Self> {
        let mut buf = [0u8; Self::SIZE];
        reader.read_exact(&mut buf)?;

        let mut sectname = [0u8; 16];
        let mut segname = [0u8; 16];
        sectname.copy_from_slice(&buf[0..16]);
        segname.copy_from_slice(&buf[16..32]);

        Ok(Self {
            sectname,
            segname,
            addr: u64::from_le_bytes(buf[32..40].try_into().unwrap()),
            size: u64::from_le_bytes(buf[40..48].try_into().unwrap()),
            offset: u32::from_le_bytes(buf[48..52].try_into().unwrap()),
            align: u32::from_le_bytes(buf[52..56].try_into().unwrap()),
            reloff: u32::from_le_bytes(buf[56..60].try_into().unwrap()),
            nreloc: u32::from_le_bytes(buf[60..64].try_into().unwrap()),
            flags: u32::from_le_bytes(buf[64..68].try_into().unwrap()),
            reserved1: u32::from_le_bytes(buf[68..72].try_into().unwrap()),
            reserved2: u32::from_le_bytes(buf[72..76].try_into().unwrap()),
            reserved3: u32::from_le_bytes(buf[76..80].try_into().unwrap()),
        })
    }

    pub fn name(&self) -> &str {
        name_str(&self.sectname)
    }

    pub fn segment_name(&self) -> &str {
        name_str(&self.segname)
    }

    pub fn write<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&self.sectname)?;
        writer.write_all(&self.segname)?;
        writer.write_all(&self.addr.to_le_bytes())?;
        writer.write_all(&self.size.to_le_bytes())?;
        writer.write_all(&self.offset.to_le_bytes())?;
        writer.write_all(&self.align.to_le_bytes())?;
        writer.write_all(&self.reloff.to_le_bytes())?;
        writer.write_all(&self.nreloc.to_le_bytes())?;
        writer.write_all(&self.flags.to_le_bytes())?;
        writer.write_all(&self.reserved1.to_le_bytes())?;
        writer.write_all(&self.reserved2.to_le_bytes())?;
        writer.write_all(&self.reserved3.to_le_bytes())?;
        Ok(())
    }
}

/// Linkedit data command (code signature, function starts, ...).
#[derive(Debug, Clone, Copy)]
pub struct LinkeditDataCommand {
    pub cmd: u32,
    pub cmdsize: u32,
    pub dataoff: u32,
    pub datasize: u32,
}

impl LinkeditDataCommand {
    pub const SIZE: usize = 16;

    pub fn read<R: Read>(reader: &mut R, cmd: u32, cmdsize: u32) -> io::Result<Self> {
        let mut buf = [0u8; 8];
        reader.read_exact(&mut buf)?;
        Ok(Self {
            cmd,
            cmdsize,
            dataoff: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
            datasize: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
        })
    }

    pub fn write<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&self.cmd.to_le_bytes())?;
        writer.write_all(&self.cmdsize.to_le_bytes())?;
        writer.write_all(&self.dataoff.to_le_bytes())?;
        writer.write_all(&self.datasize.to_le_bytes())?;
        Ok(())
    }
}

/// Symtab command.
#[derive(Debug, Clone, Copy)]
pub struct SymtabCommand {
    pub cmd: u32,
    pub cmdsize: u32,
    pub symoff: u32,
    pub nsyms: u32,
    pub stroff: u32,
    pub strsize: u32,
}

impl SymtabCommand {
    pub fn read<R: Read>(reader: &mut R, cmd: u32, cmdsize: u32) -> io::Result<Self> {
        let mut buf = [0u8; 16];
        reader.read_exact(&mut buf)?;
        Ok(Self {
            cmd,
            cmdsize,
            symoff: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
            nsyms: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
            stroff: u32::from_le_bytes(buf[8..12].try_into().unwrap()),
            strsize: u32::from_le_bytes(buf[12..16].try_into().unwrap()),
        })
    }
}

/// Dysymtab command.
#[derive(Debug, Clone, Copy)]
pub struct DysymtabCommand {
    pub cmd: u32,
    pub cmdsize: u32,
    pub ilocalsym: u32,
    pub nlocalsym: u32,
    pub iextdefsym: u32,
    pub nextdefsym: u32,
    pub iundefsym: u32,
    pub nundefsym: u32,
    pub tocoff: u32,
    pub ntoc: u32,
    pub modtaboff: u32,
    pub nmodtab: u32,
    pub extrefsymoff: u32,
    pub nextrefsyms: u32,
    pub indirectsymoff: u32,
    pub nindirectsyms: u32,
    pub extreloff: u32,
    pub nextrel: u32,
    pub locreloff: u32,
    pub nlocrel: u32,
}

impl DysymtabCommand {
    pub fn read<R: Read>(reader: &mut R, cmd: u32, cmdsize: u32) -> io::Result<Self> {
        let mut buf = [0u8; 72];
        reader.read_exact(&mut buf)?;
        let f = |i: usize| u32::from_le_bytes(buf[i..i + 4].try_into().unwrap());
        Ok(Self {
            cmd,
            cmdsize,
            ilocalsym: f(0),
            nlocalsym: f(4),
            iextdefsym: f(8),
            nextdefsym: f(12),
            iundefsym: f(16),
            nundefsym: f(20),
            tocoff: f(24),
            ntoc: f(28),
            modtaboff: f(32),
            nmodtab: f(36),
            extrefsymoff: f(40),
            nextrefsyms: f(44),
            indirectsymoff: f(48),
            nindirectsyms: f(52),
            extreloff: f(56),
            nextrel: f(60),
            locreloff: f(64),
            nlocrel: f(68),
        })
    }
}

/// DyldInfo command (LC_DYLD_INFO / LC_DYLD_INFO_ONLY).
#[derive(Debug, Clone, Copy)]
pub struct DyldInfoCommand {
    pub cmd: u32,
    pub cmdsize: u32,
    pub rebase_off: u32,
    pub rebase_size: u32,
    pub bind_off: u32,
    pub bind_size: u32,
    pub weak_bind_off: u32,
    pub weak_bind_size: u32,
    pub lazy_bind_off: u32,
    pub lazy_bind_size: u32,
    pub export_off: u32,
    pub export_size: u32,
}

impl DyldInfoCommand {
    pub fn read<R: Read>(reader: &mut R, cmd: u32, cmdsize: u32) -> io::Result<Self> {
        let mut buf = [0u8; 40];
        reader.read_exact(&mut buf)?;
        let f = |i: usize| u32::from_le_bytes(buf[i..i + 4].try_into().unwrap());
        Ok(Self {
            cmd,
            cmdsize,
            rebase_off: f(0),
            rebase_size: f(4),
            bind_off: f(8),
            bind_size: f(12),
            weak_bind_off: f(16),
            weak_bind_size: f(20),
            lazy_bind_off: f(24),
            lazy_bind_size: f(28),
            export_off: f(32),
            export_size: f(36),
        })
    }
}

/// Parsed load command with data.
#[derive(Debug)]
pub enum ParsedLoadCommand {
    Segment64 {
        segment: SegmentCommand64,
        sections: Vec<Section64>,
    },
    CodeSignature(LinkeditDataCommand),
    FunctionStarts(LinkeditDataCommand),
    DataInCode(LinkeditDataCommand),
    DyldChainedFixups(LinkeditDataCommand),
    DyldExportsTrie(LinkeditDataCommand),
    Symtab(SymtabCommand),
    Dysymtab(DysymtabCommand),
    DyldInfo(DyldInfoCommand),
    Other {
        cmd: u32,
        data: Vec<u8>,
    },
}

/// One architecture entry of a fat container.
#[derive(Debug, Clone, Copy)]
pub struct FatArch {
    pub cputype: i32,
    pub cpusubtype: i32,
    pub offset: u32,
    pub size: u32,
    pub align: u32,
}

/// Fat-container context preserved across a slice-0 mutation.
#[derive(Debug)]
pub struct FatContext {
    /// Arch table in container order; entry 0 describes the mutated slice.
    pub arches: Vec<FatArch>,
    /// Raw bytes of slices 1.. (slice 0 is the parsed image).
    pub others: Vec<Vec<u8>>,
    /// Whether the container stored its header little-endian.
    pub swapped: bool,
}

/// A parsed 64-bit Mach-O image, plus fat context when it came from a
/// universal container.
#[derive(Debug)]
pub struct MachImage {
    pub header: MachHeader64,
    pub load_commands: Vec<ParsedLoadCommand>,
    /// File bytes after the load commands.
    pub file_data: Vec<u8>,
    /// Offset where `file_data` starts.
    pub data_offset: usize,
    pub fat: Option<FatContext>,
}

fn name_str(raw: &[u8; 16]) -> &str {
    let len = raw.iter().position(|&c| c == 0).unwrap_or(16);
    std::str::from_utf8(&raw[..len]).unwrap_or("")
}

fn pack_name(name: &str) -> Result<[u8; 16]> {
    if name.len() > MACHO_NAME_MAX {
        return Err(Error::invalid_args(format!(
            "Mach-O name {name} exceeds {MACHO_NAME_MAX} bytes"
        )));
    }
    let mut packed = [0u8; 16];
    packed[..name.len()].copy_from_slice(name.as_bytes());
    Ok(packed)
}

/// Round `size` up to the segment page boundary.
pub fn page_align(size: usize) -> usize {
    (size + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

impl MachImage {
    /// Parse a thin or fat Mach-O from bytes.
    ///
    /// Fat containers select slice 0; the remaining slices are carried
    /// through untouched. 32-bit images are rejected outright, byte-swapped
    /// (big-endian) images are recognized but not mutated.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() >= 4 && (data[0..4] == FAT_MAGIC || data[0..4] == FAT_CIGAM) {
            return Self::parse_fat(data);
        }
        Self::parse_thin(data, None)
    }

    fn parse_fat(data: &[u8]) -> Result<Self> {
        let swapped = data[0..4] == FAT_CIGAM;
        let read_u32 = |off: usize| -> Result<u32> {
            let raw: [u8; 4] = data
                .get(off..off + 4)
                .and_then(|s| s.try_into().ok())
                .ok_or_else(|| Error::invalid_format("truncated fat header"))?;
            Ok(if swapped {
                u32::from_le_bytes(raw)
            } else {
                u32::from_be_bytes(raw)
            })
        };

        let nfat = read_u32(4)? as usize;
        if nfat == 0 {
            return Err(Error::invalid_format("fat Mach-O with no architectures"));
        }

        let mut arches = Vec::with_capacity(nfat);
        for i in 0..nfat {
            let base = 8 + i * 20;
            arches.push(FatArch {
                cputype: read_u32(base)? as i32,
                cpusubtype: read_u32(base + 4)? as i32,
                offset: read_u32(base + 8)?,
                size: read_u32(base + 12)?,
                align: read_u32(base + 16)?,
            });
        }

        let slice_bytes = |arch: &FatArch| -> Result<&[u8]> {
            let start = arch.offset as usize;
            let end = start + arch.size as usize;
            data.get(start..end)
                .ok_or_else(|| Error::invalid_format("fat slice out of bounds"))
        };

        let first = slice_bytes(&arches[0])?.to_vec();
        let others = arches[1..]
            .iter()
            .map(|a| slice_bytes(a).map(|s| s.to_vec()))
            .collect::<Result<Vec<_>>>()?;

        Self::parse_thin(
            &first,
            Some(FatContext {
                arches,
                others,
                swapped,
            }),
        )
    }

    fn parse_thin(data: &[u8], fat: Option<FatContext>) -> Result<Self> {
        let mut cursor = io::Cursor::new(data);
        let header = MachHeader64::read(&mut cursor)
            .map_err(|_| Error::invalid_format("truncated Mach-O header"))?;
        match header.magic {
            MH_MAGIC_64 => {}
            MH_MAGIC_32 | MH_CIGAM_32 => {
                return Err(Error::invalid_format("32-bit Mach-O is not supported"))
            }
            MH_CIGAM_64 => {
                return Err(Error::UnsupportedArch(
                    "byte-swapped Mach-O cannot be mutated".into(),
                ))
            }
            other => {
                return Err(Error::invalid_format(format!(
                    "unrecognized Mach-O magic 0x{other:x}"
                )))
            }
        }

        let mut load_commands = Vec::with_capacity(header.ncmds as usize);
        for _ in 0..header.ncmds {
            let cmd_start = cursor.position() as usize;
            let lc = LoadCommand::read(&mut cursor)
                .map_err(|_| Error::invalid_format("truncated load command"))?;
            if (lc.cmdsize as usize) < LoadCommand::SIZE {
                return Err(Error::invalid_format("load command smaller than header"));
            }

            let parsed = Self::read_command(&mut cursor, lc)
                .map_err(|_| Error::invalid_format("truncated load command payload"))?;

            let expected_end = cmd_start + lc.cmdsize as usize;
            if expected_end > data.len() {
                return Err(Error::invalid_format("load command overruns file"));
            }
            cursor.set_position(expected_end as u64);
            load_commands.push(parsed);
        }

        let data_offset = cursor.position() as usize;
        let file_data = data[data_offset..].to_vec();

        Ok(Self {
            header,
            load_commands,
            file_data,
            data_offset,
            fat,
        })
    }

    fn read_command(cursor: &mut io::Cursor<&[u8]>, lc: LoadCommand) -> io::Result<ParsedLoadCommand> {
        Ok(match lc.cmd {
            LC_SEGMENT_64 => {
                let segment = SegmentCommand64::read(cursor, lc.cmd, lc.cmdsize)?;
                let mut sections = Vec::with_capacity(segment.nsects as usize);
                for _ in 0..segment.nsects {
                    sections.push(Section64::read(cursor)?);
                }
                ParsedLoadCommand::Segment64 { segment, sections }
            }
            LC_CODE_SIGNATURE => {
                ParsedLoadCommand::CodeSignature(LinkeditDataCommand::read(cursor, lc.cmd, lc.cmdsize)?)
            }
            LC_FUNCTION_STARTS => {
                ParsedLoadCommand::FunctionStarts(LinkeditDataCommand::read(cursor, lc.cmd, lc.cmdsize)?)
            }
            LC_DATA_IN_CODE => {
                ParsedLoadCommand::DataInCode(LinkeditDataCommand::read(cursor, lc.cmd, lc.cmdsize)?)
            }
            LC_DYLD_CHAINED_FIXUPS => {
                ParsedLoadCommand::DyldChainedFixups(LinkeditDataCommand::read(cursor, lc.cmd, lc.cmdsize)?)
            }
            LC_DYLD_EXPORTS_TRIE => {
                ParsedLoadCommand::DyldExportsTrie(LinkeditDataCommand::read(cursor, lc.cmd, lc.cmdsize)?)
            }
            LC_SYMTAB => ParsedLoadCommand::Symtab(SymtabCommand::read(cursor, lc.cmd, lc.cmdsize)?),
            LC_DYSYMTAB => {
                ParsedLoadCommand::Dysymtab(DysymtabCommand::read(cursor, lc.cmd, lc.cmdsize)?)
            }
            LC_DYLD_INFO_ONLY => {
                ParsedLoadCommand::DyldInfo(DyldInfoCommand::read(cursor, lc.cmd, lc.cmdsize)?)
            }
            _ => {
                let remaining = lc.cmdsize as usize - LoadCommand::SIZE;
                let mut cmd_data = vec![0u8; remaining];
                cursor.read_exact(&mut cmd_data)?;
                ParsedLoadCommand::Other {
                    cmd: lc.cmd,
                    data: cmd_data,
                }
            }
        })
    }

    /// Find a segment load command by name.
    pub fn find_segment(&self, name: &str) -> Option<usize> {
        self.load_commands.iter().position(|cmd| {
            matches!(cmd, ParsedLoadCommand::Segment64 { segment, .. } if segment.name() == name)
        })
    }

    /// Find a section by segment and section name.
    pub fn find_section(&self, seg_name: Option<&str>, sect_name: &str) -> Option<(usize, usize)> {
        for (cmd_idx, cmd) in self.load_commands.iter().enumerate() {
            if let ParsedLoadCommand::Segment64 { segment, sections } = cmd {
                if let Some(want) = seg_name {
                    if segment.name() != want {
                        continue;
                    }
                }
                for (sect_idx, section) in sections.iter().enumerate() {
                    if section.name() == sect_name {
                        return Some((cmd_idx, sect_idx));
                    }
                }
            }
        }
        None
    }

    /// Borrow the raw bytes of a section, when its file range is sane.
    pub fn section_bytes(&self, seg_name: Option<&str>, sect_name: &str) -> Option<&[u8]> {
        let (cmd_idx, sect_idx) = self.find_section(seg_name, sect_name)?;
        let section = match &self.load_commands[cmd_idx] {
            ParsedLoadCommand::Segment64 { sections, .. } => &sections[sect_idx],
            _ => return None,
        };
        self.bytes_at(section.offset as usize, section.size as usize)
    }

    fn bytes_at(&self, offset: usize, size: usize) -> Option<&[u8]> {
        if size == 0 {
            return Some(&[]);
        }
        let start = offset.checked_sub(self.data_offset)?;
        self.file_data.get(start..start + size)
    }

    /// Enumerate `(segment, section, size, offset)` for every section.
    pub fn sections(&self) -> Vec<(String, String, u64, u64)> {
        let mut out = Vec::new();
        for cmd in &self.load_commands {
            if let ParsedLoadCommand::Segment64 { segment, sections } = cmd {
                for section in sections {
                    out.push((
                        segment.name().to_string(),
                        section.name().to_string(),
                        section.size,
                        section.offset as u64,
                    ));
                }
            }
        }
        out
    }

    /// Patch bytes inside a section's file content in place.
    pub fn patch_section(
        &mut self,
        seg_name: Option<&str>,
        sect_name: &str,
        offset: usize,
        bytes: &[u8],
    ) -> Result<()> {
        let (cmd_idx, sect_idx) = self
            .find_section(seg_name, sect_name)
            .ok_or_else(|| Error::section_not_found(sect_name))?;
        let (sect_off, sect_size) = match &self.load_commands[cmd_idx] {
            ParsedLoadCommand::Segment64 { sections, .. } => {
                (sections[sect_idx].offset as usize, sections[sect_idx].size as usize)
            }
            _ => unreachable!(),
        };
        if offset + bytes.len() > sect_size {
            return Err(Error::invalid_args("patch range outside section"));
        }
        let start = sect_off + offset - self.data_offset;
        self.file_data[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Unused padding between the end of the load commands and the first
    /// section's file content. New load commands grow into this space.
    fn load_command_headroom(&self) -> usize {
        let cmds_end = MachHeader64::SIZE + self.header.sizeofcmds as usize;
        let first_content = self
            .load_commands
            .iter()
            .filter_map(|cmd| match cmd {
                ParsedLoadCommand::Segment64 { sections, .. } => sections
                    .iter()
                    .filter(|s| s.offset != 0)
                    .map(|s| s.offset as usize)
                    .min(),
                _ => None,
            })
            .min()
            .unwrap_or(self.data_offset + self.file_data.len());
        first_content.saturating_sub(cmds_end)
    }

    fn reserve_command_space(&mut self, needed: usize) -> Result<()> {
        if self.load_command_headroom() < needed {
            return Err(Error::write_failed(format!(
                "no room for {needed} more bytes of load commands"
            )));
        }
        Ok(())
    }

    /// End of the highest mapped segment in VM space.
    fn vm_end(&self) -> u64 {
        self.load_commands
            .iter()
            .filter_map(|cmd| match cmd {
                ParsedLoadCommand::Segment64 { segment, .. } => {
                    Some(segment.vmaddr + segment.vmsize)
                }
                _ => None,
            })
            .max()
            .unwrap_or(0)
    }

    /// Add a section, creating the target segment when it does not exist.
    ///
    /// A new segment is mapped RWX, its file content spliced in directly
    /// before `__LINKEDIT`'s region, and every file offset past the splice
    /// point shifted by a page-aligned delta. The section goes into the
    /// segment command before the segment command joins the image, so
    /// `ncmds`/`sizeofcmds` account for both in one step.
    pub fn add_section(
        &mut self,
        seg_name: &str,
        sect_name: &str,
        content: &[u8],
        align_log2: u32,
    ) -> Result<()> {
        let sectname = pack_name(sect_name)?;
        let segname = pack_name(seg_name)?;

        match self.find_segment(seg_name) {
            Some(cmd_idx) => {
                self.reserve_command_space(Section64::SIZE)?;
                self.grow_segment(cmd_idx, sectname, segname, content, align_log2)
            }
            None => {
                self.reserve_command_space(SegmentCommand64::SIZE + Section64::SIZE)?;
                self.create_segment(segname, sectname, content, align_log2)
            }
        }
    }

    fn grow_segment(
        &mut self,
        cmd_idx: usize,
        sectname: [u8; 16],
        segname: [u8; 16],
        content: &[u8],
        align_log2: u32,
    ) -> Result<()> {
        let (insert_at, seg_vmaddr, seg_fileoff, old_vmsize) =
            match &self.load_commands[cmd_idx] {
                ParsedLoadCommand::Segment64 { segment, .. } => (
                    (segment.fileoff + segment.filesize) as usize,
                    segment.vmaddr,
                    segment.fileoff,
                    segment.vmsize,
                ),
                _ => unreachable!(),
            };

        let delta = page_align(content.len());
        self.splice_in(insert_at, content, delta)?;
        self.shift_file_offsets(insert_at, delta as i64, Some(cmd_idx));

        let section = Section64 {
            sectname,
            segname,
            addr: seg_vmaddr + (insert_at as u64 - seg_fileoff),
            size: content.len() as u64,
            offset: insert_at as u32,
            align: align_log2,
            reloff: 0,
            nreloc: 0,
            flags: S_REGULAR,
            reserved1: 0,
            reserved2: 0,
            reserved3: 0,
        };

        if let ParsedLoadCommand::Segment64 { segment, sections } = &mut self.load_commands[cmd_idx]
        {
            segment.filesize += delta as u64;
            segment.vmsize += delta as u64;
            segment.nsects += 1;
            segment.cmdsize += Section64::SIZE as u32;
            sections.push(section);
        }
        self.header.sizeofcmds += Section64::SIZE as u32;

        let vm_delta = delta as i64;
        if vm_delta > 0 {
            self.shift_vmaddrs_above(seg_vmaddr, old_vmsize, vm_delta, cmd_idx);
        }
        Ok(())
    }

    fn create_segment(
        &mut self,
        segname: [u8; 16],
        sectname: [u8; 16],
        content: &[u8],
        align_log2: u32,
    ) -> Result<()> {
        let insert_at = match self.find_segment("__LINKEDIT") {
            Some(idx) => match &self.load_commands[idx] {
                ParsedLoadCommand::Segment64 { segment, .. } => segment.fileoff as usize,
                _ => unreachable!(),
            },
            None => {
                let aligned = page_align(self.data_offset + self.file_data.len());
                self.file_data.resize(aligned - self.data_offset, 0);
                aligned
            }
        };

        let filesize = page_align(content.len());
        let vmaddr = (self.vm_end() + PAGE_SIZE as u64 - 1) & !(PAGE_SIZE as u64 - 1);
        let vmsize = page_align(content.len().max(1)) as u64;

        self.splice_in(insert_at, content, filesize)?;
        self.shift_file_offsets(insert_at, filesize as i64, None);

        let section = Section64 {
            sectname,
            segname,
            addr: vmaddr,
            size: content.len() as u64,
            offset: insert_at as u32,
            align: align_log2,
            reloff: 0,
            nreloc: 0,
            flags: S_REGULAR,
            reserved1: 0,
            reserved2: 0,
            reserved3: 0,
        };
        let segment = SegmentCommand64 {
            cmd: LC_SEGMENT_64,
            cmdsize: (SegmentCommand64::SIZE + Section64::SIZE) as u32,
            segname,
            vmaddr,
            vmsize,
            fileoff: insert_at as u64,
            filesize: filesize as u64,
            maxprot: VM_PROT_RWX,
            initprot: VM_PROT_RWX,
            nsects: 1,
            flags: 0,
        };

        self.load_commands.push(ParsedLoadCommand::Segment64 {
            segment,
            sections: vec![section],
        });
        self.header.ncmds += 1;
        self.header.sizeofcmds += (SegmentCommand64::SIZE + Section64::SIZE) as u32;
        Ok(())
    }

    /// Insert `pad_to` zeroed bytes at absolute file offset `at`, with
    /// `content` at the front of the inserted range.
    fn splice_in(&mut self, at: usize, content: &[u8], pad_to: usize) -> Result<()> {
        let rel = at
            .checked_sub(self.data_offset)
            .ok_or_else(|| Error::invalid_format("segment splice before load commands"))?;
        if rel > self.file_data.len() {
            return Err(Error::invalid_format("segment splice past end of file"));
        }
        let mut block = vec![0u8; pad_to];
        block[..content.len()].copy_from_slice(content);
        self.file_data.splice(rel..rel, block);
        Ok(())
    }

    /// Remove a section's load-command entry, optionally zeroing its bytes.
    ///
    /// The file range stays in place (dead, zeroed) so no other offsets move.
    pub fn remove_section(
        &mut self,
        seg_name: Option<&str>,
        sect_name: &str,
        clear_bytes: bool,
    ) -> Result<()> {
        let (cmd_idx, sect_idx) = self
            .find_section(seg_name, sect_name)
            .ok_or_else(|| Error::section_not_found(sect_name))?;

        let (offset, size) = match &self.load_commands[cmd_idx] {
            ParsedLoadCommand::Segment64 { sections, .. } => {
                (sections[sect_idx].offset as usize, sections[sect_idx].size as usize)
            }
            _ => unreachable!(),
        };

        if clear_bytes && size > 0 {
            if let Some(rel) = offset.checked_sub(self.data_offset) {
                if rel + size <= self.file_data.len() {
                    self.file_data[rel..rel + size].fill(0);
                }
            }
        }

        if let ParsedLoadCommand::Segment64 { segment, sections } = &mut self.load_commands[cmd_idx]
        {
            sections.remove(sect_idx);
            segment.nsects -= 1;
            segment.cmdsize -= Section64::SIZE as u32;
        }
        self.header.sizeofcmds -= Section64::SIZE as u32;
        Ok(())
    }

    /// Remove a whole segment and its file content.
    pub fn remove_segment(&mut self, name: &str) -> Result<()> {
        let cmd_idx = self
            .find_segment(name)
            .ok_or_else(|| Error::section_not_found(name))?;
        let (fileoff, filesize, cmdsize) = match &self.load_commands[cmd_idx] {
            ParsedLoadCommand::Segment64 { segment, .. } => (
                segment.fileoff as usize,
                segment.filesize as usize,
                segment.cmdsize,
            ),
            _ => unreachable!(),
        };

        if filesize > 0 {
            let rel = fileoff
                .checked_sub(self.data_offset)
                .ok_or_else(|| Error::invalid_format("segment overlaps load commands"))?;
            if rel + filesize > self.file_data.len() {
                return Err(Error::invalid_format("segment overruns file"));
            }
            self.file_data.drain(rel..rel + filesize);
            self.shift_file_offsets(fileoff + filesize, -(filesize as i64), None);
        }

        self.load_commands.remove(cmd_idx);
        self.header.ncmds -= 1;
        self.header.sizeofcmds -= cmdsize;
        Ok(())
    }

    /// Whether the image carries an LC_CODE_SIGNATURE command.
    pub fn has_code_signature(&self) -> bool {
        self.load_commands
            .iter()
            .any(|cmd| matches!(cmd, ParsedLoadCommand::CodeSignature(_)))
    }

    /// Drop the code signature load command and its `__LINKEDIT` tail.
    ///
    /// Returns `true` when a signature was present.
    pub fn remove_code_signature(&mut self) -> bool {
        let Some(idx) = self
            .load_commands
            .iter()
            .position(|cmd| matches!(cmd, ParsedLoadCommand::CodeSignature(_)))
        else {
            return false;
        };

        let dataoff = match &self.load_commands[idx] {
            ParsedLoadCommand::CodeSignature(cs) => cs.dataoff as usize,
            _ => unreachable!(),
        };

        // The signature blob sits at the end of __LINKEDIT, which is the end
        // of the file; truncating both keeps every other offset valid.
        if let Some(rel) = dataoff.checked_sub(self.data_offset) {
            if rel <= self.file_data.len() {
                self.file_data.truncate(rel);
            }
        }
        if let Some(le_idx) = self.find_segment("__LINKEDIT") {
            if let ParsedLoadCommand::Segment64 { segment, .. } = &mut self.load_commands[le_idx] {
                let seg_fileoff = segment.fileoff as usize;
                if dataoff >= seg_fileoff {
                    segment.filesize = (dataoff - seg_fileoff) as u64;
                }
            }
        }

        self.load_commands.remove(idx);
        self.header.ncmds -= 1;
        self.header.sizeofcmds -= LinkeditDataCommand::SIZE as u32;
        true
    }

    /// Shift file offsets at or past `threshold` by `delta`.
    fn shift_file_offsets(&mut self, threshold: usize, delta: i64, skip_cmd: Option<usize>) {
        let bump_u64 = |v: &mut u64| {
            if *v != 0 && *v as usize >= threshold {
                *v = (*v as i64 + delta) as u64;
            }
        };
        let bump_u32 = |v: &mut u32| {
            if *v != 0 && *v as usize >= threshold {
                *v = (*v as i64 + delta) as u32;
            }
        };

        for (idx, cmd) in self.load_commands.iter_mut().enumerate() {
            match cmd {
                ParsedLoadCommand::Segment64 { segment, sections } => {
                    if Some(idx) == skip_cmd {
                        continue;
                    }
                    bump_u64(&mut segment.fileoff);
                    for section in sections {
                        bump_u32(&mut section.offset);
                    }
                }
                ParsedLoadCommand::CodeSignature(lc)
                | ParsedLoadCommand::FunctionStarts(lc)
                | ParsedLoadCommand::DataInCode(lc)
                | ParsedLoadCommand::DyldChainedFixups(lc)
                | ParsedLoadCommand::DyldExportsTrie(lc) => {
                    bump_u32(&mut lc.dataoff);
                }
                ParsedLoadCommand::Symtab(st) => {
                    bump_u32(&mut st.symoff);
                    bump_u32(&mut st.stroff);
                }
                ParsedLoadCommand::Dysymtab(dst) => {
                    bump_u32(&mut dst.tocoff);
                    bump_u32(&mut dst.modtaboff);
                    bump_u32(&mut dst.extrefsymoff);
                    bump_u32(&mut dst.indirectsymoff);
                    bump_u32(&mut dst.extreloff);
                    bump_u32(&mut dst.locreloff);
                }
                ParsedLoadCommand::DyldInfo(di) => {
                    bump_u32(&mut di.rebase_off);
                    bump_u32(&mut di.bind_off);
                    bump_u32(&mut di.weak_bind_off);
                    bump_u32(&mut di.lazy_bind_off);
                    bump_u32(&mut di.export_off);
                }
                ParsedLoadCommand::Other { .. } => {}
            }
        }
    }

    /// Shift vmaddrs of segments mapped above the grown segment.
    fn shift_vmaddrs_above(&mut self, base: u64, base_size: u64, delta: i64, skip_cmd: usize) {
        for (idx, cmd) in self.load_commands.iter_mut().enumerate() {
            if idx == skip_cmd {
                continue;
            }
            if let ParsedLoadCommand::Segment64 { segment, sections } = cmd {
                if segment.vmaddr >= base + base_size && segment.vmaddr != 0 {
                    segment.vmaddr = (segment.vmaddr as i64 + delta) as u64;
                    for section in sections {
                        section.addr = (section.addr as i64 + delta) as u64;
                    }
                }
            }
        }
    }

    fn write_load_command(&self, out: &mut Vec<u8>, cmd: &ParsedLoadCommand) {
        match cmd {
            ParsedLoadCommand::Segment64 { segment, sections } => {
                segment.write(out).expect("vec write");
                for section in sections {
                    section.write(out).expect("vec write");
                }
            }
            ParsedLoadCommand::CodeSignature(lc)
            | ParsedLoadCommand::FunctionStarts(lc)
            | ParsedLoadCommand::DataInCode(lc)
            | ParsedLoadCommand::DyldChainedFixups(lc)
            | ParsedLoadCommand::DyldExportsTrie(lc) => {
                lc.write(out).expect("vec write");
            }
            ParsedLoadCommand::Symtab(st) => {
                out.extend(&st.cmd.to_le_bytes());
                out.extend(&st.cmdsize.to_le_bytes());
                out.extend(&st.symoff.to_le_bytes());
                out.extend(&st.nsyms.to_le_bytes());
                out.extend(&st.stroff.to_le_bytes());
                out.extend(&st.strsize.to_le_bytes());
            }
            ParsedLoadCommand::Dysymtab(dst) => {
                out.extend(&dst.cmd.to_le_bytes());
                out.extend(&dst.cmdsize.to_le_bytes());
                out.extend(&dst.ilocalsym.to_le_bytes());
                out.extend(&dst.nlocalsym.to_le_bytes());
                out.extend(&dst.iextdefsym.to_le_bytes());
                out.extend(&dst.nextdefsym.to_le_bytes());
                out.extend(&dst.iundefsym.to_le_bytes());
                out.extend(&dst.nundefsym.to_le_bytes());
                out.extend(&dst.tocoff.to_le_bytes());
                out.extend(&dst.ntoc.to_le_bytes());
                out.extend(&dst.modtaboff.to_le_bytes());
                out.extend(&dst.nmodtab.to_le_bytes());
                out.extend(&dst.extrefsymoff.to_le_bytes());
                out.extend(&dst.nextrefsyms.to_le_bytes());
                out.extend(&dst.indirectsymoff.to_le_bytes());
                out.extend(&dst.nindirectsyms.to_le_bytes());
                out.extend(&dst.extreloff.to_le_bytes());
                out.extend(&dst.nextrel.to_le_bytes());
                out.extend(&dst.locreloff.to_le_bytes());
                out.extend(&dst.nlocrel.to_le_bytes());
            }
            ParsedLoadCommand::DyldInfo(di) => {
                out.extend(&di.cmd.to_le_bytes());
                out.extend(&di.cmdsize.to_le_bytes());
                out.extend(&di.rebase_off.to_le_bytes());
                out.extend(&di.rebase_size.to_le_bytes());
                out.extend(&di.bind_off.to_le_bytes());
                out.extend(&di.bind_size.to_le_bytes());
                out.extend(&di.weak_bind_off.to_le_bytes());
                out.extend(&di.weak_bind_size.to_le_bytes());
                out.extend(&di.lazy_bind_off.to_le_bytes());
                out.extend(&di.lazy_bind_size.to_le_bytes());
                out.extend(&di.export_off.to_le_bytes());
                out.extend(&di.export_size.to_le_bytes());
            }
            ParsedLoadCommand::Other { cmd, data } => {
                out.extend(&cmd.to_le_bytes());
                out.extend(&((data.len() + LoadCommand::SIZE) as u32).to_le_bytes());
                out.extend(data);
            }
        }
    }

    /// Render the thin (slice-0) image to bytes.
    ///
    /// `data_offset` is fixed at parse time, so grown load commands consume
    /// the padding bytes at the head of `file_data` (guaranteed free by the
    /// headroom check) while shrunk ones leave zero padding behind.
    pub fn write_thin(&self) -> Vec<u8> {
        let mut result = Vec::with_capacity(self.data_offset + self.file_data.len());
        self.header.write(&mut result).expect("vec write");
        for cmd in &self.load_commands {
            self.write_load_command(&mut result, cmd);
        }

        let cmds_end = MachHeader64::SIZE + self.header.sizeofcmds as usize;
        debug_assert_eq!(result.len(), cmds_end);
        if cmds_end <= self.data_offset {
            result.resize(self.data_offset, 0);
            result.extend(&self.file_data);
        } else {
            let consumed = cmds_end - self.data_offset;
            result.extend(&self.file_data[consumed..]);
        }
        result
    }

    /// Render the image, reassembling the fat container when more than one
    /// slice is present. A single-slice fat input is written back thin.
    pub fn write(&self) -> Vec<u8> {
        let slice0 = self.write_thin();
        let Some(fat) = &self.fat else {
            return slice0;
        };
        if fat.others.is_empty() {
            return slice0;
        }

        let mut arches = fat.arches.clone();
        arches[0].size = slice0.len() as u32;

        let header_len = 8 + arches.len() * 20;
        let mut offsets = Vec::with_capacity(arches.len());
        let mut cursor = header_len;
        for arch in &arches {
            let align = 1usize << arch.align.min(20);
            cursor = (cursor + align - 1) & !(align - 1);
            offsets.push(cursor);
            cursor += arch.size as usize;
        }

        let put_u32 = |out: &mut Vec<u8>, v: u32| {
            if fat.swapped {
                out.extend(&v.to_le_bytes());
            } else {
                out.extend(&v.to_be_bytes());
            }
        };

        let mut out = Vec::with_capacity(cursor);
        out.extend(if fat.swapped { &FAT_CIGAM } else { &FAT_MAGIC });
        put_u32(&mut out, arches.len() as u32);
        for (arch, offset) in arches.iter().zip(&offsets) {
            put_u32(&mut out, arch.cputype as u32);
            put_u32(&mut out, arch.cpusubtype as u32);
            put_u32(&mut out, *offset as u32);
            put_u32(&mut out, arch.size);
            put_u32(&mut out, arch.align);
        }
        for (i, offset) in offsets.iter().enumerate() {
            out.resize(*offset, 0);
            if i == 0 {
                out.extend(&slice0);
            } else {
                out.extend(&fat.others[i - 1]);
            }
        }
        out
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub const FIXTURE_FUSE: &[u8] = b"NODE_SEA_FUSE_fce680ab2cc467b6e072b8b5df1996b2:0";

    /// Build a minimal thin Mach-O: __TEXT with __text + __cstring (holding
    /// the unflipped fuse marker), __LINKEDIT with symtab data, optionally a
    /// code signature at the linkedit tail.
    pub fn build_fixture(with_signature: bool) -> Vec<u8> {
        let ncmds = if with_signature { 4 } else { 3 };
        let sizeofcmds = (SegmentCommand64::SIZE + 2 * Section64::SIZE)
            + SegmentCommand64::SIZE
            + 24
            + if with_signature { LinkeditDataCommand::SIZE } else { 0 };

        let header = MachHeader64 {
            magic: MH_MAGIC_64,
            cputype: 0x0100000c,
            cpusubtype: 0,
            filetype: 2,
            ncmds,
            sizeofcmds: sizeofcmds as u32,
            flags: 0x200085,
            reserved: 0,
        };

        let mut text_sections = Vec::new();
        let mut sectname = [0u8; 16];
        sectname[..6].copy_from_slice(b"__text");
        let mut textname = [0u8; 16];
        textname[..6].copy_from_slice(b"__TEXT");
        text_sections.push(Section64 {
            sectname,
            segname: textname,
            addr: 0x100001000,
            size: 8,
            offset: 0x1000,
            align: 4,
            reloff: 0,
            nreloc: 0,
            flags: 0x80000400,
            reserved1: 0,
            reserved2: 0,
            reserved3: 0,
        });
        let mut cstrname = [0u8; 16];
        cstrname[..9].copy_from_slice(b"__cstring");
        text_sections.push(Section64 {
            sectname: cstrname,
            segname: textname,
            addr: 0x100002000,
            size: FIXTURE_FUSE.len() as u64,
            offset: 0x2000,
            align: 0,
            reloff: 0,
            nreloc: 0,
            flags: 0x2,
            reserved1: 0,
            reserved2: 0,
            reserved3: 0,
        });

        let text = SegmentCommand64 {
            cmd: LC_SEGMENT_64,
            cmdsize: (SegmentCommand64::SIZE + 2 * Section64::SIZE) as u32,
            segname: textname,
            vmaddr: 0x100000000,
            vmsize: 0x4000,
            fileoff: 0,
            filesize: 0x4000,
            maxprot: 5,
            initprot: 5,
            nsects: 2,
            flags: 0,
        };

        let mut linkname = [0u8; 16];
        linkname[..10].copy_from_slice(b"__LINKEDIT");
        let linkedit = SegmentCommand64 {
            cmd: LC_SEGMENT_64,
            cmdsize: SegmentCommand64::SIZE as u32,
            segname: linkname,
            vmaddr: 0x100004000,
            vmsize: 0x4000,
            fileoff: 0x4000,
            filesize: 0x100,
            maxprot: 1,
            initprot: 1,
            nsects: 0,
            flags: 0,
        };

        let mut out = Vec::new();
        header.write(&mut out).unwrap();
        text.write(&mut out).unwrap();
        for s in &text_sections {
            s.write(&mut out).unwrap();
        }
        linkedit.write(&mut out).unwrap();

        // LC_SYMTAB
        out.extend(&LC_SYMTAB.to_le_bytes());
        out.extend(&24u32.to_le_bytes());
        out.extend(&0x4000u32.to_le_bytes()); // symoff
        out.extend(&2u32.to_le_bytes()); // nsyms
        out.extend(&0x4040u32.to_le_bytes()); // stroff
        out.extend(&0x40u32.to_le_bytes()); // strsize

        if with_signature {
            let cs = LinkeditDataCommand {
                cmd: LC_CODE_SIGNATURE,
                cmdsize: LinkeditDataCommand::SIZE as u32,
                dataoff: 0x4080,
                datasize: 0x80,
            };
            cs.write(&mut out).unwrap();
        }

        out.resize(0x1000, 0);
        out.extend(&[0x90u8; 8]); // __text
        out.resize(0x2000, 0);
        out.extend(FIXTURE_FUSE); // __cstring
        out.resize(0x4000, 0);
        out.extend(vec![0xAB; 0x100]); // __LINKEDIT payload
        out
    }

    #[test]
    fn test_parse_fixture() {
        let image = MachImage::parse(&build_fixture(false)).unwrap();
        assert_eq!(image.header.ncmds, 3);
        assert!(image.find_segment("__TEXT").is_some());
        assert!(image.find_segment("__LINKEDIT").is_some());
        let cstring = image.section_bytes(Some("__TEXT"), "__cstring").unwrap();
        assert_eq!(cstring, FIXTURE_FUSE);
    }

    #[test]
    fn test_rejects_32bit() {
        let mut data = build_fixture(false);
        data[0..4].copy_from_slice(&MH_MAGIC_32.to_le_bytes());
        assert!(matches!(
            MachImage::parse(&data),
            Err(Error::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_rejects_byte_swapped() {
        let mut data = build_fixture(false);
        data[0..4].copy_from_slice(&MH_CIGAM_64.to_le_bytes());
        assert!(matches!(
            MachImage::parse(&data),
            Err(Error::UnsupportedArch(_))
        ));
    }

    #[test]
    fn test_add_section_creates_segment_and_roundtrips() {
        let mut image = MachImage::parse(&build_fixture(false)).unwrap();
        image
            .add_section("NODE_SEA", "__NODE_SEA_BLOB", &[0x11, 0x22, 0x33], 2)
            .unwrap();

        let written = image.write();
        let reparsed = MachImage::parse(&written).unwrap();
        assert_eq!(
            reparsed.section_bytes(Some("NODE_SEA"), "__NODE_SEA_BLOB"),
            Some(&[0x11u8, 0x22, 0x33][..])
        );
        // Linkedit and symtab shifted past the new page-aligned segment.
        if let Some(idx) = reparsed.find_segment("__LINKEDIT") {
            if let ParsedLoadCommand::Segment64 { segment, .. } = &reparsed.load_commands[idx] {
                assert_eq!(segment.fileoff, 0x8000);
            }
        }
        for cmd in &reparsed.load_commands {
            if let ParsedLoadCommand::Symtab(st) = cmd {
                assert_eq!(st.symoff, 0x8000);
                assert_eq!(st.stroff, 0x8040);
            }
        }
        // Linkedit bytes are intact.
        let written_tail = &written[written.len() - 0x100..];
        assert!(written_tail.iter().all(|&b| b == 0xAB));
    }

    #[test]
    fn test_add_second_section_to_existing_segment() {
        let mut image = MachImage::parse(&build_fixture(false)).unwrap();
        image
            .add_section("NODE_SEA", "__NODE_SEA_BLOB", b"sea", 2)
            .unwrap();
        image
            .add_section("NODE_SEA", "__SMOL_VFS_BLOB", b"vfs-bytes", 2)
            .unwrap();

        let reparsed = MachImage::parse(&image.write()).unwrap();
        assert_eq!(
            reparsed.section_bytes(Some("NODE_SEA"), "__NODE_SEA_BLOB"),
            Some(&b"sea"[..])
        );
        assert_eq!(
            reparsed.section_bytes(Some("NODE_SEA"), "__SMOL_VFS_BLOB"),
            Some(&b"vfs-bytes"[..])
        );
        let idx = reparsed.find_segment("NODE_SEA").unwrap();
        if let ParsedLoadCommand::Segment64 { segment, .. } = &reparsed.load_commands[idx] {
            assert_eq!(segment.nsects, 2);
            assert_eq!(segment.initprot, VM_PROT_RWX);
        }
    }

    #[test]
    fn test_zero_length_section() {
        let mut image = MachImage::parse(&build_fixture(false)).unwrap();
        image.add_section("NODE_SEA", "__SMOL_VFS_BLOB", &[], 2).unwrap();
        let reparsed = MachImage::parse(&image.write()).unwrap();
        assert_eq!(
            reparsed.section_bytes(Some("NODE_SEA"), "__SMOL_VFS_BLOB"),
            Some(&[][..])
        );
    }

    #[test]
    fn test_remove_section_keeps_layout() {
        let mut image = MachImage::parse(&build_fixture(false)).unwrap();
        image.add_section("NODE_SEA", "__NODE_SEA_BLOB", b"abc", 2).unwrap();
        let before = image.write().len();

        let mut image = MachImage::parse(&image.write()).unwrap();
        image.remove_section(Some("NODE_SEA"), "__NODE_SEA_BLOB", true).unwrap();
        let written = image.write();
        assert_eq!(written.len(), before);

        let reparsed = MachImage::parse(&written).unwrap();
        assert!(reparsed.section_bytes(Some("NODE_SEA"), "__NODE_SEA_BLOB").is_none());
        // Other content untouched.
        assert_eq!(
            reparsed.section_bytes(Some("__TEXT"), "__cstring"),
            Some(FIXTURE_FUSE)
        );
    }

    #[test]
    fn test_remove_segment() {
        let mut image = MachImage::parse(&build_fixture(false)).unwrap();
        image.add_section("NODE_SEA", "__NODE_SEA_BLOB", b"abc", 2).unwrap();
        let mut image = MachImage::parse(&image.write()).unwrap();
        image.remove_segment("NODE_SEA").unwrap();

        let reparsed = MachImage::parse(&image.write()).unwrap();
        assert!(reparsed.find_segment("NODE_SEA").is_none());
        // Linkedit moved back to its original spot.
        let idx = reparsed.find_segment("__LINKEDIT").unwrap();
        if let ParsedLoadCommand::Segment64 { segment, .. } = &reparsed.load_commands[idx] {
            assert_eq!(segment.fileoff, 0x4000);
        }
        assert_eq!(
            reparsed.section_bytes(Some("__TEXT"), "__cstring"),
            Some(FIXTURE_FUSE)
        );
    }

    #[test]
    fn test_remove_code_signature_truncates() {
        let mut image = MachImage::parse(&build_fixture(true)).unwrap();
        assert!(image.has_code_signature());
        assert!(image.remove_code_signature());
        assert!(!image.has_code_signature());

        let written = image.write();
        assert_eq!(written.len(), 0x4080);
        let reparsed = MachImage::parse(&written).unwrap();
        let idx = reparsed.find_segment("__LINKEDIT").unwrap();
        if let ParsedLoadCommand::Segment64 { segment, .. } = &reparsed.load_commands[idx] {
            assert_eq!(segment.filesize, 0x80);
        }
    }

    #[test]
    fn test_patch_section() {
        let mut image = MachImage::parse(&build_fixture(false)).unwrap();
        let off = FIXTURE_FUSE.len() - 1;
        image.patch_section(Some("__TEXT"), "__cstring", off, b"1").unwrap();
        let bytes = image.section_bytes(Some("__TEXT"), "__cstring").unwrap();
        assert_eq!(bytes[off], b'1');
    }

    #[test]
    fn test_fat_single_slice_writes_thin() {
        let thin = build_fixture(false);
        let mut fat = Vec::new();
        fat.extend(&FAT_MAGIC);
        fat.extend(&1u32.to_be_bytes());
        fat.extend(&0x0100000cu32.to_be_bytes()); // cputype
        fat.extend(&0u32.to_be_bytes()); // cpusubtype
        fat.extend(&0x1000u32.to_be_bytes()); // offset
        fat.extend(&(thin.len() as u32).to_be_bytes());
        fat.extend(&12u32.to_be_bytes()); // align 2^12
        fat.resize(0x1000, 0);
        fat.extend(&thin);

        let image = MachImage::parse(&fat).unwrap();
        let written = image.write();
        assert_eq!(&written[0..4], &MH_MAGIC_64.to_le_bytes());
    }

    #[test]
    fn test_fat_two_slices_preserved() {
        let thin = build_fixture(false);
        let other = vec![0x42u8; 64];
        let mut fat = Vec::new();
        fat.extend(&FAT_MAGIC);
        fat.extend(&2u32.to_be_bytes());
        // slice 0
        fat.extend(&0x0100000cu32.to_be_bytes());
        fat.extend(&0u32.to_be_bytes());
        fat.extend(&0x1000u32.to_be_bytes());
        fat.extend(&(thin.len() as u32).to_be_bytes());
        fat.extend(&12u32.to_be_bytes());
        // slice 1
        fat.extend(&0x01000007u32.to_be_bytes());
        fat.extend(&0u32.to_be_bytes());
        let second_off = 0x1000 + ((thin.len() + 0xfff) & !0xfff);
        fat.extend(&(second_off as u32).to_be_bytes());
        fat.extend(&(other.len() as u32).to_be_bytes());
        fat.extend(&12u32.to_be_bytes());
        fat.resize(0x1000, 0);
        fat.extend(&thin);
        fat.resize(second_off, 0);
        fat.extend(&other);

        let mut image = MachImage::parse(&fat).unwrap();
        image.add_section("NODE_SEA", "__NODE_SEA_BLOB", b"xyz", 2).unwrap();
        let written = image.write();
        assert_eq!(&written[0..4], &FAT_MAGIC);

        let reparsed = MachImage::parse(&written).unwrap();
        assert_eq!(
            reparsed.section_bytes(Some("NODE_SEA"), "__NODE_SEA_BLOB"),
            Some(&b"xyz"[..])
        );
        let fat_ctx = reparsed.fat.as_ref().unwrap();
        assert_eq!(fat_ctx.others[0], other);
    }

    #[test]
    fn test_headroom_exhaustion() {
        let mut image = MachImage::parse(&build_fixture(false)).unwrap();
        // The fixture leaves ~3.6KB of padding; each new segment costs 152
        // bytes of load commands, so this must fail well before 100 rounds.
        let mut failed = false;
        for i in 0..100 {
            let seg = format!("SEG_{i:03}");
            let sect = format!("__sect_{i:03}");
            if image.add_section(&seg, &sect, b"x", 2).is_err() {
                failed = true;
                break;
            }
        }
        assert!(failed, "headroom check never fired");
    }
}
