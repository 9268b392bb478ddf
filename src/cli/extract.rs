//! Extract command implementation.

use std::io::Read as _;
use std::path::{Path, PathBuf};

use clap::Args;

use binject::{Error, Format, Result};
use binject_pack::names;

/// Pick the canonical SEA or VFS section name for the target's format.
pub(crate) fn payload_section_name(executable: &Path, want_vfs: bool) -> Result<&'static str> {
    let mut head = [0u8; 4];
    let mut file = std::fs::File::open(executable).map_err(Error::Io)?;
    let read = file.read(&mut head).map_err(Error::Io)?;
    let format = Format::detect(&head[..read]).ok_or_else(|| {
        Error::invalid_format(format!(
            "{} matches no supported executable format",
            executable.display()
        ))
    })?;
    Ok(if want_vfs {
        names::VFS_BLOB.for_format(format)
    } else {
        names::SEA_BLOB.for_format(format)
    })
}

/// Extract a payload section to a file.
#[derive(Args, Debug)]
pub struct ExtractCmd {
    /// Executable to read.
    #[arg(short = 'e', long)]
    pub executable: PathBuf,

    /// Extract the SEA blob.
    #[arg(long, conflicts_with = "vfs", required_unless_present = "vfs")]
    pub sea: bool,

    /// Extract the VFS archive.
    #[arg(long)]
    pub vfs: bool,

    /// Output path.
    #[arg(short = 'o', long)]
    pub output: PathBuf,
}

impl ExtractCmd {
    /// Execute the extract command.
    pub fn run(&self) -> Result<()> {
        let section = payload_section_name(&self.executable, self.vfs)?;
        binject::extract(&self.executable, section, &self.output)?;
        println!("Extracted {} to {}", section, self.output.display());
        Ok(())
    }
}
