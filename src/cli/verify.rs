//! Verify command implementation.

use std::path::PathBuf;

use clap::Args;

use binject::Result;

use super::extract::payload_section_name;

/// Verify that a payload section is present and non-empty.
#[derive(Args, Debug)]
pub struct VerifyCmd {
    /// Executable to inspect.
    #[arg(short = 'e', long)]
    pub executable: PathBuf,

    /// Verify the SEA blob.
    #[arg(long, conflicts_with = "vfs", required_unless_present = "vfs")]
    pub sea: bool,

    /// Verify the VFS archive.
    #[arg(long)]
    pub vfs: bool,
}

impl VerifyCmd {
    /// Execute the verify command.
    pub fn run(&self) -> Result<()> {
        let section = payload_section_name(&self.executable, self.vfs)?;
        let report = binject::verify(&self.executable, section)?;

        match &report.segment {
            Some(segment) => println!("{},{}", segment, report.section),
            None => println!("{}", report.section),
        }
        println!("  size:   {} bytes", report.size);
        println!("  offset: 0x{:x}", report.offset);
        Ok(())
    }
}
