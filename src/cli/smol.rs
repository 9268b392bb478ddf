//! SMOL stub subcommands.

use std::fs;
use std::path::PathBuf;

use clap::{Args, Subcommand};

use binject::{Error, Result};

/// Operate on SMOL self-extracting stubs.
#[derive(Subcommand, Debug)]
pub enum SmolCmd {
    /// Extract and decompress the stub's inner binary.
    Extract(SmolExtractCmd),

    /// Replace the stub's inner binary and rebuild the compressed frame.
    Repack(SmolRepackCmd),

    /// Print the host runtime version recorded in the stub.
    NodeVersion(SmolNodeVersionCmd),
}

impl SmolCmd {
    /// Dispatch the selected subcommand.
    pub fn run(self) -> Result<()> {
        match self {
            SmolCmd::Extract(cmd) => cmd.run(),
            SmolCmd::Repack(cmd) => cmd.run(),
            SmolCmd::NodeVersion(cmd) => cmd.run(),
        }
    }
}

/// Extract the stub's inner binary.
#[derive(Args, Debug)]
pub struct SmolExtractCmd {
    /// SMOL stub executable.
    #[arg(short = 'e', long)]
    pub executable: PathBuf,

    /// Output path for the inner binary.
    #[arg(short = 'o', long)]
    pub output: PathBuf,
}

impl SmolExtractCmd {
    /// Execute the extract subcommand.
    pub fn run(&self) -> Result<()> {
        binject::smol_extract_binary(&self.executable, &self.output)?;
        println!("Extracted inner binary to {}", self.output.display());
        Ok(())
    }
}

/// Repack a stub around a new inner binary.
#[derive(Args, Debug)]
pub struct SmolRepackCmd {
    /// SMOL stub executable.
    #[arg(short = 'e', long)]
    pub executable: PathBuf,

    /// New inner binary to compress into the stub.
    #[arg(long)]
    pub payload: PathBuf,

    /// Output path for the repacked stub.
    #[arg(short = 'o', long)]
    pub output: PathBuf,
}

impl SmolRepackCmd {
    /// Execute the repack subcommand.
    pub fn run(&self) -> Result<()> {
        let new_inner = fs::read(&self.payload).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                Error::invalid_args(format!("payload {} not found", self.payload.display()))
            }
            _ => Error::Io(e),
        })?;

        let old_section = binject::read_pressed_section(&self.executable)?;
        let new_section = binject::rebuild_stub_section(&old_section, &new_inner)?;
        binject::smol_repack(&self.executable, &new_section, &self.output)?;
        println!("Repacked stub at {}", self.output.display());
        Ok(())
    }
}

/// Print the recorded host runtime version.
#[derive(Args, Debug)]
pub struct SmolNodeVersionCmd {
    /// Executable to inspect.
    #[arg(short = 'e', long)]
    pub executable: PathBuf,
}

impl SmolNodeVersionCmd {
    /// Execute the node-version subcommand.
    pub fn run(&self) -> Result<()> {
        match binject::smol_extract_node_version(&self.executable)? {
            Some(version) => println!("{version}"),
            None => println!("no SMOL config section"),
        }
        Ok(())
    }
}
