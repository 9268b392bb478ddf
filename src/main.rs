//! binject CLI entry point.

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod cli;

/// binject - payload injector for single-executable runtime binaries
#[derive(Parser, Debug)]
#[command(name = "binject")]
#[command(about = "Payload injector for single-executable runtime binaries")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Inject SEA and VFS payloads into an executable.
    Inject(cli::inject::InjectCmd),

    /// List payload sections in an executable.
    #[command(alias = "ls")]
    List(cli::list::ListCmd),

    /// Extract a payload section to a file.
    Extract(cli::extract::ExtractCmd),

    /// Verify that a payload section is present and non-empty.
    Verify(cli::verify::VerifyCmd),

    /// Operate on SMOL self-extracting stubs.
    #[command(subcommand)]
    Smol(cli::smol::SmolCmd),
}

fn main() {
    let cli = Cli::parse();

    init_logging();

    tracing::debug!(version = binject::VERSION, "starting binject");

    let result = match cli.command {
        Commands::Inject(cmd) => cmd.run(),
        Commands::List(cmd) => cmd.run(),
        Commands::Extract(cmd) => cmd.run(),
        Commands::Verify(cmd) => cmd.run(),
        Commands::Smol(cmd) => cmd.run(),
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "command failed");
        eprintln!("Error: {}", e);
        std::process::exit(cli::exit_code(&e));
    }
}

/// Initialize the tracing subscriber.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("binject=warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
