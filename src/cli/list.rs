//! List command implementation.

use std::path::PathBuf;

use clap::Args;

use binject::Result;

/// List payload sections in an executable.
#[derive(Args, Debug)]
pub struct ListCmd {
    /// Executable to inspect.
    pub executable: PathBuf,

    /// Output as JSON.
    #[arg(long)]
    pub json: bool,
}

impl ListCmd {
    /// Execute the list command.
    pub fn run(&self) -> Result<()> {
        let sections = binject::list(&self.executable)?;

        if sections.is_empty() {
            if self.json {
                println!("[]");
            } else {
                println!("No payload sections found");
            }
            return Ok(());
        }

        if self.json {
            let entries: Vec<_> = sections
                .iter()
                .map(|info| {
                    serde_json::json!({
                        "segment": info.segment,
                        "section": info.name,
                        "size": info.size,
                    })
                })
                .collect();
            println!(
                "{}",
                serde_json::to_string_pretty(&entries).expect("section list serializes")
            );
        } else {
            println!("{:<12} {:<20} {:>12}", "SEGMENT", "SECTION", "SIZE");
            println!("{}", "-".repeat(46));
            for info in sections {
                println!(
                    "{:<12} {:<20} {:>12}",
                    info.segment.as_deref().unwrap_or("-"),
                    info.name,
                    info.size,
                );
            }
        }

        Ok(())
    }
}
