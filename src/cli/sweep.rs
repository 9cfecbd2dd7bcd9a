//! Sweep command implementation.

use clap::Args;
use vpsman::LifecycleManager;

use super::format_bytes;

/// Remove files left behind by deleted or failed instances.
#[derive(Args, Debug)]
pub struct SweepCmd {
    /// Output as JSON.
    #[arg(long)]
    pub json: bool,
}

impl SweepCmd {
    /// Execute the sweep command.
    pub async fn run(&self, manager: &LifecycleManager) -> vpsman::Result<()> {
        let report = manager.sweep_orphans().await?;
        if self.json {
            return super::print_json(&report);
        }

        if report.removed.is_empty() {
            println!("No orphaned files found");
        } else {
            for file in &report.removed {
                println!("Removed {} ({})", file.name, format_bytes(file.bytes));
            }
            println!(
                "Freed {} across {} file(s)",
                format_bytes(report.bytes_freed),
                report.removed.len()
            );
        }
        if !report.preserved_cache.is_empty() {
            println!("Kept cache images: {}", report.preserved_cache.join(", "));
        }
        Ok(())
    }
}
