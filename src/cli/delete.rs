//! Delete command implementation.

use clap::Args;
use std::io::{self, Write};
use vpsman::LifecycleManager;

/// Delete an instance and its files.
#[derive(Args, Debug)]
pub struct DeleteCmd {
    /// Instance id.
    pub id: String,

    /// Skip confirmation prompt.
    #[arg(short, long)]
    pub force: bool,
}

impl DeleteCmd {
    /// Execute the delete command.
    pub async fn run(self, manager: &LifecycleManager) -> vpsman::Result<()> {
        let instance = manager.get(&self.id)?;

        if !self.force {
            print!(
                "Delete instance {} ({}, owner {})? Its disk is removed too. [y/N] ",
                instance.id, instance.hostname, instance.owner_id
            );
            io::stdout().flush()?;

            let mut input = String::new();
            io::stdin().read_line(&mut input)?;
            if !input.trim().eq_ignore_ascii_case("y") {
                println!("Cancelled");
                return Ok(());
            }
        }

        manager.delete(&self.id).await?;
        println!("Deleted instance {}", self.id);
        Ok(())
    }
}
