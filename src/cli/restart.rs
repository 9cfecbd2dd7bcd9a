//! Restart command implementation.

use clap::Args;
use vpsman::LifecycleManager;

/// Stop, pause, and start an instance again.
#[derive(Args, Debug)]
pub struct RestartCmd {
    /// Instance id.
    pub id: String,
}

impl RestartCmd {
    /// Execute the restart command.
    pub async fn run(self, manager: &LifecycleManager) -> vpsman::Result<()> {
        println!("Restarting {}...", self.id);
        let outcome = manager.restart(&self.id).await?;
        println!(
            "Instance {} running (PID: {})",
            outcome.id,
            outcome.pid.map(|p| p.to_string()).unwrap_or_else(|| "-".into())
        );
        Ok(())
    }
}
