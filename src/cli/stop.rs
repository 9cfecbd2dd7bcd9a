//! Stop command implementation.

use clap::Args;
use vpsman::LifecycleManager;

/// Stop a running instance.
#[derive(Args, Debug)]
pub struct StopCmd {
    /// Instance id.
    pub id: String,
}

impl StopCmd {
    /// Execute the stop command.
    pub async fn run(self, manager: &LifecycleManager) -> vpsman::Result<()> {
        let grace = manager.config().timeouts.stop_grace;
        println!(
            "Stopping {} (SIGKILL after {})...",
            self.id,
            humantime::format_duration(grace)
        );
        manager.stop(&self.id).await?;
        println!("Instance {} stopped", self.id);
        Ok(())
    }
}
