//! Start command implementation.

use clap::Args;
use vpsman::LifecycleManager;

/// Start a stopped instance.
#[derive(Args, Debug)]
pub struct StartCmd {
    /// Instance id.
    pub id: String,
}

impl StartCmd {
    /// Execute the start command.
    pub async fn run(self, manager: &LifecycleManager) -> vpsman::Result<()> {
        let instance = manager.get(&self.id)?;
        println!("Starting {} ({} MiB, {} vCPU)...", instance.id, instance.memory_mb, instance.cpu_count);

        let outcome = manager.start(&self.id).await?;
        println!(
            "Instance {} running (PID: {})",
            outcome.id,
            outcome.pid.map(|p| p.to_string()).unwrap_or_else(|| "-".into())
        );
        println!("Connect: {}", instance.ssh_command(&manager.config().public_host));
        Ok(())
    }
}
