//! List command implementation.

use clap::Args;
use vpsman::db::ALL_OWNERS;
use vpsman::LifecycleManager;

use super::truncate;

/// List instances.
#[derive(Args, Debug)]
pub struct ListCmd {
    /// Only instances of this owner.
    #[arg(long, default_value = ALL_OWNERS)]
    pub owner: String,

    /// Show detailed output.
    #[arg(short, long)]
    pub verbose: bool,

    /// Output as JSON.
    #[arg(long)]
    pub json: bool,
}

impl ListCmd {
    /// Execute the list command.
    pub fn run(&self, manager: &LifecycleManager) -> vpsman::Result<()> {
        let instances = manager.list_by_owner(&self.owner)?;

        if self.json {
            return super::print_json(&instances);
        }
        if instances.is_empty() {
            println!("No instances found");
            return Ok(());
        }

        println!(
            "{:<22} {:<12} {:<24} {:<10} {:<6} {:<6} {:<10} {:<8}",
            "ID", "OWNER", "HOSTNAME", "STATUS", "PORT", "CPUS", "MEMORY", "PID"
        );
        println!("{}", "-".repeat(104));

        for instance in &instances {
            // Recorded status can lag a guest that shut itself down.
            let status = instance.actual_status();
            let pid_display = instance
                .pid
                .map(|p| p.to_string())
                .unwrap_or_else(|| "-".to_string());

            println!(
                "{:<22} {:<12} {:<24} {:<10} {:<6} {:<6} {:<10} {:<8}",
                instance.id,
                truncate(&instance.owner_id, 12),
                truncate(&instance.hostname, 24),
                status,
                instance.ssh_port,
                instance.cpu_count,
                format!("{} MiB", instance.memory_mb),
                pid_display,
            );

            if self.verbose {
                println!("  OS:      {}", instance.os_type);
                println!("  Disk:    {} ({})", instance.disk_path.display(), instance.disk_size);
                println!("  Created: {}", instance.created_at);
                if !instance.port_forwards.is_empty() {
                    println!("  Forward: {}", instance.port_forwards.join(", "));
                }
                println!();
            }
        }

        Ok(())
    }
}
