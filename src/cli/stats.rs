//! Stats command implementation.

use clap::Args;
use vpsman::LifecycleManager;

use super::format_bytes;

/// Show resource usage of an instance.
#[derive(Args, Debug)]
pub struct StatsCmd {
    /// Instance id.
    pub id: String,

    /// Output as JSON.
    #[arg(long)]
    pub json: bool,
}

impl StatsCmd {
    /// Execute the stats command.
    pub async fn run(self, manager: &LifecycleManager) -> vpsman::Result<()> {
        let stats = manager.instance_stats(&self.id).await?;
        if self.json {
            return super::print_json(&stats);
        }

        println!("Instance:   {}", stats.id);
        println!(
            "Status:     {}{}",
            stats.status,
            if stats.process_alive { "" } else { " (no live process)" }
        );
        match (stats.cpu_percent, stats.memory_bytes) {
            (Some(cpu), Some(memory)) => {
                println!("CPU:        {:.1}%", cpu);
                println!(
                    "Memory:     {} of {} MiB ({:.1}%)",
                    format_bytes(memory),
                    stats.allocated_memory_mb,
                    stats.memory_percent.unwrap_or(0.0)
                );
            }
            _ => println!("Memory:     {} MiB allocated", stats.allocated_memory_mb),
        }
        println!("vCPUs:      {}", stats.allocated_cpus);
        match stats.disk_usage_bytes {
            Some(used) => println!("Disk:       {} used ({} requested)", format_bytes(used), stats.disk_size),
            None => println!("Disk:       missing ({} requested)", stats.disk_size),
        }
        Ok(())
    }
}
