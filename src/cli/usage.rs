//! Usage command implementation.

use clap::Args;
use vpsman::LifecycleManager;

use super::format_bytes;

/// Show totals, usage counters, and host resources.
#[derive(Args, Debug)]
pub struct UsageCmd {
    /// Output as JSON.
    #[arg(long)]
    pub json: bool,
}

impl UsageCmd {
    /// Execute the usage command.
    pub async fn run(&self, manager: &LifecycleManager) -> vpsman::Result<()> {
        let report = manager.usage_report().await?;
        if self.json {
            return super::print_json(&report);
        }

        println!(
            "Instances:        {} ({} running, {} stopped)",
            report.total_instances, report.running, report.stopped
        );
        println!("Owners:           {}", report.distinct_owners);
        println!("Allocated memory: {} MiB", report.allocated_memory_mb);
        println!("Allocated vCPUs:  {}", report.allocated_cpus);
        println!("Created (total):  {}", report.counters.instances_created);
        println!("Restarts:         {}", report.counters.restarts);
        println!("Image downloads:  {}", report.counters.image_downloads);

        let host = &report.host;
        println!();
        println!("Host CPU:         {:.1}%", host.cpu_percent);
        println!(
            "Host memory:      {:.1}% used, {} of {} available",
            host.memory_percent,
            format_bytes(host.memory_available_bytes),
            format_bytes(host.memory_total_bytes)
        );
        match (host.disk_percent, host.disk_available_bytes, host.disk_total_bytes) {
            (Some(percent), Some(available), Some(total)) => println!(
                "Host disk:        {:.1}% used, {} of {} free",
                percent,
                format_bytes(available),
                format_bytes(total)
            ),
            _ => println!("Host disk:        unknown"),
        }
        Ok(())
    }
}
