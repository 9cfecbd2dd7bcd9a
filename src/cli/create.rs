//! Create command implementation.

use clap::Args;
use vpsman::LifecycleManager;
use vpsman_protocol::CreateInstanceRequest;

/// Provision a new instance.
#[derive(Args, Debug)]
pub struct CreateCmd {
    /// Owner the instance is created for.
    #[arg(long)]
    pub owner: String,

    /// Memory in MiB.
    #[arg(long, default_value = "1024")]
    pub memory: u32,

    /// Number of vCPUs.
    #[arg(long, default_value = "1")]
    pub cpus: u8,

    /// Disk size (e.g. 20G, 512M).
    #[arg(long, default_value = "20G")]
    pub disk: String,

    /// OS image from the catalog (default: the configured default OS).
    #[arg(long)]
    pub os: Option<String>,

    /// Graphical display instead of a serial console log.
    #[arg(long)]
    pub gui: bool,

    /// Extra TCP forward (HOST:GUEST), repeatable.
    #[arg(short = 'p', long = "forward", value_name = "HOST:GUEST")]
    pub forwards: Vec<String>,

    /// Guest hostname (default: generated from the owner).
    #[arg(long)]
    pub hostname: Option<String>,

    /// Ignore the per-owner instance limit.
    #[arg(long)]
    pub privileged: bool,

    /// Start the instance once created.
    #[arg(long)]
    pub start: bool,

    /// Output as JSON.
    #[arg(long)]
    pub json: bool,
}

impl CreateCmd {
    /// Execute the create command.
    pub async fn run(self, manager: &LifecycleManager) -> vpsman::Result<()> {
        manager.check_capacity(&self.owner, self.privileged)?;

        let request = CreateInstanceRequest {
            owner_id: self.owner,
            memory_mb: self.memory,
            cpu_count: self.cpus,
            disk_size: self.disk,
            os_type: self.os,
            gui_mode: self.gui,
            port_forwards: self.forwards,
            hostname: self.hostname,
        };

        if !self.json {
            println!("Creating instance (first use of an image downloads it)...");
        }
        let summary = manager.create(&request).await?;

        if self.start {
            manager.start(&summary.id).await?;
        }

        if self.json {
            return super::print_json(&summary);
        }

        println!("Created instance {}", summary.id);
        println!("  OS:        {}", summary.os_name);
        println!("  Hostname:  {}", summary.hostname);
        println!("  Username:  {}", summary.username);
        println!("  Password:  {}", summary.secret);
        println!("  SSH port:  {}", summary.ssh_port);
        println!("  Connect:   {}", summary.ssh_command);
        if !self.start {
            println!("Start it with: vpsman start {}", summary.id);
        }
        Ok(())
    }
}
