//! Info command implementation.

use clap::Args;
use vpsman::LifecycleManager;

/// Show one instance.
#[derive(Args, Debug)]
pub struct InfoCmd {
    /// Instance id.
    pub id: String,

    /// Output as JSON.
    #[arg(long)]
    pub json: bool,
}

impl InfoCmd {
    /// Execute the info command.
    pub fn run(&self, manager: &LifecycleManager) -> vpsman::Result<()> {
        let instance = manager.get(&self.id)?;
        if self.json {
            return super::print_json(&instance);
        }

        let os_name = manager
            .config()
            .catalog
            .get(&instance.os_type)
            .map(|image| image.name.clone())
            .unwrap_or_else(|_| instance.os_type.clone());

        println!("Instance:  {}", instance.id);
        println!("Owner:     {}", instance.owner_id);
        println!("Status:    {}", instance.actual_status());
        if let Some(pid) = instance.pid {
            println!("PID:       {}", pid);
        }
        println!("OS:        {}", os_name);
        println!("Hostname:  {}", instance.hostname);
        println!("Username:  {}", instance.username);
        println!("Password:  {}", instance.secret);
        println!("Resources: {} MiB, {} vCPU, {} disk", instance.memory_mb, instance.cpu_count, instance.disk_size);
        println!("Disk:      {}", instance.disk_path.display());
        println!("Seed:      {}", instance.seed_path.display());
        println!("Display:   {}", if instance.gui_mode { "gui" } else { "serial log" });
        for forward in &instance.port_forwards {
            println!("Forward:   {}", forward);
        }
        println!("Created:   {}", instance.created_at);
        println!("Connect:   {}", instance.ssh_command(&manager.config().public_host));
        Ok(())
    }
}
