//! Host dependency check command.

use clap::Args;
use vpsman::config::ManagerConfig;
use vpsman::host;
use vpsman_protocol::CheckStatus;

/// Check host dependencies.
#[derive(Args, Debug)]
pub struct CheckCmd {
    /// Output as JSON.
    #[arg(long)]
    pub json: bool,
}

impl CheckCmd {
    /// Execute the check command. Fails when a required dependency is missing.
    pub async fn run(&self, config: &ManagerConfig) -> vpsman::Result<()> {
        let checks = host::dependency_check(config).await;

        if self.json {
            super::print_json(&checks)?;
        } else {
            for check in &checks {
                let marker = match check.status {
                    CheckStatus::Ok => "ok",
                    CheckStatus::Warning => "warn",
                    CheckStatus::Missing => "MISSING",
                };
                println!("{:<8} {:<12} {}", marker, check.name, check.detail);
            }
        }

        let missing: Vec<&str> = checks
            .iter()
            .filter(|c| c.status == CheckStatus::Missing)
            .map(|c| c.name.as_str())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(vpsman::Error::Config(format!(
                "missing dependencies: {}",
                missing.join(", ")
            )))
        }
    }
}
