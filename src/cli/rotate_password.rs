//! Credential rotation command implementation.

use clap::Args;
use vpsman::LifecycleManager;

/// Issue a new login password.
#[derive(Args, Debug)]
pub struct RotatePasswordCmd {
    /// Instance id.
    pub id: String,
}

impl RotatePasswordCmd {
    /// Execute the rotate-password command.
    pub async fn run(self, manager: &LifecycleManager) -> vpsman::Result<()> {
        let rotation = manager.rotate_credential(&self.id).await?;
        println!("New password for {}: {}", rotation.id, rotation.secret);
        println!("The guest picks it up on its next boot (vpsman restart {}).", rotation.id);
        Ok(())
    }
}
