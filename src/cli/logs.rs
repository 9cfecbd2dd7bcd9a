//! Logs command implementation.

use clap::Args;
use vpsman::logs::MAX_TAIL_LINES;
use vpsman::LifecycleManager;

/// Print the tail of an instance's console log.
#[derive(Args, Debug)]
pub struct LogsCmd {
    /// Instance id.
    pub id: String,

    /// Number of trailing lines.
    #[arg(short = 'n', long, default_value = "50")]
    pub lines: usize,
}

impl LogsCmd {
    /// Execute the logs command.
    pub async fn run(self, manager: &LifecycleManager) -> vpsman::Result<()> {
        if self.lines > MAX_TAIL_LINES {
            tracing::warn!(requested = self.lines, max = MAX_TAIL_LINES, "line count capped");
        }
        let tail = manager.tail_log(&self.id, self.lines).await?;
        if !tail.text.is_empty() {
            println!("{}", tail.text);
        }
        Ok(())
    }
}
