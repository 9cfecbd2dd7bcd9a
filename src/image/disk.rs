//! Per-instance disk provisioning: copy the cache image, then grow it.

use super::DiskSize;
use crate::error::{Error, Result};
use crate::process::run_tool;
use std::ffi::OsStr;
use std::path::Path;
use std::time::Duration;

/// Disk-image inspect/resize tool (`qemu-img` compatible).
#[derive(Debug, Clone)]
pub struct DiskTool {
    program: String,
    timeout: Duration,
}

impl DiskTool {
    /// Wrap a program name with a per-invocation timeout.
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    /// Virtual size of an image in bytes (`info --output=json`).
    pub async fn virtual_size(&self, image: &Path) -> Result<u64> {
        let output = run_tool(
            &self.program,
            [OsStr::new("info"), OsStr::new("--output=json"), image.as_os_str()],
            self.timeout,
        )
        .await?;

        let info: serde_json::Value = serde_json::from_str(&output.stdout).map_err(|e| {
            Error::command_failed(
                format!("{} info", self.program),
                0,
                format!("unparseable output: {e}"),
            )
        })?;
        info.get("virtual-size")
            .and_then(serde_json::Value::as_u64)
            .ok_or_else(|| {
                Error::command_failed(
                    format!("{} info", self.program),
                    0,
                    "output has no virtual-size",
                )
            })
    }

    /// Resize an image to exactly `bytes`.
    pub async fn resize(&self, image: &Path, bytes: u64) -> Result<()> {
        let size = bytes.to_string();
        run_tool(
            &self.program,
            [OsStr::new("resize"), image.as_os_str(), OsStr::new(&size)],
            self.timeout,
        )
        .await?;
        Ok(())
    }
}

/// Copy `cache` to `dest` and grow it to `size` when that is larger.
///
/// Shrinking is never attempted. Returns the resulting virtual size.
pub async fn provision_disk(
    tool: &DiskTool,
    cache: &Path,
    dest: &Path,
    size: DiskSize,
) -> Result<u64> {
    if !tokio::fs::try_exists(cache).await? {
        return Err(Error::artifact_missing("cache image", cache));
    }
    tokio::fs::copy(cache, dest).await?;
    tracing::debug!(from = %cache.display(), to = %dest.display(), "copied base image");

    let current = tool.virtual_size(dest).await?;
    match size {
        DiskSize::Bytes(target) if target > current => {
            tracing::info!(
                path = %dest.display(),
                from = current,
                to = target,
                "growing disk"
            );
            tool.resize(dest, target).await?;
            Ok(target)
        }
        DiskSize::Bytes(target) => {
            tracing::info!(
                path = %dest.display(),
                current,
                requested = target,
                "requested size not larger than image, skipping resize"
            );
            Ok(current)
        }
        DiskSize::Keep => Ok(current),
    }
}
