//! Orphaned artifact cleanup.
//!
//! Only files following the instance-artifact naming convention (`vps_*`)
//! are candidates. A candidate survives when its name is one of the four
//! artifact names of a referenced instance id. Cache images (`cache_*`) are
//! always kept, and anything else in the directory is never touched.
//!
//! References are checked per file at removal time rather than snapshotted
//! up front, so a creation that reserves its id while the sweep is running
//! keeps its fresh files.

use crate::error::Result;
use crate::instance::{ArtifactPaths, CACHE_PREFIX, INSTANCE_PREFIX};
use std::path::Path;
use vpsman_protocol::{RemovedFile, SweepReport};

/// Instance id an artifact file name belongs to (`vps_x.img` -> `vps_x`).
pub fn artifact_owner(name: &str) -> Option<&str> {
    if !name.starts_with(INSTANCE_PREFIX) {
        return None;
    }
    let end = name.find(['.', '-']).unwrap_or(name.len());
    Some(&name[..end])
}

/// Remove unreferenced instance artifacts from `vm_dir`.
///
/// `is_referenced` must answer true for every registered instance id and
/// every id reserved by a creation still in flight.
pub async fn sweep(vm_dir: &Path, is_referenced: impl Fn(&str) -> bool) -> Result<SweepReport> {
    let mut report = SweepReport::default();
    let mut entries = match tokio::fs::read_dir(vm_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(report),
        Err(e) => return Err(e.into()),
    };

    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        let file_type = entry.file_type().await?;
        if !file_type.is_file() {
            continue;
        }

        if name.starts_with(CACHE_PREFIX) {
            report.preserved_cache.push(name);
            continue;
        }
        let Some(owner) = artifact_owner(&name) else {
            continue;
        };
        if is_referenced(owner) && ArtifactPaths::file_names(owner).contains(&name) {
            continue;
        }

        let bytes = entry.metadata().await.map(|m| m.len()).unwrap_or(0);
        match tokio::fs::remove_file(entry.path()).await {
            Ok(()) => {
                tracing::info!(file = %name, bytes, "removed orphaned artifact");
                report.bytes_freed += bytes;
                report.removed.push(RemovedFile { name, bytes });
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(file = %name, error = %e, "failed to remove orphaned artifact");
            }
        }
    }

    report.removed.sort_by(|a, b| a.name.cmp(&b.name));
    report.preserved_cache.sort();
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(dir: &Path, name: &str, len: usize) {
        std::fs::write(dir.join(name), vec![0u8; len]).unwrap();
    }

    #[tokio::test]
    async fn test_sweep_removes_only_orphans() {
        let dir = tempfile::tempdir().unwrap();
        let live = "vps_1111111111111111";
        let dead = "vps_2222222222222222";

        for name in ArtifactPaths::file_names(live) {
            touch(dir.path(), &name, 10);
        }
        touch(dir.path(), &format!("{dead}.img"), 100);
        touch(dir.path(), &format!("{dead}-seed.iso"), 20);
        touch(dir.path(), &format!("{live}.img.bak"), 0);
        touch(dir.path(), "cache_ubuntu22.img", 1000);
        touch(dir.path(), "vpsman.redb", 5);
        touch(dir.path(), "notes.txt", 5);
        std::fs::create_dir(dir.path().join("vps_dir")).unwrap();

        let report = sweep(dir.path(), |id| id == live).await.unwrap();

        let removed: Vec<_> = report.removed.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(
            removed,
            vec![
                "vps_1111111111111111.img.bak",
                "vps_2222222222222222-seed.iso",
                "vps_2222222222222222.img"
            ]
        );
        assert_eq!(report.bytes_freed, 120);
        assert_eq!(report.preserved_cache, vec!["cache_ubuntu22.img"]);

        for name in ArtifactPaths::file_names(live) {
            assert!(dir.path().join(name).exists());
        }
        for name in ["cache_ubuntu22.img", "vpsman.redb", "notes.txt", "vps_dir"] {
            assert!(dir.path().join(name).exists(), "{name} should be kept");
        }
    }

    #[test]
    fn test_artifact_owner() {
        let cases = [
            ("vps_0011223344556677.img", Some("vps_0011223344556677")),
            ("vps_0011223344556677-seed.iso", Some("vps_0011223344556677")),
            ("vps_0011223344556677.pid", Some("vps_0011223344556677")),
            ("vps_bare", Some("vps_bare")),
            ("cache_ubuntu22.img", None),
            ("vpsman.redb", None),
        ];
        for (name, expected) in cases {
            assert_eq!(artifact_owner(name), expected, "{name}");
        }
    }

    #[tokio::test]
    async fn test_sweep_empty_or_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let report = sweep(dir.path(), |_| false).await.unwrap();
        assert!(report.removed.is_empty());
        assert_eq!(report.bytes_freed, 0);

        let report = sweep(&dir.path().join("absent"), |_| false)
            .await
            .unwrap();
        assert_eq!(report, SweepReport::default());
    }
}
