//! First-boot configuration (cloud-init NoCloud seed volume).
//!
//! A seed is two documents, `user-data` and `meta-data`, packaged into one
//! volume by an external tool (`cloud-localds` compatible: `TOOL OUT USER META`).
//! The documents live in a scratch directory that is removed whatever the
//! packaging outcome, and the finished volume is renamed over the destination
//! so a rebuild never leaves a half-written seed behind.

use crate::error::{Error, Result};
use crate::process::run_tool;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Packages installed on first boot.
pub const FIRST_BOOT_PACKAGES: &[&str] = &["vim", "curl", "wget", "htop", "net-tools"];

/// Values rendered into a seed.
#[derive(Debug, Clone, Copy)]
pub struct SeedSpec<'a> {
    /// Instance id.
    pub instance_id: &'a str,
    /// Guest hostname.
    pub hostname: &'a str,
    /// Login user.
    pub username: &'a str,
    /// Password for the login user and root.
    pub secret: &'a str,
    /// Credential generation; non-zero changes the metadata instance id.
    pub generation: u32,
}

impl SeedSpec<'_> {
    /// Metadata instance id. A new value makes cloud-init re-run on next boot.
    pub fn metadata_instance_id(&self) -> String {
        if self.generation == 0 {
            format!("iid-{}", self.instance_id)
        } else {
            format!("iid-{}-r{}", self.instance_id, self.generation)
        }
    }
}

/// Render the `#cloud-config` user-data document.
pub fn render_user_data(spec: &SeedSpec<'_>) -> String {
    let SeedSpec {
        hostname,
        username,
        secret,
        ..
    } = *spec;

    let mut doc = format!(
        "#cloud-config
hostname: {hostname}
ssh_pwauth: true
disable_root: false
users:
  - name: {username}
    sudo: ALL=(ALL) NOPASSWD:ALL
    shell: /bin/bash
    lock_passwd: false
chpasswd:
  list: |
    root:{secret}
    {username}:{secret}
  expire: false
packages:
"
    );
    for package in FIRST_BOOT_PACKAGES {
        doc.push_str("  - ");
        doc.push_str(package);
        doc.push('\n');
    }
    doc.push_str("runcmd:\n");
    doc.push_str(&format!("  - echo 'Welcome to {hostname}' > /etc/motd\n"));
    doc
}

/// Render the meta-data document.
pub fn render_meta_data(spec: &SeedSpec<'_>) -> String {
    format!(
        "instance-id: {}\nlocal-hostname: {}\n",
        spec.metadata_instance_id(),
        spec.hostname
    )
}

/// Builds seed volumes with an external packaging tool.
#[derive(Debug, Clone)]
pub struct SeedBuilder {
    program: String,
    timeout: Duration,
    scratch_root: PathBuf,
}

impl SeedBuilder {
    /// `scratch_root` must be on the same filesystem as the seeds it builds.
    pub fn new(program: impl Into<String>, timeout: Duration, scratch_root: &Path) -> Self {
        Self {
            program: program.into(),
            timeout,
            scratch_root: scratch_root.to_path_buf(),
        }
    }

    /// Build a seed volume at `dest`, replacing any existing one atomically.
    pub async fn build(&self, spec: &SeedSpec<'_>, dest: &Path) -> Result<()> {
        let scratch = tempfile::Builder::new()
            .prefix(".seed-")
            .tempdir_in(&self.scratch_root)?;

        let user_data = scratch.path().join("user-data");
        let meta_data = scratch.path().join("meta-data");
        let volume = scratch.path().join("seed.iso");
        tokio::fs::write(&user_data, render_user_data(spec)).await?;
        tokio::fs::write(&meta_data, render_meta_data(spec)).await?;

        run_tool(
            &self.program,
            [volume.as_os_str(), user_data.as_os_str(), meta_data.as_os_str()],
            self.timeout,
        )
        .await?;

        if !tokio::fs::try_exists(&volume).await? {
            return Err(Error::artifact_missing("seed", volume));
        }
        tokio::fs::rename(&volume, dest).await?;

        tracing::debug!(
            instance = %spec.instance_id,
            path = %dest.display(),
            generation = spec.generation,
            "seed volume built"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn spec(generation: u32) -> SeedSpec<'static> {
        SeedSpec {
            instance_id: "vps_00112233aabbccdd",
            hostname: "vps-alice-a1b2c3",
            username: "ubuntu",
            secret: "pA55#w&rd*",
            generation,
        }
    }

    fn script(dir: &Path, name: &str, body: &str) -> String {
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    fn scratch_dirs(dir: &Path) -> usize {
        std::fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".seed-"))
            .count()
    }

    #[test]
    fn test_user_data_contents() {
        let doc = render_user_data(&spec(0));
        assert!(doc.starts_with("#cloud-config\n"));
        for needle in [
            "hostname: vps-alice-a1b2c3",
            "ssh_pwauth: true",
            "disable_root: false",
            "  - name: ubuntu",
            "sudo: ALL=(ALL) NOPASSWD:ALL",
            "lock_passwd: false",
            "    root:pA55#w&rd*",
            "    ubuntu:pA55#w&rd*",
            "expire: false",
            "  - net-tools",
        ] {
            assert!(doc.contains(needle), "missing {needle:?} in:\n{doc}");
        }
    }

    #[test]
    fn test_meta_data_instance_id_tracks_generation() {
        assert_eq!(
            render_meta_data(&spec(0)),
            "instance-id: iid-vps_00112233aabbccdd\nlocal-hostname: vps-alice-a1b2c3\n"
        );
        assert!(render_meta_data(&spec(2)).starts_with("instance-id: iid-vps_00112233aabbccdd-r2\n"));
    }

    #[tokio::test]
    async fn test_build_packages_and_cleans_scratch() {
        let dir = tempfile::tempdir().unwrap();
        let tool = script(dir.path(), "fake-localds", "#!/bin/sh\ncat \"$2\" \"$3\" > \"$1\"\n");
        let builder = SeedBuilder::new(tool, Duration::from_secs(10), dir.path());
        let dest = dir.path().join("vps_00112233aabbccdd-seed.iso");

        builder.build(&spec(0), &dest).await.unwrap();

        let packaged = std::fs::read_to_string(&dest).unwrap();
        assert!(packaged.contains("#cloud-config"));
        assert!(packaged.contains("instance-id: iid-vps_00112233aabbccdd"));
        assert_eq!(scratch_dirs(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_packaging_failure_surfaces_diagnostics() {
        let dir = tempfile::tempdir().unwrap();
        let tool = script(
            dir.path(),
            "broken-localds",
            "#!/bin/sh\necho 'genisoimage: command not found' >&2\nexit 127\n",
        );
        let builder = SeedBuilder::new(tool, Duration::from_secs(10), dir.path());
        let dest = dir.path().join("vps_00112233aabbccdd-seed.iso");

        let err = builder.build(&spec(0), &dest).await.unwrap_err();
        match err {
            Error::CommandFailed { status, stderr, .. } => {
                assert_eq!(status, 127);
                assert!(stderr.contains("genisoimage"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!dest.exists());
        assert_eq!(scratch_dirs(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_rebuild_replaces_existing_seed() {
        let dir = tempfile::tempdir().unwrap();
        let tool = script(dir.path(), "fake-localds", "#!/bin/sh\ncat \"$2\" \"$3\" > \"$1\"\n");
        let builder = SeedBuilder::new(tool, Duration::from_secs(10), dir.path());
        let dest = dir.path().join("vps_00112233aabbccdd-seed.iso");

        builder.build(&spec(0), &dest).await.unwrap();
        builder.build(&spec(1), &dest).await.unwrap();

        let packaged = std::fs::read_to_string(&dest).unwrap();
        assert!(packaged.contains("iid-vps_00112233aabbccdd-r1"));
    }
}
