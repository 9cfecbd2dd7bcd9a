//! Manager configuration.
//!
//! Everything the lifecycle manager needs (directories, tool names, port
//! range, limits, timeouts, the OS catalog) lives in one [`ManagerConfig`]
//! built explicitly and handed to [`crate::LifecycleManager::open`].

use crate::catalog::Catalog;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application name for config file storage.
const APP_NAME: &str = "vpsman";

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "VPSMAN_CONFIG";

/// Environment override for the working directory.
pub const VM_DIR_ENV: &str = "VPSMAN_VM_DIR";

/// Environment override for the public SSH host.
pub const PUBLIC_HOST_ENV: &str = "VPSMAN_PUBLIC_HOST";

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Working directory holding cache images and instance artifacts.
    pub vm_dir: PathBuf,

    /// Registry database path (default: `<vm_dir>/vpsman.redb`).
    pub database: Option<PathBuf>,

    /// Host name users SSH to.
    pub public_host: String,

    /// External programs.
    pub tools: ToolConfig,

    /// SSH port range.
    pub ports: PortRange,

    /// Resource limits.
    pub limits: Limits,

    /// Bounded waits.
    pub timeouts: Timeouts,

    /// Bootable OS images.
    pub catalog: Catalog,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            vm_dir: home.join("vms"),
            database: None,
            public_host: "localhost".to_string(),
            tools: ToolConfig::default(),
            ports: PortRange::default(),
            limits: Limits::default(),
            timeouts: Timeouts::default(),
            catalog: Catalog::builtin(),
        }
    }
}

/// External programs invoked by the manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    /// Hypervisor binary.
    pub hypervisor: String,
    /// Disk-image inspect/resize tool.
    pub disk_tool: String,
    /// Config-volume packaging tool.
    pub seed_tool: String,
    /// Pass `-enable-kvm -cpu host` to the hypervisor.
    pub enable_kvm: bool,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            hypervisor: "qemu-system-x86_64".to_string(),
            disk_tool: "qemu-img".to_string(),
            seed_tool: "cloud-localds".to_string(),
            enable_kvm: true,
        }
    }
}

/// Host port range scanned for SSH forwards.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PortRange {
    /// First candidate port.
    pub start: u16,
    /// End of the range (exclusive). `u32` so that 65535 itself can be scanned.
    pub end: u32,
    /// Returned when nothing in the range is bindable.
    pub fallback: u16,
}

impl Default for PortRange {
    fn default() -> Self {
        Self {
            start: 2222,
            end: 65535,
            fallback: 2222,
        }
    }
}

/// Resource limits for creation requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Smallest memory allocation in MiB.
    pub min_memory_mb: u32,
    /// Largest memory allocation in MiB.
    pub max_memory_mb: u32,
    /// Fewest vCPUs.
    pub min_cpus: u8,
    /// Most vCPUs.
    pub max_cpus: u8,
    /// Largest disk in GiB.
    pub max_disk_gib: u64,
    /// Instances a non-privileged owner may hold.
    pub max_instances_per_owner: usize,
    /// OS used when a request names none.
    pub default_os: String,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            min_memory_mb: 512,
            max_memory_mb: 8192,
            min_cpus: 1,
            max_cpus: 8,
            max_disk_gib: 512,
            max_instances_per_owner: 5,
            default_os: "ubuntu22".to_string(),
        }
    }
}

/// Bounded waits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    /// Interval between pidfile polls (default: 500ms).
    #[serde(with = "humantime_serde")]
    pub pidfile_poll: Duration,

    /// Number of pidfile polls before falling back to a process search.
    pub pidfile_attempts: u32,

    /// Time between SIGTERM and SIGKILL (default: 5s).
    #[serde(with = "humantime_serde")]
    pub stop_grace: Duration,

    /// Pause between stop and start on restart (default: 3s).
    #[serde(with = "humantime_serde")]
    pub restart_cooldown: Duration,

    /// Limit for one disk/seed tool invocation (default: 10m).
    #[serde(with = "humantime_serde")]
    pub tool: Duration,

    /// Limit for the hypervisor's daemonizing parent to exit (default: 60s).
    #[serde(with = "humantime_serde")]
    pub launch: Duration,

    /// Connect timeout for image downloads (default: 30s).
    #[serde(with = "humantime_serde")]
    pub download_connect: Duration,

    /// Interval of the liveness reconcile loop in `serve` (default: 30s).
    #[serde(with = "humantime_serde")]
    pub reconcile_interval: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            pidfile_poll: Duration::from_millis(500),
            pidfile_attempts: 10,
            stop_grace: Duration::from_secs(5),
            restart_cooldown: Duration::from_secs(3),
            tool: Duration::from_secs(600),
            launch: Duration::from_secs(60),
            download_connect: Duration::from_secs(30),
            reconcile_interval: Duration::from_secs(30),
        }
    }
}

impl ManagerConfig {
    /// Load configuration.
    ///
    /// Lookup order: `explicit`, then `$VPSMAN_CONFIG`, then the per-user
    /// config file. Defaults are used when none of them exists. Environment
    /// overrides are applied last.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(p) => Some(p.to_path_buf()),
            None => std::env::var_os(CONFIG_ENV)
                .map(PathBuf::from)
                .or_else(default_config_path),
        };

        let mut config = match path {
            Some(ref p) if p.exists() => Self::from_file(p)?,
            Some(ref p) if explicit.is_some() => {
                return Err(Error::Config(format!(
                    "config file not found: {}",
                    p.display()
                )))
            }
            _ => Self::default(),
        };

        if let Some(dir) = std::env::var_os(VM_DIR_ENV) {
            config.vm_dir = PathBuf::from(dir);
        }
        if let Ok(host) = std::env::var(PUBLIC_HOST_ENV) {
            config.public_host = host;
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// Registry database path.
    pub fn database_path(&self) -> PathBuf {
        self.database
            .clone()
            .unwrap_or_else(|| self.vm_dir.join("vpsman.redb"))
    }

    /// Reject configurations the manager cannot work with.
    pub fn validate(&self) -> Result<()> {
        let ports = &self.ports;
        if u32::from(ports.start) >= ports.end || ports.end > 65536 {
            return Err(Error::Config(format!(
                "invalid port range {}..{}",
                ports.start, ports.end
            )));
        }
        if ports.fallback == 0 {
            return Err(Error::Config("fallback port must be non-zero".into()));
        }

        let limits = &self.limits;
        if limits.min_memory_mb == 0 || limits.min_memory_mb > limits.max_memory_mb {
            return Err(Error::Config(format!(
                "invalid memory limits {}..={}",
                limits.min_memory_mb, limits.max_memory_mb
            )));
        }
        if limits.min_cpus == 0 || limits.min_cpus > limits.max_cpus {
            return Err(Error::Config(format!(
                "invalid cpu limits {}..={}",
                limits.min_cpus, limits.max_cpus
            )));
        }
        if !self.catalog.contains(&limits.default_os) {
            return Err(Error::Config(format!(
                "default os '{}' is not in the catalog",
                limits.default_os
            )));
        }
        if self.timeouts.pidfile_attempts == 0 {
            return Err(Error::Config("pidfile_attempts must be at least 1".into()));
        }
        Ok(())
    }
}

/// Per-user config file location.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_NAME).join("config.toml"))
}

mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        humantime::format_duration(*duration)
            .to_string()
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ManagerConfig::default();
        config.validate().unwrap();
        assert_eq!(config.ports.start, 2222);
        assert_eq!(config.limits.max_instances_per_owner, 5);
        assert_eq!(config.timeouts.pidfile_attempts, 10);
        assert!(config.vm_dir.ends_with("vms"));
        assert_eq!(config.database_path(), config.vm_dir.join("vpsman.redb"));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: ManagerConfig = toml::from_str(
            r#"
vm_dir = "/srv/vms"
public_host = "vps.example.net"

[timeouts]
stop_grace = "2s"
pidfile_poll = "250ms"

[limits]
max_cpus = 4
"#,
        )
        .unwrap();
        assert_eq!(config.vm_dir, PathBuf::from("/srv/vms"));
        assert_eq!(config.public_host, "vps.example.net");
        assert_eq!(config.timeouts.stop_grace, Duration::from_secs(2));
        assert_eq!(config.timeouts.pidfile_poll, Duration::from_millis(250));
        assert_eq!(config.timeouts.restart_cooldown, Duration::from_secs(3));
        assert_eq!(config.limits.max_cpus, 4);
        assert_eq!(config.limits.max_memory_mb, 8192);
        assert_eq!(config.catalog.len(), 8);
    }

    #[test]
    fn test_durations_serialize_human_readable() {
        let text = toml::to_string(&ManagerConfig::default()).unwrap();
        assert!(text.contains("stop_grace = \"5s\""), "got: {text}");
        assert!(text.contains("pidfile_poll = \"500ms\""), "got: {text}");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = ManagerConfig::default();
        config.ports.end = 2000;
        assert!(config.validate().is_err());

        let mut config = ManagerConfig::default();
        config.limits.min_memory_mb = 16384;
        assert!(config.validate().is_err());

        let mut config = ManagerConfig::default();
        config.limits.default_os = "plan9".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_explicit_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        let err = ManagerConfig::load(Some(&missing)).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "public_host = \"203.0.113.7\"\n").unwrap();
        let config = ManagerConfig::load(Some(&path)).unwrap();
        if std::env::var_os(PUBLIC_HOST_ENV).is_none() {
            assert_eq!(config.public_host, "203.0.113.7");
        }
    }
}
