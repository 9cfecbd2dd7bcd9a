//! Instance records and identifiers.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub use vpsman_protocol::InstanceStatus;

/// Prefix of every instance id, and of every per-instance artifact file name.
pub const INSTANCE_PREFIX: &str = "vps_";

/// Prefix reserved for cache images.
pub const CACHE_PREFIX: &str = "cache_";

/// Characters generated secrets are drawn from.
const SECRET_ALPHABET: &[u8] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789!@#$%^&*";

/// Length of generated secrets.
pub const SECRET_LEN: usize = 16;

/// A provisioned virtual machine, as stored in the registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Instance {
    /// Unique, never reused.
    pub id: String,
    /// Requesting principal.
    pub owner_id: String,
    /// Guest hostname.
    pub hostname: String,
    /// Guest login user.
    pub username: String,
    /// Login password for `username` and root.
    pub secret: String,
    /// Bumped on every credential rotation.
    #[serde(default)]
    pub credential_generation: u32,
    /// Host port forwarded to guest port 22.
    pub ssh_port: u16,
    /// Memory in MiB.
    pub memory_mb: u32,
    /// Number of vCPUs.
    pub cpu_count: u8,
    /// Requested disk size as given at creation (`"20G"`).
    pub disk_size: String,
    /// Catalog identifier.
    pub os_type: String,
    /// Instance disk image.
    pub disk_path: PathBuf,
    /// First-boot config volume.
    pub seed_path: PathBuf,
    /// Recorded lifecycle status.
    #[serde(default)]
    pub status: InstanceStatus,
    /// Hypervisor pid, present only while running.
    #[serde(default)]
    pub pid: Option<u32>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Graphical display instead of a serial console log.
    #[serde(default)]
    pub gui_mode: bool,
    /// Extra `host:guest` TCP forwards, verbatim.
    #[serde(default)]
    pub port_forwards: Vec<String>,
}

impl Instance {
    /// Check if the recorded hypervisor process is alive.
    pub fn is_process_alive(&self) -> bool {
        self.pid.is_some_and(crate::process::is_alive)
    }

    /// Status after probing the recorded pid.
    pub fn actual_status(&self) -> InstanceStatus {
        match self.status {
            InstanceStatus::Running if self.is_process_alive() => InstanceStatus::Running,
            _ => InstanceStatus::Stopped,
        }
    }

    /// Record a successful start.
    pub fn mark_running(&mut self, pid: u32) {
        self.status = InstanceStatus::Running;
        self.pid = Some(pid);
    }

    /// Record a stop.
    pub fn mark_stopped(&mut self) {
        self.status = InstanceStatus::Stopped;
        self.pid = None;
    }

    /// `ssh -p <port> user@host` for this instance.
    pub fn ssh_command(&self, public_host: &str) -> String {
        format!("ssh -p {} {}@{}", self.ssh_port, self.username, public_host)
    }
}

/// Files owned by one instance, by naming convention under the working
/// directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    /// `<id>.img`
    pub disk: PathBuf,
    /// `<id>-seed.iso`
    pub seed: PathBuf,
    /// `<id>.pid`
    pub pidfile: PathBuf,
    /// `<id>.log`
    pub log: PathBuf,
}

impl ArtifactPaths {
    /// Paths for `id` under `vm_dir`.
    pub fn new(vm_dir: &Path, id: &str) -> Self {
        Self {
            disk: vm_dir.join(format!("{id}.img")),
            seed: vm_dir.join(format!("{id}-seed.iso")),
            pidfile: vm_dir.join(format!("{id}.pid")),
            log: vm_dir.join(format!("{id}.log")),
        }
    }

    /// Base names of all four files.
    pub fn file_names(id: &str) -> [String; 4] {
        [
            format!("{id}.img"),
            format!("{id}-seed.iso"),
            format!("{id}.pid"),
            format!("{id}.log"),
        ]
    }

    /// All paths, with a short label each.
    pub fn labelled(&self) -> [(&'static str, &Path); 4] {
        [
            ("disk", self.disk.as_path()),
            ("seed", self.seed.as_path()),
            ("pidfile", self.pidfile.as_path()),
            ("log", self.log.as_path()),
        ]
    }
}

/// Cache image path for an OS type.
pub fn cache_path(vm_dir: &Path, os_type: &str) -> PathBuf {
    vm_dir.join(format!("{CACHE_PREFIX}{os_type}.img"))
}

/// New instance id: `vps_` + 16 lowercase hex characters.
pub fn generate_id() -> String {
    let bytes: [u8; 8] = rand::rng().random();
    format!("{INSTANCE_PREFIX}{}", hex::encode(bytes))
}

/// New login secret.
pub fn generate_secret() -> String {
    let mut rng = rand::rng();
    (0..SECRET_LEN)
        .map(|_| SECRET_ALPHABET[rng.random_range(0..SECRET_ALPHABET.len())] as char)
        .collect()
}

/// Hostname `vps-<owner>-<6 hex>`, with the owner reduced to a DNS label.
pub fn generate_hostname(owner: &str) -> String {
    let mut label: String = owner
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    label = label.trim_matches('-').to_string();
    label.truncate(40);
    let label = label.trim_end_matches('-');
    let suffix: [u8; 3] = rand::rng().random();
    if label.is_empty() {
        format!("vps-{}", hex::encode(suffix))
    } else {
        format!("vps-{label}-{}", hex::encode(suffix))
    }
}

/// A parsed extra TCP forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortForward {
    /// Host side.
    pub host: u16,
    /// Guest side.
    pub guest: u16,
}

impl PortForward {
    /// First parseable `host:guest` token in an entry.
    pub fn parse_entry(entry: &str) -> Option<Self> {
        entry
            .split(|c: char| c.is_whitespace() || c == ',')
            .find_map(Self::parse_token)
    }

    fn parse_token(token: &str) -> Option<Self> {
        let (host, guest) = token.split_once(':')?;
        let host: u16 = host.trim().parse().ok()?;
        let guest: u16 = guest.trim().parse().ok()?;
        if host == 0 || guest == 0 {
            return None;
        }
        Some(Self { host, guest })
    }
}
