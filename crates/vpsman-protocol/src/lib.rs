//! Types exchanged between vpsman and its front ends.
//!
//! The lifecycle manager returns these from its public operations and the
//! HTTP surface serialises them as JSON. Front ends (chat bots, dashboards)
//! depend on this crate alone and never on the manager's internals.

#![deny(missing_docs)]

use serde::{Deserialize, Serialize};

/// Recorded lifecycle status of an instance.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    /// No hypervisor process is recorded.
    #[default]
    Stopped,
    /// A hypervisor process is recorded and was live when last checked.
    Running,
}

impl InstanceStatus {
    /// Status name as stored and displayed.
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Stopped => "stopped",
            InstanceStatus::Running => "running",
        }
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Kind of failure, stable across versions so front ends can render feedback.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Unknown instance id or OS identifier.
    NotFound,
    /// Ownership or capacity check failed.
    Forbidden,
    /// No capacity left (disk size limit, ports).
    ResourceExhausted,
    /// An invoked program exited unsuccessfully.
    ExternalToolFailure,
    /// An expected disk, seed, PID or log file is absent.
    ArtifactMissing,
    /// A bounded wait was exceeded.
    Timeout,
    /// Network or filesystem error during download or copy.
    TransientIo,
    /// The request itself is malformed.
    InvalidRequest,
    /// The instance is in the wrong state for the operation.
    Conflict,
    /// Store or configuration fault.
    Internal,
}

impl ErrorKind {
    /// Upper-case code used in error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::Forbidden => "FORBIDDEN",
            ErrorKind::ResourceExhausted => "RESOURCE_EXHAUSTED",
            ErrorKind::ExternalToolFailure => "EXTERNAL_TOOL_FAILURE",
            ErrorKind::ArtifactMissing => "ARTIFACT_MISSING",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::TransientIo => "TRANSIENT_IO",
            ErrorKind::InvalidRequest => "INVALID_REQUEST",
            ErrorKind::Conflict => "CONFLICT",
            ErrorKind::Internal => "INTERNAL_ERROR",
        }
    }
}

/// JSON error body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    /// Human-readable message, including captured tool diagnostics.
    pub error: String,
    /// Machine-readable kind.
    pub code: ErrorKind,
}

// ============================================================================
// Requests
// ============================================================================

/// Request to provision a new instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateInstanceRequest {
    /// Requesting principal.
    pub owner_id: String,
    /// Memory in MB.
    pub memory_mb: u32,
    /// Number of virtual CPUs.
    pub cpu_count: u8,
    /// Disk size, e.g. `"20G"` or `"512M"`.
    pub disk_size: String,
    /// OS catalog identifier (default from configuration when absent).
    #[serde(default)]
    pub os_type: Option<String>,
    /// Graphical console instead of headless serial capture.
    #[serde(default)]
    pub gui_mode: bool,
    /// Extra `host:guest` TCP forwards.
    #[serde(default)]
    pub port_forwards: Vec<String>,
    /// Guest hostname (generated when absent).
    #[serde(default)]
    pub hostname: Option<String>,
}

// ============================================================================
// Responses
// ============================================================================

/// What a caller needs to reach a freshly created instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstanceSummary {
    /// Instance id.
    pub id: String,
    /// Guest hostname.
    pub hostname: String,
    /// Login user.
    pub username: String,
    /// Generated password.
    pub secret: String,
    /// Host port forwarded to guest port 22.
    pub ssh_port: u16,
    /// Host users connect to.
    pub public_host: String,
    /// OS display name.
    pub os_name: String,
    /// Ready-made SSH command line.
    pub ssh_command: String,
}

/// Outcome of start, stop or restart.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LifecycleOutcome {
    /// Instance id.
    pub id: String,
    /// Status after the operation.
    pub status: InstanceStatus,
    /// Hypervisor pid when running.
    pub pid: Option<u32>,
}

/// Newly generated credential.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CredentialRotation {
    /// Instance id.
    pub id: String,
    /// New password, applied on the next boot.
    pub secret: String,
}

/// Last lines of an instance console log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogTail {
    /// Instance id.
    pub id: String,
    /// Number of lines requested.
    pub requested: usize,
    /// Log text, newline separated.
    pub text: String,
}

/// A file removed by the orphan sweep.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemovedFile {
    /// File name within the working directory.
    pub name: String,
    /// Size before removal.
    pub bytes: u64,
}

/// Result of an orphan sweep.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SweepReport {
    /// Files removed.
    pub removed: Vec<RemovedFile>,
    /// Sum of removed file sizes.
    pub bytes_freed: u64,
    /// Cache files seen and kept.
    pub preserved_cache: Vec<String>,
}

/// Monotonic usage counters.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsageCounters {
    /// Instances ever created.
    pub instances_created: u64,
    /// Restart attempts.
    pub restarts: u64,
    /// Base image downloads.
    pub image_downloads: u64,
}

/// Host resource snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HostResources {
    /// Overall CPU usage in percent.
    pub cpu_percent: f32,
    /// Physical memory.
    pub memory_total_bytes: u64,
    /// Memory available for new allocations.
    pub memory_available_bytes: u64,
    /// Memory in use, in percent.
    pub memory_percent: f32,
    /// Size of the filesystem holding the working directory.
    pub disk_total_bytes: Option<u64>,
    /// Free space on that filesystem.
    pub disk_available_bytes: Option<u64>,
    /// Space in use on that filesystem, in percent.
    pub disk_percent: Option<f32>,
}

/// Fleet-wide totals.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UsageReport {
    /// Registered instances.
    pub total_instances: usize,
    /// Instances whose recorded process is alive.
    pub running: usize,
    /// Instances without a live process.
    pub stopped: usize,
    /// Sum of allocated memory in MB.
    pub allocated_memory_mb: u64,
    /// Sum of allocated CPUs.
    pub allocated_cpus: u64,
    /// Owners holding at least one instance.
    pub distinct_owners: usize,
    /// Monotonic counters.
    pub counters: UsageCounters,
    /// Host CPU, memory and disk at report time.
    #[serde(default)]
    pub host: HostResources,
}

/// Resource usage of one instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstanceStats {
    /// Instance id.
    pub id: String,
    /// Recorded status.
    pub status: InstanceStatus,
    /// Recorded hypervisor pid.
    pub pid: Option<u32>,
    /// Whether the recorded pid is alive.
    pub process_alive: bool,
    /// CPU usage of the hypervisor process in percent.
    pub cpu_percent: Option<f32>,
    /// Resident memory of the hypervisor process.
    pub memory_bytes: Option<u64>,
    /// Resident memory as a share of the allocation, in percent.
    pub memory_percent: Option<f32>,
    /// Allocated memory in MB.
    pub allocated_memory_mb: u32,
    /// Allocated CPUs.
    pub allocated_cpus: u8,
    /// Configured disk size string.
    pub disk_size: String,
    /// On-disk size of the disk image.
    pub disk_usage_bytes: Option<u64>,
}

/// Outcome of a single host dependency probe.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    /// Present and usable.
    Ok,
    /// Usable with degraded behaviour.
    Warning,
    /// Absent or unusable.
    Missing,
}

/// One row of the host dependency check.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DependencyCheck {
    /// What was checked.
    pub name: String,
    /// Result.
    pub status: CheckStatus,
    /// Path, version line, or reason.
    pub detail: String,
}
