//! Host inspection: dependency check, host resources and per-process usage.
//!
//! sysinfo and filesystem probes block, so they run on the blocking pool.

use crate::config::ManagerConfig;
use crate::process::{find_executable, run_tool};
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use std::time::Duration;
use sysinfo::{Disks, Pid, System};
use vpsman_protocol::{CheckStatus, DependencyCheck, HostResources};

/// Limit for `<tool> --version` probes.
const VERSION_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Device node required for hardware acceleration.
const KVM_DEVICE: &str = "/dev/kvm";

fn check(name: &str, status: CheckStatus, detail: impl Into<String>) -> DependencyCheck {
    DependencyCheck {
        name: name.to_string(),
        status,
        detail: detail.into(),
    }
}

/// Check that everything the manager shells out to is present.
pub async fn dependency_check(config: &ManagerConfig) -> Vec<DependencyCheck> {
    let mut checks = Vec::new();

    for (name, program) in [
        ("hypervisor", &config.tools.hypervisor),
        ("disk_tool", &config.tools.disk_tool),
        ("seed_tool", &config.tools.seed_tool),
    ] {
        checks.push(check_tool(name, program).await);
    }

    checks.push(if Path::new(KVM_DEVICE).exists() {
        check("kvm", CheckStatus::Ok, format!("{KVM_DEVICE} exists"))
    } else {
        check(
            "kvm",
            CheckStatus::Warning,
            format!("{KVM_DEVICE} not found, guests fall back to software emulation"),
        )
    });

    checks.push(check_vm_dir(&config.vm_dir).await);
    checks
}

async fn check_tool(name: &str, program: &str) -> DependencyCheck {
    let Some(path) = find_executable(program) else {
        return check(name, CheckStatus::Missing, format!("{program} not found on PATH"));
    };

    // Not every tool knows --version; its absence is not a failure.
    let version = run_tool(&path.to_string_lossy(), ["--version"], VERSION_PROBE_TIMEOUT)
        .await
        .ok()
        .and_then(|out| out.stdout.lines().next().map(str::trim).map(str::to_string))
        .filter(|line| !line.is_empty());

    let detail = match version {
        Some(version) => format!("{} ({version})", path.display()),
        None => path.display().to_string(),
    };
    check(name, CheckStatus::Ok, detail)
}

async fn check_vm_dir(vm_dir: &Path) -> DependencyCheck {
    let vm_dir = vm_dir.to_path_buf();
    tokio::task::spawn_blocking(move || probe_vm_dir(&vm_dir))
        .await
        .unwrap_or_else(|e| check("vm_dir", CheckStatus::Missing, format!("probe failed: {e}")))
}

fn probe_vm_dir(vm_dir: &Path) -> DependencyCheck {
    if !vm_dir.exists() {
        return check(
            "vm_dir",
            CheckStatus::Warning,
            format!("{} does not exist (will be created)", vm_dir.display()),
        );
    }
    if let Err(e) = tempfile::tempfile_in(vm_dir) {
        return check(
            "vm_dir",
            CheckStatus::Missing,
            format!("{} is not writable: {e}", vm_dir.display()),
        );
    }
    let detail = match available_space(vm_dir) {
        Some(bytes) => format!(
            "{} writable, {:.1} GiB free",
            vm_dir.display(),
            bytes as f64 / (1024.0 * 1024.0 * 1024.0)
        ),
        None => format!("{} writable", vm_dir.display()),
    };
    check("vm_dir", CheckStatus::Ok, detail)
}

/// Free space on the filesystem holding `path`. Blocking.
pub fn available_space(path: &Path) -> Option<u64> {
    filesystem_space(path).map(|(_, available)| available)
}

/// `(total, available)` bytes of the deepest mount containing `path`.
fn filesystem_space(path: &Path) -> Option<(u64, u64)> {
    let canonical = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    let disks = Disks::new_with_refreshed_list();
    disks
        .iter()
        .filter(|disk| canonical.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().components().count())
        .map(|disk| (disk.total_space(), disk.available_space()))
}

fn percent(used: u64, total: u64) -> f32 {
    if total == 0 {
        return 0.0;
    }
    (used as f64 / total as f64 * 100.0) as f32
}

/// Sample host CPU, memory, and the filesystem holding `path`.
///
/// CPU usage needs two samples, so this takes at least sysinfo's minimum
/// update interval.
pub async fn host_resources(path: &Path) -> HostResources {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || sample_host(&path))
        .await
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "host sampling failed");
            HostResources::default()
        })
}

fn sample_host(path: &Path) -> HostResources {
    let mut system = System::new();
    system.refresh_cpu();
    std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
    system.refresh_cpu();
    system.refresh_memory();

    let total = system.total_memory();
    let available = system.available_memory();
    let disk = filesystem_space(path);

    HostResources {
        cpu_percent: system.global_cpu_info().cpu_usage(),
        memory_total_bytes: total,
        memory_available_bytes: available,
        memory_percent: percent(total.saturating_sub(available), total),
        disk_total_bytes: disk.map(|(total, _)| total),
        disk_available_bytes: disk.map(|(_, available)| available),
        disk_percent: disk.map(|(total, available)| percent(total.saturating_sub(available), total)),
    }
}

/// CPU and memory usage of one process.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessUsage {
    /// CPU usage in percent of one core.
    pub cpu_percent: f32,
    /// Resident memory in bytes.
    pub memory_bytes: u64,
}

/// Sample a process's usage. `None` when the process is gone.
///
/// CPU usage needs two samples, so this waits for sysinfo's minimum update
/// interval.
pub async fn process_usage(pid: u32) -> Option<ProcessUsage> {
    tokio::task::spawn_blocking(move || sample_process(Pid::from_u32(pid)))
        .await
        .ok()
        .flatten()
}

fn sample_process(pid: Pid) -> Option<ProcessUsage> {
    let mut system = System::new();
    if !system.refresh_process(pid) {
        return None;
    }
    std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
    if !system.refresh_process(pid) {
        return None;
    }
    system.process(pid).map(|process| ProcessUsage {
        cpu_percent: process.cpu_usage(),
        memory_bytes: process.memory(),
    })
}

/// Allocated on-disk size of a file.
pub async fn allocated_bytes(path: &Path) -> Option<u64> {
    tokio::fs::metadata(path)
        .await
        .ok()
        .map(|meta| meta.blocks() * 512)
}
