//! Hypervisor process supervision.
//!
//! The supervisor launches a daemonized hypervisor per instance, locates it
//! through its pidfile (or a process search when the pidfile never shows
//! up), and stops it with SIGTERM escalating to SIGKILL. It tracks an
//! in-memory phase per instance:
//!
//! ```text
//! Stopped -> Starting -> Running -> Stopping -> Stopped
//!               |
//!               +-- (failure) --> Stopped
//! ```
//!
//! Persisting status and pid is the caller's job; callers also serialize
//! operations per instance id.

pub mod args;

use crate::config::{Timeouts, ToolConfig};
use crate::error::{Error, Result};
use crate::instance::{ArtifactPaths, Instance};
use crate::process::{self, Signal};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub use args::hypervisor_args;

/// Wait after SIGKILL before giving up on observing the exit.
const KILL_SETTLE: Duration = Duration::from_secs(1);

/// Supervision phase of one instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No hypervisor process.
    Stopped,
    /// Launch in progress.
    Starting,
    /// Hypervisor process is live.
    Running,
    /// Termination in progress.
    Stopping,
}

/// How a stop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Exited within the grace period.
    Graceful,
    /// Needed SIGKILL.
    Killed,
    /// The recorded pid was already gone.
    AlreadyExited,
}

/// Process supervisor.
#[derive(Debug)]
pub struct Supervisor {
    hypervisor: String,
    enable_kvm: bool,
    timeouts: Timeouts,
    vm_dir: PathBuf,
    phases: Mutex<HashMap<String, Phase>>,
}

impl Supervisor {
    /// Create a supervisor for instances under `vm_dir`.
    pub fn new(tools: &ToolConfig, timeouts: &Timeouts, vm_dir: &Path) -> Self {
        Self {
            hypervisor: tools.hypervisor.clone(),
            enable_kvm: tools.enable_kvm,
            timeouts: timeouts.clone(),
            vm_dir: vm_dir.to_path_buf(),
            phases: Mutex::new(HashMap::new()),
        }
    }

    /// Current phase of an instance. Untracked instances are `Stopped`.
    pub fn phase(&self, id: &str) -> Phase {
        self.phases.lock().get(id).copied().unwrap_or(Phase::Stopped)
    }

    fn transition(&self, id: &str, to: Phase) {
        let from = {
            let mut phases = self.phases.lock();
            let from = phases.get(id).copied().unwrap_or(Phase::Stopped);
            if to == Phase::Stopped {
                phases.remove(id);
            } else {
                phases.insert(id.to_string(), to);
            }
            from
        };
        tracing::debug!(instance = %id, ?from, ?to, "phase transition");
    }

    /// Drop any tracked phase (instance deleted).
    pub fn forget(&self, id: &str) {
        self.phases.lock().remove(id);
    }

    /// Mark an instance found running at startup.
    pub fn adopt(&self, id: &str) {
        self.transition(id, Phase::Running);
    }

    /// Live hypervisor named by the instance's pidfile, if any.
    ///
    /// The pidfile is written by the hypervisor itself and removed on stop,
    /// so a live pid here with no pid on the row means a launch whose
    /// result was never recorded.
    pub async fn pidfile_process(&self, id: &str) -> Option<u32> {
        let pidfile = ArtifactPaths::new(&self.vm_dir, id).pidfile;
        let pid = process::read_pidfile(&pidfile).await?;
        let written = tokio::fs::metadata(&pidfile).await.ok()?.modified().ok()?;
        (process::is_alive(pid) && process::started_by(pid, written)).then_some(pid)
    }

    /// Launch the hypervisor and return its pid.
    ///
    /// Fails with `ArtifactMissing` when the disk or seed is absent, with
    /// `CommandFailed` when the launcher exits non-zero or the resolved
    /// process is not live, and with `Timeout` when no pid can be found.
    pub async fn start(&self, instance: &Instance) -> Result<u32> {
        self.transition(&instance.id, Phase::Starting);
        match self.launch(instance).await {
            Ok(pid) => {
                self.transition(&instance.id, Phase::Running);
                tracing::info!(instance = %instance.id, pid, port = instance.ssh_port, "instance started");
                Ok(pid)
            }
            Err(err) => {
                self.transition(&instance.id, Phase::Stopped);
                tracing::warn!(instance = %instance.id, error = %err, "start failed");
                Err(err)
            }
        }
    }

    async fn launch(&self, instance: &Instance) -> Result<u32> {
        if !tokio::fs::try_exists(&instance.disk_path).await? {
            return Err(Error::artifact_missing("disk", &instance.disk_path));
        }
        if !tokio::fs::try_exists(&instance.seed_path).await? {
            return Err(Error::artifact_missing("seed", &instance.seed_path));
        }

        let paths = ArtifactPaths::new(&self.vm_dir, &instance.id);
        match tokio::fs::remove_file(&paths.pidfile).await {
            Ok(()) => tracing::debug!(instance = %instance.id, "removed stale pidfile"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let args = hypervisor_args(instance, &paths, self.enable_kvm);
        process::run_tool(&self.hypervisor, &args, self.timeouts.launch).await?;

        let pid = match self.wait_for_pidfile(&paths.pidfile).await {
            Some(pid) => pid,
            None => {
                tracing::debug!(instance = %instance.id, "pidfile missing, searching processes");
                self.search_process(&instance.id).await?
            }
        };

        if !process::is_alive(pid) {
            return Err(Error::command_failed(
                &self.hypervisor,
                -1,
                format!("process {pid} is not running after launch"),
            ));
        }
        Ok(pid)
    }

    async fn wait_for_pidfile(&self, pidfile: &Path) -> Option<u32> {
        for attempt in 0..self.timeouts.pidfile_attempts {
            if let Some(pid) = process::read_pidfile(pidfile).await {
                tracing::trace!(attempt, pid, "pidfile found");
                return Some(pid);
            }
            tokio::time::sleep(self.timeouts.pidfile_poll).await;
        }
        process::read_pidfile(pidfile).await
    }

    async fn search_process(&self, id: &str) -> Result<u32> {
        let program = Path::new(&self.hypervisor)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.hypervisor.clone());

        // Scans every process; keep it off the async workers.
        let needles = [program, id.to_string()];
        let found = tokio::task::spawn_blocking(move || {
            process::find_process(&[needles[0].as_str(), needles[1].as_str()])
        })
        .await
        .ok()
        .flatten();

        found.ok_or_else(|| {
            Error::timeout(
                format!("pidfile for {id}"),
                self.timeouts.pidfile_poll * self.timeouts.pidfile_attempts,
            )
        })
    }

    /// Terminate the instance's hypervisor.
    ///
    /// Sends SIGTERM, waits up to the grace period, then SIGKILLs. Fails
    /// with `InvalidState` when no pid is recorded.
    pub async fn stop(&self, instance: &Instance) -> Result<StopOutcome> {
        let Some(pid) = instance.pid else {
            return Err(Error::invalid_state("running", "stopped (no pid recorded)"));
        };

        self.transition(&instance.id, Phase::Stopping);
        let outcome = match self.terminate(pid).await {
            Ok(outcome) => outcome,
            Err(err) => {
                // Still tracked as running; the process may be alive.
                self.transition(&instance.id, Phase::Running);
                return Err(err);
            }
        };

        let pidfile = ArtifactPaths::new(&self.vm_dir, &instance.id).pidfile;
        if let Err(e) = tokio::fs::remove_file(&pidfile).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(instance = %instance.id, error = %e, "failed to remove pidfile");
            }
        }

        self.transition(&instance.id, Phase::Stopped);
        tracing::info!(instance = %instance.id, pid, ?outcome, "instance stopped");
        Ok(outcome)
    }

    async fn terminate(&self, pid: u32) -> Result<StopOutcome> {
        if !process::send_signal(pid, Signal::Term)? {
            return Ok(StopOutcome::AlreadyExited);
        }
        if process::wait_for_exit(pid, self.timeouts.stop_grace).await {
            return Ok(StopOutcome::Graceful);
        }

        tracing::warn!(pid, grace = ?self.timeouts.stop_grace, "process ignored SIGTERM, killing");
        process::send_signal(pid, Signal::Kill)?;
        if !process::wait_for_exit(pid, KILL_SETTLE).await {
            tracing::warn!(pid, "process still visible after SIGKILL");
        }
        Ok(StopOutcome::Killed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::InstanceStatus;
    use chrono::Utc;
    use std::os::unix::fs::PermissionsExt;

    fn fast_timeouts() -> Timeouts {
        Timeouts {
            pidfile_poll: Duration::from_millis(50),
            pidfile_attempts: 4,
            stop_grace: Duration::from_millis(500),
            launch: Duration::from_secs(10),
            ..Timeouts::default()
        }
    }

    fn write_script(path: &Path, body: &str) {
        std::fs::write(path, body).unwrap();
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    /// Hypervisor stand-in: forks a sleeper and writes its pid to `-pidfile`.
    const FAKE_HYPERVISOR: &str = r#"#!/bin/sh
pidfile=""
while [ $# -gt 0 ]; do
  case "$1" in
    -pidfile) pidfile="$2"; shift ;;
  esac
  shift
done
sleep 300 >/dev/null 2>&1 &
echo $! > "$pidfile"
"#;

    fn setup(hypervisor_body: &str) -> (tempfile::TempDir, Supervisor, Instance) {
        let dir = tempfile::tempdir().unwrap();
        let hypervisor = dir.path().join("qemu-system-fake");
        write_script(&hypervisor, hypervisor_body);

        let tools = ToolConfig {
            hypervisor: hypervisor.to_string_lossy().into_owned(),
            enable_kvm: false,
            ..ToolConfig::default()
        };
        let supervisor = Supervisor::new(&tools, &fast_timeouts(), dir.path());

        let id = crate::instance::generate_id();
        let paths = ArtifactPaths::new(dir.path(), &id);
        std::fs::write(&paths.disk, b"disk").unwrap();
        std::fs::write(&paths.seed, b"seed").unwrap();
        let instance = Instance {
            id,
            owner_id: "alice".into(),
            hostname: "vps-alice-000000".into(),
            username: "ubuntu".into(),
            secret: "pw".into(),
            credential_generation: 0,
            ssh_port: 2222,
            memory_mb: 512,
            cpu_count: 1,
            disk_size: "10G".into(),
            os_type: "ubuntu22".into(),
            disk_path: paths.disk,
            seed_path: paths.seed,
            status: InstanceStatus::Stopped,
            pid: None,
            created_at: Utc::now(),
            gui_mode: false,
            port_forwards: vec![],
        };
        (dir, supervisor, instance)
    }

    #[tokio::test]
    async fn test_start_then_stop() {
        let (_dir, supervisor, mut instance) = setup(FAKE_HYPERVISOR);

        let pid = supervisor.start(&instance).await.unwrap();
        assert!(process::is_alive(pid));
        assert_eq!(supervisor.phase(&instance.id), Phase::Running);

        instance.mark_running(pid);
        let outcome = supervisor.stop(&instance).await.unwrap();
        assert_ne!(outcome, StopOutcome::AlreadyExited);
        assert!(!process::is_alive(pid));
        assert_eq!(supervisor.phase(&instance.id), Phase::Stopped);
    }

    #[tokio::test]
    async fn test_missing_disk_fails_before_launch() {
        let (_dir, supervisor, instance) = setup(FAKE_HYPERVISOR);
        std::fs::remove_file(&instance.disk_path).unwrap();

        let err = supervisor.start(&instance).await.unwrap_err();
        assert!(matches!(err, Error::ArtifactMissing { artifact: "disk", .. }));
        assert_eq!(supervisor.phase(&instance.id), Phase::Stopped);
    }

    #[tokio::test]
    async fn test_launcher_failure_carries_stderr() {
        let (_dir, supervisor, instance) = setup(
            "#!/bin/sh\necho 'Could not access KVM kernel module' >&2\nexit 1\n",
        );
        let err = supervisor.start(&instance).await.unwrap_err();
        match err {
            Error::CommandFailed { stderr, .. } => assert!(stderr.contains("KVM")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_no_pidfile_and_no_process_times_out() {
        let (_dir, supervisor, instance) = setup("#!/bin/sh\nexit 0\n");
        let err = supervisor.start(&instance).await.unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }), "got {err}");
        assert_eq!(supervisor.phase(&instance.id), Phase::Stopped);
    }

    #[tokio::test]
    async fn test_missing_pidfile_falls_back_to_process_search() {
        // Leaves a process carrying the launcher name and instance id in
        // its argv, but never writes the pidfile.
        let (_dir, supervisor, mut instance) = setup(
            r#"#!/bin/sh
while [ $# -gt 0 ]; do
  case "$1" in -name) name="$2"; shift ;; esac
  shift
done
sh -c 'sleep 30; true' qemu-system-fake "$name" >/dev/null 2>&1 &
"#,
        );

        let pid = supervisor.start(&instance).await.unwrap();
        assert!(process::is_alive(pid));
        let cmdline = std::fs::read_to_string(format!("/proc/{pid}/cmdline")).unwrap();
        assert!(cmdline.contains(&instance.id), "resolved {pid}: {cmdline:?}");
        assert_eq!(supervisor.phase(&instance.id), Phase::Running);

        instance.mark_running(pid);
        supervisor.stop(&instance).await.unwrap();
        assert!(!process::is_alive(pid));
    }

    #[tokio::test]
    async fn test_pidfile_process_reports_live_launch() {
        let (dir, supervisor, instance) = setup(FAKE_HYPERVISOR);
        assert_eq!(supervisor.pidfile_process(&instance.id).await, None);

        let pid = supervisor.start(&instance).await.unwrap();
        assert_eq!(supervisor.pidfile_process(&instance.id).await, Some(pid));

        process::send_signal(pid, Signal::Kill).unwrap();
        assert!(process::wait_for_exit(pid, Duration::from_secs(5)).await);
        assert!(ArtifactPaths::new(dir.path(), &instance.id).pidfile.exists());
        assert_eq!(supervisor.pidfile_process(&instance.id).await, None);
    }

    #[tokio::test]
    async fn test_dead_pid_in_pidfile_fails() {
        let (_dir, supervisor, instance) = setup(
            r#"#!/bin/sh
while [ $# -gt 0 ]; do
  case "$1" in -pidfile) pidfile="$2"; shift ;; esac
  shift
done
sh -c 'exit 0' &
child=$!
wait $child
echo $child > "$pidfile"
"#,
        );
        let err = supervisor.start(&instance).await.unwrap_err();
        assert!(matches!(err, Error::CommandFailed { .. }), "got {err}");
    }

    #[tokio::test]
    async fn test_stop_without_pid_is_rejected() {
        let (_dir, supervisor, instance) = setup(FAKE_HYPERVISOR);
        let err = supervisor.stop(&instance).await.unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_stop_escalates_to_kill() {
        let (_dir, supervisor, mut instance) = setup(FAKE_HYPERVISOR);
        let mut child = std::process::Command::new("sh")
            .args(["-c", "trap '' TERM; while true; do sleep 1; done"])
            .spawn()
            .unwrap();
        // Give the shell time to install its trap.
        tokio::time::sleep(Duration::from_millis(200)).await;

        instance.mark_running(child.id());
        let reaper = std::thread::spawn(move || child.wait());
        let outcome = supervisor.stop(&instance).await.unwrap();
        assert_eq!(outcome, StopOutcome::Killed);
        reaper.join().unwrap().unwrap();
    }
}
