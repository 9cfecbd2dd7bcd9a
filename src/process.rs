//! Command-execution boundary and process primitives.
//!
//! Every external program (disk tool, seed tool, hypervisor) is run through
//! [`run_tool`], which captures exit status and stderr and bounds the wait.
//! Signals and liveness probes go straight to `libc`.

use crate::error::{Error, Result};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::process::Command;

const START_TIME_SLACK_SECS: u64 = 2;

/// Captured output of a successful tool run.
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    /// Standard output, lossily decoded.
    pub stdout: String,
    /// Standard error, lossily decoded.
    pub stderr: String,
}

/// Run an external program to completion.
///
/// Non-zero exit becomes [`Error::CommandFailed`] carrying stderr (or stdout
/// when stderr is empty). A run exceeding `timeout` is killed and reported
/// as [`Error::Timeout`].
pub async fn run_tool<I, S>(program: &str, args: I, timeout: Duration) -> Result<ToolOutput>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let args: Vec<_> = args
        .into_iter()
        .map(|a| a.as_ref().to_os_string())
        .collect();
    let label = match args.first() {
        Some(first) => format!("{} {}", program, first.to_string_lossy()),
        None => program.to_string(),
    };
    tracing::debug!(program = %program, args = ?args, "running tool");

    let child = Command::new(program)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Error::command_failed(&label, -1, e.to_string()))?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result.map_err(|e| Error::command_failed(&label, -1, e.to_string()))?,
        Err(_) => return Err(Error::timeout(label, timeout)),
    };

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    if !output.status.success() {
        let status = output.status.code().unwrap_or(-1);
        let diagnostic = if stderr.trim().is_empty() {
            stdout.trim()
        } else {
            stderr.trim()
        };
        tracing::debug!(command = %label, status, "tool failed");
        return Err(Error::command_failed(label, status, diagnostic));
    }

    Ok(ToolOutput { stdout, stderr })
}

/// Signals the supervisor sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Graceful termination.
    Term,
    /// Forceful kill.
    Kill,
}

impl Signal {
    fn raw(self) -> libc::c_int {
        match self {
            Signal::Term => libc::SIGTERM,
            Signal::Kill => libc::SIGKILL,
        }
    }
}

fn to_pid(pid: u32) -> Option<libc::pid_t> {
    // 0 and negative pids address process groups.
    libc::pid_t::try_from(pid).ok().filter(|p| *p > 0)
}

/// Send a signal. Returns `false` when the process no longer exists.
pub fn send_signal(pid: u32, signal: Signal) -> Result<bool> {
    let Some(raw_pid) = to_pid(pid) else {
        return Ok(false);
    };
    let rc = unsafe { libc::kill(raw_pid, signal.raw()) };
    if rc == 0 {
        return Ok(true);
    }
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        Ok(false)
    } else {
        Err(Error::Io(err))
    }
}

/// Non-destructive liveness probe (signal 0). Zombies count as dead.
pub fn is_alive(pid: u32) -> bool {
    let Some(raw_pid) = to_pid(pid) else {
        return false;
    };
    let rc = unsafe { libc::kill(raw_pid, 0) };
    let exists = rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM);
    exists && !is_zombie(pid)
}

#[cfg(target_os = "linux")]
fn is_zombie(pid: u32) -> bool {
    // Field 3 of /proc/<pid>/stat, after the parenthesised command name.
    std::fs::read_to_string(format!("/proc/{pid}/stat"))
        .ok()
        .and_then(|stat| {
            let rest = &stat[stat.rfind(')')? + 1..];
            rest.split_whitespace().next().map(|state| state == "Z")
        })
        .unwrap_or(false)
}

#[cfg(not(target_os = "linux"))]
fn is_zombie(_pid: u32) -> bool {
    false
}

/// Poll until `pid` exits or `timeout` elapses. Returns whether it exited.
pub async fn wait_for_exit(pid: u32, timeout: Duration) -> bool {
    let poll = Duration::from_millis(100);
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if !is_alive(pid) {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(poll).await;
    }
}

/// Parse a pidfile. Missing, empty or garbage files yield `None`.
pub async fn read_pidfile(path: &Path) -> Option<u32> {
    let text = tokio::fs::read_to_string(path).await.ok()?;
    text.trim().parse().ok().filter(|pid| *pid > 0)
}

/// Find a running process whose command line contains every needle.
///
/// Our own process is never returned. When several match, the lowest pid
/// wins.
pub fn find_process(needles: &[&str]) -> Option<u32> {
    use sysinfo::{ProcessRefreshKind, System, UpdateKind};

    // A plain process refresh leaves `cmd()` empty.
    let mut system = System::new();
    system.refresh_processes_specifics(ProcessRefreshKind::new().with_cmd(UpdateKind::Always));
    let own = std::process::id();

    system
        .processes()
        .iter()
        .filter(|(pid, _)| pid.as_u32() != own)
        .filter(|(_, process)| {
            let cmdline = process.cmd().join(" ");
            !cmdline.is_empty() && needles.iter().all(|n| cmdline.contains(n))
        })
        .map(|(pid, _)| pid.as_u32())
        .min()
}

/// Whether `pid` is a process that already existed at `when`.
///
/// A pid read from an old pidfile may since have been reused; the reused
/// process starts after the file was written.
pub fn started_by(pid: u32, when: SystemTime) -> bool {
    use sysinfo::{Pid, ProcessRefreshKind, System};

    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    if !system.refresh_process_specifics(pid, ProcessRefreshKind::new()) {
        return false;
    }
    let Some(process) = system.process(pid) else {
        return false;
    };
    let when = when
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    // Start times have whole-second resolution.
    process.start_time() <= when + START_TIME_SLACK_SECS
}

/// Resolve a program name against `PATH`, or check an explicit path.
pub fn find_executable(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }

    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(program))
        .find(|full| full.is_file())
}
