//! The lifecycle manager: the single entry point callers drive.
//!
//! Creation runs the pipeline
//!
//! ```text
//! validate -> reserve id -> image cache -> disk -> seed -> port -> registry row
//! ```
//!
//! and rolls back the disk and seed on any failure, so a registry row only
//! ever exists for an instance whose artifacts are complete. Mutations of an
//! existing instance (start, stop, restart, delete, credential rotation) are
//! serialized per instance id.

use crate::catalog::{Catalog, OsImage};
use crate::config::{Limits, ManagerConfig};
use crate::db::{Counter, Registry, ALL_OWNERS};
use crate::error::{Error, Result};
use crate::image::{provision_disk, DiskSize, DiskTool, ImageCache};
use crate::instance::{
    generate_hostname, generate_id, generate_secret, ArtifactPaths, Instance, InstanceStatus,
};
use crate::locks::KeyedLocks;
use crate::seed::{SeedBuilder, SeedSpec};
use crate::supervisor::Supervisor;
use crate::{host, logs, network, sweeper};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use vpsman_protocol::{
    CreateInstanceRequest, CredentialRotation, DependencyCheck, InstanceStats, InstanceSummary,
    LifecycleOutcome, LogTail, SweepReport, UsageReport,
};

/// Longest accepted guest hostname (one DNS label).
const MAX_HOSTNAME_LEN: usize = 63;

/// A creation request that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedRequest {
    /// Requesting principal.
    pub owner_id: String,
    /// Memory in MiB.
    pub memory_mb: u32,
    /// vCPUs.
    pub cpu_count: u8,
    /// Disk size as requested.
    pub disk_size_text: String,
    /// Parsed disk size.
    pub disk_size: DiskSize,
    /// Catalog id, defaulted when the request named none.
    pub os_type: String,
    /// Graphical display.
    pub gui_mode: bool,
    /// Extra forwards, verbatim.
    pub port_forwards: Vec<String>,
    /// Caller-chosen hostname.
    pub hostname: Option<String>,
}

impl ValidatedRequest {
    /// Check a creation request against the configured limits and catalog.
    pub fn new(req: &CreateInstanceRequest, limits: &Limits, catalog: &Catalog) -> Result<Self> {
        let owner_id = req.owner_id.trim();
        if owner_id.is_empty() || owner_id.chars().any(char::is_control) {
            return Err(Error::invalid("owner id must be non-empty printable text"));
        }
        if owner_id == ALL_OWNERS {
            return Err(Error::invalid(format!("'{ALL_OWNERS}' is not a valid owner id")));
        }

        if !(limits.min_memory_mb..=limits.max_memory_mb).contains(&req.memory_mb) {
            return Err(Error::invalid(format!(
                "memory must be between {} and {} MB, got {}",
                limits.min_memory_mb, limits.max_memory_mb, req.memory_mb
            )));
        }
        if !(limits.min_cpus..=limits.max_cpus).contains(&req.cpu_count) {
            return Err(Error::invalid(format!(
                "cpu count must be between {} and {}, got {}",
                limits.min_cpus, limits.max_cpus, req.cpu_count
            )));
        }

        let disk_size = DiskSize::parse(&req.disk_size)?;
        if let Some(gib) = disk_size.gib_ceil() {
            if gib > limits.max_disk_gib {
                return Err(Error::ResourceExhausted(format!(
                    "disk size {} exceeds the {} GiB limit",
                    req.disk_size, limits.max_disk_gib
                )));
            }
        }

        let os_type = req
            .os_type
            .as_deref()
            .map(str::trim)
            .filter(|os| !os.is_empty())
            .unwrap_or(&limits.default_os)
            .to_string();
        catalog.get(&os_type)?;

        let hostname = match req.hostname.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(name) => {
                validate_hostname(name)?;
                Some(name.to_ascii_lowercase())
            }
        };

        Ok(Self {
            owner_id: owner_id.to_string(),
            memory_mb: req.memory_mb,
            cpu_count: req.cpu_count,
            disk_size_text: req.disk_size.trim().to_string(),
            disk_size,
            os_type,
            gui_mode: req.gui_mode,
            port_forwards: req.port_forwards.clone(),
            hostname,
        })
    }
}

fn validate_hostname(name: &str) -> Result<()> {
    let valid = name.len() <= MAX_HOSTNAME_LEN
        && !name.starts_with('-')
        && !name.ends_with('-')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
    if valid {
        Ok(())
    } else {
        Err(Error::invalid(format!("invalid hostname '{name}'")))
    }
}

/// Ids of creations in flight, with the ssh port once allocated.
type Reservations = Mutex<HashMap<String, Option<u16>>>;

/// Holds an instance id for a creation in flight; released on drop.
struct ReservationGuard<'a> {
    reservations: &'a Reservations,
    id: String,
}

impl<'a> ReservationGuard<'a> {
    /// Reserve a fresh id that is neither registered nor reserved.
    fn new(reservations: &'a Reservations, registry: &Registry) -> Result<Self> {
        loop {
            let id = generate_id();
            if registry.get(&id)?.is_some() {
                continue;
            }
            let mut map = reservations.lock();
            if map.contains_key(&id) {
                continue;
            }
            map.insert(id.clone(), None);
            return Ok(Self { reservations, id });
        }
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn set_port(&self, port: u16) {
        if let Some(slot) = self.reservations.lock().get_mut(&self.id) {
            *slot = Some(port);
        }
    }
}

impl Drop for ReservationGuard<'_> {
    fn drop(&mut self) {
        self.reservations.lock().remove(&self.id);
        tracing::trace!(instance = %self.id, "reservation released");
    }
}

/// Drives the lifecycle of every instance under one working directory.
#[derive(Debug)]
pub struct LifecycleManager {
    config: ManagerConfig,
    registry: Registry,
    cache: ImageCache,
    disk_tool: DiskTool,
    seeds: SeedBuilder,
    supervisor: Supervisor,
    instance_locks: KeyedLocks,
    port_lock: tokio::sync::Mutex<()>,
    reservations: Reservations,
}

impl LifecycleManager {
    /// Open the manager: create the working directory, open the registry,
    /// and reconcile recorded status with live processes.
    pub async fn open(config: ManagerConfig) -> Result<Self> {
        config.validate()?;
        tokio::fs::create_dir_all(&config.vm_dir).await?;

        let registry = Registry::open(&config.database_path())?;
        let cache = ImageCache::new(&config.vm_dir, config.timeouts.download_connect)?;
        let disk_tool = DiskTool::new(&config.tools.disk_tool, config.timeouts.tool);
        let seeds = SeedBuilder::new(&config.tools.seed_tool, config.timeouts.tool, &config.vm_dir);
        let supervisor = Supervisor::new(&config.tools, &config.timeouts, &config.vm_dir);

        let manager = Self {
            config,
            registry,
            cache,
            disk_tool,
            seeds,
            supervisor,
            instance_locks: KeyedLocks::new(),
            port_lock: tokio::sync::Mutex::new(()),
            reservations: Mutex::new(HashMap::new()),
        };

        manager.reconcile().await?;
        tracing::info!(
            vm_dir = %manager.config.vm_dir.display(),
            instances = manager.registry.list()?.len(),
            "lifecycle manager ready"
        );
        Ok(manager)
    }

    /// Active configuration.
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Supervisor, for phase inspection.
    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    // ========================================================================
    // Creation
    // ========================================================================

    /// Create a stopped instance with a provisioned disk and seed.
    pub async fn create(&self, req: &CreateInstanceRequest) -> Result<InstanceSummary> {
        let req = ValidatedRequest::new(req, &self.config.limits, &self.config.catalog)?;
        let image = self.config.catalog.get(&req.os_type)?.clone();

        let reservation = ReservationGuard::new(&self.reservations, &self.registry)?;
        let id = reservation.id().to_string();
        let paths = ArtifactPaths::new(&self.config.vm_dir, &id);
        tracing::info!(instance = %id, owner = %req.owner_id, os = %req.os_type, "creating instance");

        let instance = match self.provision(&reservation, &req, &image, &paths).await {
            Ok(instance) => instance,
            Err(err) => {
                tracing::warn!(instance = %id, error = %err, "creation failed, rolling back");
                remove_artifacts(&id, [&paths.disk, &paths.seed]).await;
                return Err(err);
            }
        };

        if let Err(err) = self.registry.insert(&instance) {
            remove_artifacts(&id, [&paths.disk, &paths.seed]).await;
            return Err(err);
        }
        drop(reservation);

        tracing::info!(
            instance = %id,
            port = instance.ssh_port,
            hostname = %instance.hostname,
            "instance created"
        );
        Ok(InstanceSummary {
            id: instance.id.clone(),
            hostname: instance.hostname.clone(),
            username: instance.username.clone(),
            secret: instance.secret.clone(),
            ssh_port: instance.ssh_port,
            public_host: self.config.public_host.clone(),
            os_name: image.name.clone(),
            ssh_command: instance.ssh_command(&self.config.public_host),
        })
    }

    async fn provision(
        &self,
        reservation: &ReservationGuard<'_>,
        req: &ValidatedRequest,
        image: &OsImage,
        paths: &ArtifactPaths,
    ) -> Result<Instance> {
        let id = reservation.id();
        let username = image.default_user.as_str();
        let cached = self.cache.ensure_cached(&req.os_type, image).await?;
        if cached.downloaded {
            self.registry.increment(Counter::ImageDownloads)?;
        }

        provision_disk(&self.disk_tool, &cached.path, &paths.disk, req.disk_size).await?;

        let hostname = req
            .hostname
            .clone()
            .unwrap_or_else(|| generate_hostname(&req.owner_id));
        let secret = generate_secret();
        let spec = SeedSpec {
            instance_id: id,
            hostname: &hostname,
            username,
            secret: &secret,
            generation: 0,
        };
        self.seeds.build(&spec, &paths.seed).await?;

        let ssh_port = self.allocate_port(reservation).await?;

        Ok(Instance {
            id: id.to_string(),
            owner_id: req.owner_id.clone(),
            hostname,
            username: username.to_string(),
            secret,
            credential_generation: 0,
            ssh_port,
            memory_mb: req.memory_mb,
            cpu_count: req.cpu_count,
            disk_size: req.disk_size_text.clone(),
            os_type: req.os_type.clone(),
            disk_path: paths.disk.clone(),
            seed_path: paths.seed.clone(),
            status: InstanceStatus::Stopped,
            pid: None,
            created_at: Utc::now(),
            gui_mode: req.gui_mode,
            port_forwards: req.port_forwards.clone(),
        })
    }

    /// Pick an ssh port not used by any registered or in-flight instance.
    async fn allocate_port(&self, reservation: &ReservationGuard<'_>) -> Result<u16> {
        let _serial = self.port_lock.lock().await;

        let mut taken: HashSet<u16> = self
            .registry
            .list()?
            .into_iter()
            .map(|inst| inst.ssh_port)
            .collect();
        taken.extend(self.reservations.lock().values().flatten().copied());

        let range = self.config.ports.clone();
        let choice = tokio::task::spawn_blocking(move || network::allocate(&range, &taken))
            .await
            .map_err(|e| Error::Io(std::io::Error::other(format!("port scan failed: {e}"))))?;

        let port = choice.port();
        reservation.set_port(port);
        tracing::debug!(instance = %reservation.id(), port, ?choice, "ssh port assigned");
        Ok(port)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Launch a stopped instance.
    pub async fn start(&self, id: &str) -> Result<LifecycleOutcome> {
        let _guard = self.instance_locks.lock(id).await;
        let mut instance = self.registry.require(id)?;
        self.recover_unrecorded(&mut instance).await?;
        if instance.actual_status() == InstanceStatus::Running {
            return Err(Error::invalid_state("stopped", "running"));
        }

        let pid = self.supervisor.start(&instance).await?;
        instance.mark_running(pid);
        if let Err(err) = self.registry.update(&instance) {
            self.abandon_launch(&instance).await;
            return Err(err);
        }
        Ok(outcome(&instance))
    }

    /// Stop a running instance.
    pub async fn stop(&self, id: &str) -> Result<LifecycleOutcome> {
        let _guard = self.instance_locks.lock(id).await;
        let mut instance = self.registry.require(id)?;
        if instance.status != InstanceStatus::Running || instance.pid.is_none() {
            return Err(Error::invalid_state("running", instance.status.as_str()));
        }

        self.supervisor.stop(&instance).await?;
        instance.mark_stopped();
        self.registry.update(&instance)?;
        Ok(outcome(&instance))
    }

    /// Stop (when running), pause, then start again.
    ///
    /// The restart counter counts attempts: it is bumped together with the
    /// status change when the start succeeds, and on its own otherwise.
    pub async fn restart(&self, id: &str) -> Result<LifecycleOutcome> {
        let _guard = self.instance_locks.lock(id).await;
        let mut instance = self.registry.require(id)?;
        self.recover_unrecorded(&mut instance).await?;

        match self.restart_locked(&mut instance).await {
            Ok(()) => Ok(outcome(&instance)),
            Err(err) => {
                if let Err(e) = self.registry.increment(Counter::Restarts) {
                    tracing::warn!(instance = %id, error = %e, "failed to count restart");
                }
                Err(err)
            }
        }
    }

    async fn restart_locked(&self, instance: &mut Instance) -> Result<()> {
        if instance.status == InstanceStatus::Running && instance.pid.is_some() {
            self.supervisor.stop(instance).await?;
            instance.mark_stopped();
            self.registry.update(instance)?;
        }

        tokio::time::sleep(self.config.timeouts.restart_cooldown).await;

        let pid = self.supervisor.start(instance).await?;
        instance.mark_running(pid);
        if let Err(err) = self.registry.update_counting(instance, Counter::Restarts) {
            self.abandon_launch(instance).await;
            instance.mark_stopped();
            return Err(err);
        }
        tracing::info!(instance = %instance.id, pid, "instance restarted");
        Ok(())
    }

    /// Record a live hypervisor the row does not know about.
    ///
    /// An interrupted start (process exit, dropped future) can launch the
    /// hypervisor without writing its pid. Returns whether the row changed.
    async fn recover_unrecorded(&self, instance: &mut Instance) -> Result<bool> {
        if instance.is_process_alive() {
            return Ok(false);
        }
        let Some(pid) = self.supervisor.pidfile_process(&instance.id).await else {
            return Ok(false);
        };
        tracing::warn!(instance = %instance.id, pid, "found unrecorded hypervisor, adopting it");
        instance.mark_running(pid);
        self.registry.update(instance)?;
        self.supervisor.adopt(&instance.id);
        Ok(true)
    }

    /// A process was launched but could not be recorded; kill it so no
    /// untracked hypervisor is left behind.
    async fn abandon_launch(&self, instance: &Instance) {
        tracing::warn!(instance = %instance.id, "launched process could not be recorded, stopping it");
        if let Err(e) = self.supervisor.stop(instance).await {
            tracing::warn!(instance = %instance.id, error = %e, "failed to stop unrecorded process");
        }
    }

    /// Stop (when running) and remove an instance with all its files.
    ///
    /// File removal failures are logged and do not abort the delete; the
    /// registry row is always removed.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let _guard = self.instance_locks.lock(id).await;
        let mut instance = self.registry.require(id)?;
        self.recover_unrecorded(&mut instance).await?;

        if instance.status == InstanceStatus::Running && instance.pid.is_some() {
            if let Err(e) = self.supervisor.stop(&instance).await {
                tracing::warn!(instance = %id, error = %e, "stop before delete failed, removing anyway");
            }
        }

        let paths = ArtifactPaths::new(&self.config.vm_dir, id);
        remove_artifacts(
            id,
            [&instance.disk_path, &instance.seed_path, &paths.pidfile, &paths.log],
        )
        .await;

        self.registry.remove(id)?;
        self.supervisor.forget(id);
        tracing::info!(instance = %id, "instance deleted");
        Ok(())
    }

    /// Issue a new secret. It takes effect on the guest's next boot.
    pub async fn rotate_credential(&self, id: &str) -> Result<CredentialRotation> {
        let _guard = self.instance_locks.lock(id).await;
        let previous = self.registry.require(id)?;

        let mut rotated = previous.clone();
        rotated.secret = generate_secret();
        rotated.credential_generation += 1;

        self.seeds.build(&seed_spec(&rotated), &rotated.seed_path).await?;
        if let Err(err) = self.registry.update(&rotated) {
            // Put the seed back in line with the stored credentials.
            if let Err(e) = self.seeds.build(&seed_spec(&previous), &previous.seed_path).await {
                tracing::warn!(instance = %id, error = %e, "failed to restore previous seed");
            }
            return Err(err);
        }

        tracing::info!(instance = %id, generation = rotated.credential_generation, "credential rotated");
        Ok(CredentialRotation {
            id: rotated.id,
            secret: rotated.secret,
        })
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Look up one instance.
    pub fn get(&self, id: &str) -> Result<Instance> {
        self.registry.require(id)
    }

    /// Instances of one owner, or of everyone for `"all"`.
    pub fn list_by_owner(&self, owner: &str) -> Result<Vec<Instance>> {
        self.registry.list_by_owner(owner)
    }

    /// Last `lines` lines of the instance's console log.
    pub async fn tail_log(&self, id: &str, lines: usize) -> Result<LogTail> {
        let instance = self.registry.require(id)?;
        let paths = ArtifactPaths::new(&self.config.vm_dir, &instance.id);
        let text = logs::tail(&paths.log, lines).await?;
        Ok(LogTail {
            id: instance.id,
            requested: lines,
            text,
        })
    }

    /// Fail with `Forbidden` when a non-privileged owner is at its limit.
    pub fn check_capacity(&self, owner: &str, privileged: bool) -> Result<()> {
        if privileged {
            return Ok(());
        }
        let limit = self.config.limits.max_instances_per_owner;
        let held = self.registry.list_by_owner(owner)?.len();
        if held >= limit {
            return Err(Error::Forbidden(format!(
                "owner {owner} already has {held} of {limit} instances"
            )));
        }
        Ok(())
    }

    /// Resource usage of one instance.
    pub async fn instance_stats(&self, id: &str) -> Result<InstanceStats> {
        let instance = self.registry.require(id)?;
        let alive = instance.is_process_alive();

        let usage = match instance.pid {
            Some(pid) if alive => host::process_usage(pid).await,
            _ => None,
        };
        let allocated_bytes = u64::from(instance.memory_mb) * 1024 * 1024;
        let memory_percent = usage.map(|u| (u.memory_bytes as f64 / allocated_bytes as f64 * 100.0) as f32);

        Ok(InstanceStats {
            status: instance.status,
            pid: instance.pid,
            process_alive: alive,
            cpu_percent: usage.map(|u| u.cpu_percent),
            memory_bytes: usage.map(|u| u.memory_bytes),
            memory_percent,
            allocated_memory_mb: instance.memory_mb,
            allocated_cpus: instance.cpu_count,
            disk_size: instance.disk_size.clone(),
            disk_usage_bytes: host::allocated_bytes(&instance.disk_path).await,
            id: instance.id,
        })
    }

    /// Totals across every instance, the usage counters, and a host
    /// resource snapshot.
    pub async fn usage_report(&self) -> Result<UsageReport> {
        let instances = self.registry.list()?;
        let running = instances
            .iter()
            .filter(|inst| inst.actual_status() == InstanceStatus::Running)
            .count();
        let owners: HashSet<&str> = instances.iter().map(|inst| inst.owner_id.as_str()).collect();

        Ok(UsageReport {
            total_instances: instances.len(),
            running,
            stopped: instances.len() - running,
            allocated_memory_mb: instances.iter().map(|i| u64::from(i.memory_mb)).sum(),
            allocated_cpus: instances.iter().map(|i| u64::from(i.cpu_count)).sum(),
            distinct_owners: owners.len(),
            counters: self.registry.counters()?,
            host: host::host_resources(&self.config.vm_dir).await,
        })
    }

    /// Check external tools and the working directory.
    pub async fn host_check(&self) -> Vec<DependencyCheck> {
        host::dependency_check(&self.config).await
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Remove instance artifacts no registered or in-flight instance owns.
    pub async fn sweep_orphans(&self) -> Result<SweepReport> {
        let report = sweeper::sweep(&self.config.vm_dir, |id| self.is_referenced(id)).await?;
        tracing::info!(
            removed = report.removed.len(),
            bytes_freed = report.bytes_freed,
            "orphan sweep finished"
        );
        Ok(report)
    }

    fn is_referenced(&self, id: &str) -> bool {
        if self.reservations.lock().contains_key(id) {
            return true;
        }
        match self.registry.get(id) {
            Ok(found) => found.is_some(),
            Err(e) => {
                tracing::warn!(instance = %id, error = %e, "registry lookup failed, keeping files");
                true
            }
        }
    }

    /// Bring recorded status in line with live processes.
    ///
    /// `Running` rows whose process is gone become `Stopped`; rows with an
    /// unrecorded live hypervisor become `Running`. Returns the corrected
    /// ids. Rows that are live are adopted by the supervisor.
    pub async fn reconcile(&self) -> Result<Vec<String>> {
        let mut corrected = Vec::new();
        for listed in self.registry.list()? {
            let _guard = self.instance_locks.lock(&listed.id).await;
            // Re-read under the lock; the row may have changed since listing.
            let Some(mut instance) = self.registry.get(&listed.id)? else {
                continue;
            };
            if self.recover_unrecorded(&mut instance).await? {
                corrected.push(instance.id);
                continue;
            }
            if instance.status != InstanceStatus::Running {
                continue;
            }
            if instance.is_process_alive() {
                self.supervisor.adopt(&instance.id);
                continue;
            }

            tracing::info!(instance = %instance.id, pid = ?instance.pid, "process gone, marking stopped");
            instance.mark_stopped();
            self.registry.update(&instance)?;
            self.supervisor.forget(&instance.id);
            corrected.push(instance.id);
        }
        Ok(corrected)
    }
}

/// Shared handle, as held by the HTTP surface.
pub type SharedManager = Arc<LifecycleManager>;

fn outcome(instance: &Instance) -> LifecycleOutcome {
    LifecycleOutcome {
        id: instance.id.clone(),
        status: instance.status,
        pid: instance.pid,
    }
}

fn seed_spec(instance: &Instance) -> SeedSpec<'_> {
    SeedSpec {
        instance_id: &instance.id,
        hostname: &instance.hostname,
        username: &instance.username,
        secret: &instance.secret,
        generation: instance.credential_generation,
    }
}

/// Best-effort removal; failures other than "already gone" are logged.
async fn remove_artifacts<'a>(id: &str, paths: impl IntoIterator<Item = &'a std::path::PathBuf>) {
    for path in paths {
        match tokio::fs::remove_file(path).await {
            Ok(()) => tracing::debug!(instance = %id, path = %path.display(), "removed artifact"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(instance = %id, path = %path.display(), error = %e, "failed to remove artifact");
            }
        }
    }
}
