//! Durable registry of instances and usage counters.
//!
//! Backed by a single redb file with two tables:
//!
//! - `instances`: id -> JSON-encoded [`Instance`]
//! - `counters`: name -> monotonic `u64`
//!
//! Counter increments that belong to a registry mutation are committed in
//! the same write transaction as the mutation.

use crate::error::{Error, Result};
use crate::instance::Instance;
use redb::{Database, ReadableTable, TableDefinition, WriteTransaction};
use std::path::Path;
use vpsman_protocol::UsageCounters;

/// Instances keyed by id.
const INSTANCES: TableDefinition<&str, &[u8]> = TableDefinition::new("instances");

/// Usage counters keyed by name.
const COUNTERS: TableDefinition<&str, u64> = TableDefinition::new("counters");

/// Owner filter that matches every instance.
pub const ALL_OWNERS: &str = "all";

/// Monotonic usage counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    /// Successful creations.
    InstancesCreated,
    /// Restart attempts.
    Restarts,
    /// Completed image downloads.
    ImageDownloads,
}

impl Counter {
    fn key(self) -> &'static str {
        match self {
            Counter::InstancesCreated => "instances_created",
            Counter::Restarts => "restarts",
            Counter::ImageDownloads => "image_downloads",
        }
    }
}

/// Instance registry.
pub struct Registry {
    db: Database,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry").finish_non_exhaustive()
    }
}

impl Registry {
    /// Open (or create) the registry file.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path).map_err(Error::database)?;
        let registry = Self { db };

        // Tables must exist before the first read transaction opens them.
        registry.write(|txn| {
            txn.open_table(INSTANCES).map_err(Error::database)?;
            txn.open_table(COUNTERS).map_err(Error::database)?;
            Ok(())
        })?;

        tracing::debug!(path = %path.display(), "registry opened");
        Ok(registry)
    }

    fn write<T>(&self, f: impl FnOnce(&WriteTransaction) -> Result<T>) -> Result<T> {
        let txn = self.db.begin_write().map_err(Error::database)?;
        let value = f(&txn)?;
        txn.commit().map_err(Error::database)?;
        Ok(value)
    }

    /// Insert a new instance and bump the creation counter in one commit.
    pub fn insert(&self, instance: &Instance) -> Result<()> {
        let bytes = encode(instance)?;
        self.write(|txn| {
            let mut table = txn.open_table(INSTANCES).map_err(Error::database)?;
            if table
                .get(instance.id.as_str())
                .map_err(Error::database)?
                .is_some()
            {
                return Err(Error::invalid_state("absent", format!("{} exists", instance.id)));
            }
            table
                .insert(instance.id.as_str(), bytes.as_slice())
                .map_err(Error::database)?;
            drop(table);
            bump(txn, Counter::InstancesCreated)
        })
    }

    /// Look up an instance.
    pub fn get(&self, id: &str) -> Result<Option<Instance>> {
        let txn = self.db.begin_read().map_err(Error::database)?;
        let table = txn.open_table(INSTANCES).map_err(Error::database)?;
        let found = table.get(id).map_err(Error::database)?;
        found.map(|guard| decode(guard.value())).transpose()
    }

    /// Look up an instance, failing with `InstanceNotFound`.
    pub fn require(&self, id: &str) -> Result<Instance> {
        self.get(id)?
            .ok_or_else(|| Error::InstanceNotFound(id.to_string()))
    }

    /// All instances, oldest first.
    pub fn list(&self) -> Result<Vec<Instance>> {
        let txn = self.db.begin_read().map_err(Error::database)?;
        let table = txn.open_table(INSTANCES).map_err(Error::database)?;
        let mut instances = Vec::new();
        for entry in table.iter().map_err(Error::database)? {
            let (_, value) = entry.map_err(Error::database)?;
            instances.push(decode(value.value())?);
        }
        instances.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(instances)
    }

    /// Instances of one owner, or of everyone for [`ALL_OWNERS`].
    pub fn list_by_owner(&self, owner: &str) -> Result<Vec<Instance>> {
        let all = self.list()?;
        if owner == ALL_OWNERS {
            return Ok(all);
        }
        Ok(all.into_iter().filter(|i| i.owner_id == owner).collect())
    }

    /// Replace an existing row.
    pub fn update(&self, instance: &Instance) -> Result<()> {
        self.update_inner(instance, None)
    }

    /// Replace an existing row and bump a counter in the same commit.
    pub fn update_counting(&self, instance: &Instance, counter: Counter) -> Result<()> {
        self.update_inner(instance, Some(counter))
    }

    fn update_inner(&self, instance: &Instance, counter: Option<Counter>) -> Result<()> {
        let bytes = encode(instance)?;
        self.write(|txn| {
            let mut table = txn.open_table(INSTANCES).map_err(Error::database)?;
            let previous = table
                .insert(instance.id.as_str(), bytes.as_slice())
                .map_err(Error::database)?;
            if previous.is_none() {
                return Err(Error::InstanceNotFound(instance.id.clone()));
            }
            drop(previous);
            drop(table);
            match counter {
                Some(counter) => bump(txn, counter),
                None => Ok(()),
            }
        })
    }

    /// Remove a row. Returns whether it existed.
    pub fn remove(&self, id: &str) -> Result<bool> {
        self.write(|txn| {
            let mut table = txn.open_table(INSTANCES).map_err(Error::database)?;
            let removed = table.remove(id).map_err(Error::database)?;
            Ok(removed.is_some())
        })
    }

    /// Bump a counter on its own.
    pub fn increment(&self, counter: Counter) -> Result<()> {
        self.write(|txn| bump(txn, counter))
    }

    /// Current counter values.
    pub fn counters(&self) -> Result<UsageCounters> {
        let txn = self.db.begin_read().map_err(Error::database)?;
        let table = txn.open_table(COUNTERS).map_err(Error::database)?;
        let read = |counter: Counter| -> Result<u64> {
            Ok(table
                .get(counter.key())
                .map_err(Error::database)?
                .map(|g| g.value())
                .unwrap_or(0))
        };
        Ok(UsageCounters {
            instances_created: read(Counter::InstancesCreated)?,
            restarts: read(Counter::Restarts)?,
            image_downloads: read(Counter::ImageDownloads)?,
        })
    }
}

fn bump(txn: &WriteTransaction, counter: Counter) -> Result<()> {
    let mut table = txn.open_table(COUNTERS).map_err(Error::database)?;
    let current = table
        .get(counter.key())
        .map_err(Error::database)?
        .map(|g| g.value())
        .unwrap_or(0);
    table
        .insert(counter.key(), current + 1)
        .map_err(Error::database)?;
    Ok(())
}

fn encode(instance: &Instance) -> Result<Vec<u8>> {
    serde_json::to_vec(instance).map_err(|e| Error::Database(format!("encode instance: {e}")))
}

fn decode(bytes: &[u8]) -> Result<Instance> {
    serde_json::from_slice(bytes).map_err(|e| Error::Database(format!("decode instance: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::{ArtifactPaths, InstanceStatus};
    use chrono::{Duration, Utc};

    fn sample(id: &str, owner: &str) -> Instance {
        let paths = ArtifactPaths::new(Path::new("/srv/vms"), id);
        Instance {
            id: id.to_string(),
            owner_id: owner.to_string(),
            hostname: format!("vps-{owner}-000000"),
            username: "debian".into(),
            secret: "pw".into(),
            credential_generation: 0,
            ssh_port: 2222,
            memory_mb: 512,
            cpu_count: 1,
            disk_size: "10G".into(),
            os_type: "debian12".into(),
            disk_path: paths.disk,
            seed_path: paths.seed,
            status: InstanceStatus::Stopped,
            pid: None,
            created_at: Utc::now(),
            gui_mode: false,
            port_forwards: vec!["8080:80".into()],
        }
    }

    fn open_temp() -> (tempfile::TempDir, Registry) {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::open(&dir.path().join("registry.redb")).unwrap();
        (dir, registry)
    }

    #[test]
    fn test_insert_get_and_created_counter() {
        let (_dir, registry) = open_temp();
        let inst = sample("vps_00000000000000aa", "alice");
        registry.insert(&inst).unwrap();

        assert_eq!(registry.get(&inst.id).unwrap(), Some(inst.clone()));
        assert_eq!(registry.counters().unwrap().instances_created, 1);
    }

    #[test]
    fn test_insert_duplicate_is_rejected() {
        let (_dir, registry) = open_temp();
        let inst = sample("vps_00000000000000ab", "alice");
        registry.insert(&inst).unwrap();
        let err = registry.insert(&inst).unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }));
        assert_eq!(registry.counters().unwrap().instances_created, 1);
    }

    #[test]
    fn test_require_missing() {
        let (_dir, registry) = open_temp();
        let err = registry.require("vps_ffffffffffffffff").unwrap_err();
        assert!(matches!(err, Error::InstanceNotFound(_)));
    }

    #[test]
    fn test_list_by_owner_and_all_sentinel() {
        let (_dir, registry) = open_temp();
        let mut a = sample("vps_0000000000000001", "alice");
        let mut b = sample("vps_0000000000000002", "bob");
        let c = sample("vps_0000000000000003", "alice");
        a.created_at = Utc::now() - Duration::minutes(2);
        b.created_at = Utc::now() - Duration::minutes(1);
        for inst in [&c, &a, &b] {
            registry.insert(inst).unwrap();
        }

        let alice: Vec<_> = registry
            .list_by_owner("alice")
            .unwrap()
            .into_iter()
            .map(|i| i.id)
            .collect();
        assert_eq!(alice, vec![a.id.clone(), c.id.clone()]);

        let everyone = registry.list_by_owner(ALL_OWNERS).unwrap();
        assert_eq!(everyone.len(), 3);
        assert_eq!(everyone[0].id, a.id);
    }

    #[test]
    fn test_update_counting_is_atomic_with_status() {
        let (_dir, registry) = open_temp();
        let mut inst = sample("vps_00000000000000ac", "alice");
        registry.insert(&inst).unwrap();

        inst.mark_running(1234);
        registry.update_counting(&inst, Counter::Restarts).unwrap();

        let stored = registry.require(&inst.id).unwrap();
        assert_eq!(stored.status, InstanceStatus::Running);
        assert_eq!(stored.pid, Some(1234));
        assert_eq!(registry.counters().unwrap().restarts, 1);
    }

    #[test]
    fn test_update_missing_row_fails_without_counting() {
        let (_dir, registry) = open_temp();
        let inst = sample("vps_00000000000000ad", "alice");
        let err = registry
            .update_counting(&inst, Counter::Restarts)
            .unwrap_err();
        assert!(matches!(err, Error::InstanceNotFound(_)));
        assert_eq!(registry.counters().unwrap().restarts, 0);
        assert!(registry.get(&inst.id).unwrap().is_none());
    }

    #[test]
    fn test_remove() {
        let (_dir, registry) = open_temp();
        let inst = sample("vps_00000000000000ae", "alice");
        registry.insert(&inst).unwrap();
        assert!(registry.remove(&inst.id).unwrap());
        assert!(!registry.remove(&inst.id).unwrap());
        assert!(registry.get(&inst.id).unwrap().is_none());
    }

    #[test]
    fn test_rows_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.redb");
        let inst = sample("vps_00000000000000af", "carol");
        {
            let registry = Registry::open(&path).unwrap();
            registry.insert(&inst).unwrap();
            registry.increment(Counter::ImageDownloads).unwrap();
        }
        let registry = Registry::open(&path).unwrap();
        assert_eq!(registry.require(&inst.id).unwrap(), inst);
        let counters = registry.counters().unwrap();
        assert_eq!(counters.instances_created, 1);
        assert_eq!(counters.image_downloads, 1);
        assert_eq!(counters.restarts, 0);
    }
}
