//! State store: last-applied attribute snapshots
//!
//! The store is the diff baseline: one record per (kind, name), written
//! only after the external executor confirms a change was applied. The
//! planner reads snapshots and never writes.
//!
//! Commits hold a per-key advisory lock. Two in-flight commits touching
//! the same key are a caller error, reported as `ConcurrentModification`
//! for retry — last-writer-wins is explicitly not provided. Multi-key
//! batches take their locks in sorted (kind, name) order, so commits can
//! never deadlock.

use crate::error::StateError;
use crate::value::{AttrValue, ResourceId};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Last-applied snapshot for one resource instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    // Field order is TOML serialization order: non-table values first.
    /// When the executor confirmed the apply
    pub applied_at: DateTime<Utc>,

    /// Instances this one depended on at apply time; drives reverse
    /// topological ordering of deletions in later runs
    #[serde(default)]
    pub depends_on: Vec<ResourceId>,

    /// Attribute values as applied
    pub attributes: IndexMap<String, AttrValue>,
}

impl StateRecord {
    pub fn new(attributes: IndexMap<String, AttrValue>, depends_on: Vec<ResourceId>) -> Self {
        Self {
            attributes,
            depends_on,
            applied_at: Utc::now(),
        }
    }
}

/// In-memory view of the whole state: records keyed by (kind, name)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateSnapshot {
    resources: BTreeMap<ResourceId, StateRecord>,
}

impl StateSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &ResourceId) -> Option<&StateRecord> {
        self.resources.get(id)
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.resources.contains_key(id)
    }

    pub fn insert(&mut self, id: ResourceId, record: StateRecord) {
        self.resources.insert(id, record);
    }

    pub fn remove(&mut self, id: &ResourceId) -> Option<StateRecord> {
        self.resources.remove(id)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Records in sorted (kind, name) order
    pub fn iter(&self) -> impl Iterator<Item = (&ResourceId, &StateRecord)> {
        self.resources.iter()
    }

    pub fn ids(&self) -> impl Iterator<Item = &ResourceId> {
        self.resources.keys()
    }

    fn apply_batch(&mut self, batch: &[CommitEntry]) {
        for entry in batch {
            match &entry.record {
                Some(record) => {
                    self.resources.insert(entry.id.clone(), record.clone());
                }
                None => {
                    self.resources.remove(&entry.id);
                }
            }
        }
    }
}

/// One confirmed application result: a new record, or `None` to drop the
/// record after a confirmed delete
#[derive(Debug, Clone, PartialEq)]
pub struct CommitEntry {
    pub id: ResourceId,
    pub record: Option<StateRecord>,
}

impl CommitEntry {
    pub fn put(id: ResourceId, record: StateRecord) -> Self {
        Self {
            id,
            record: Some(record),
        }
    }

    pub fn delete(id: ResourceId) -> Self {
        Self { id, record: None }
    }
}

/// Key-value shaped persistence boundary for state snapshots
///
/// The concrete backend (file, database, remote) is a collaborator; the
/// engine only requires atomic per-key read/write plus the advisory
/// locking guarantee documented on [`commit`](Self::commit).
pub trait StateStore: Send + Sync {
    /// Read the full prior-state snapshot. Called at the start of every
    /// planning pass; never mutated mid-plan.
    fn load(&self) -> Result<StateSnapshot, StateError>;

    /// Persist a batch of confirmed results
    ///
    /// At most one in-flight commit per key: a batch touching a key
    /// already being committed fails with
    /// [`StateError::ConcurrentModification`] and should be retried.
    fn commit(&self, batch: &[CommitEntry]) -> Result<(), StateError>;
}

/// Advisory per-key commit locks
///
/// A single mutex guards the key set; conflicts are detected atomically
/// for a whole batch, and the sorted key order keeps multi-key behavior
/// deterministic.
#[derive(Debug, Default)]
struct LockTable {
    in_flight: Mutex<BTreeSet<ResourceId>>,
}

#[derive(Debug)]
struct LockGuard<'a> {
    table: &'a LockTable,
    keys: Vec<ResourceId>,
}

impl LockTable {
    /// Try to take every key; fails with the first conflicting key in
    /// sorted order without taking any.
    fn acquire(&self, keys: &[ResourceId]) -> Result<LockGuard<'_>, StateError> {
        let mut sorted: Vec<ResourceId> = keys.to_vec();
        sorted.sort();
        sorted.dedup();

        let mut in_flight = self.in_flight.lock().unwrap();
        for key in &sorted {
            if in_flight.contains(key) {
                return Err(StateError::ConcurrentModification { id: key.clone() });
            }
        }
        for key in &sorted {
            in_flight.insert(key.clone());
        }
        Ok(LockGuard {
            table: self,
            keys: sorted,
        })
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        let mut in_flight = self.table.in_flight.lock().unwrap();
        for key in &self.keys {
            in_flight.remove(key);
        }
    }
}

/// Volatile store for tests and executor harnesses
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    snapshot: Mutex<StateSnapshot>,
    locks: LockTable,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: StateSnapshot) -> Self {
        Self {
            snapshot: Mutex::new(snapshot),
            locks: LockTable::default(),
        }
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> Result<StateSnapshot, StateError> {
        Ok(self.snapshot.lock().unwrap().clone())
    }

    fn commit(&self, batch: &[CommitEntry]) -> Result<(), StateError> {
        let keys: Vec<ResourceId> = batch.iter().map(|e| e.id.clone()).collect();
        let _guard = self.locks.acquire(&keys)?;
        self.snapshot.lock().unwrap().apply_batch(batch);
        Ok(())
    }
}

/// TOML file backend
///
/// Records are keyed `kind.name` in the file. Writes go through a
/// temporary file in the same directory and an atomic rename, so a
/// crashed commit never leaves a half-written state file behind.
#[derive(Debug)]
pub struct FileStateStore {
    path: PathBuf,
    locks: LockTable,
}

#[derive(Serialize, Deserialize)]
struct StateFile {
    last_updated: DateTime<Utc>,
    #[serde(default)]
    resources: BTreeMap<String, StateRecord>,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            locks: LockTable::default(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_snapshot(&self) -> Result<StateSnapshot, StateError> {
        if !self.path.exists() {
            log::debug!("state file {} does not exist, starting empty", self.path.display());
            return Ok(StateSnapshot::default());
        }

        let content = std::fs::read_to_string(&self.path)?;
        let file: StateFile = toml::from_str(&content)?;

        let mut snapshot = StateSnapshot::default();
        for (key, record) in file.resources {
            let Some(id) = ResourceId::parse(&key) else {
                return Err(StateError::Corrupt { key });
            };
            snapshot.insert(id, record);
        }
        log::debug!(
            "loaded {} state record(s) from {}",
            snapshot.len(),
            self.path.display()
        );
        Ok(snapshot)
    }

    fn write_snapshot(&self, snapshot: &StateSnapshot) -> Result<(), StateError> {
        let file = StateFile {
            resources: snapshot
                .iter()
                .map(|(id, record)| (id.to_string(), record.clone()))
                .collect(),
            last_updated: Utc::now(),
        };
        let content = toml::to_string_pretty(&file)?;

        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;
        let tmp = tempfile::NamedTempFile::new_in(dir)?;
        std::fs::write(tmp.path(), content)?;
        tmp.persist(&self.path).map_err(|e| StateError::Io(e.error))?;

        log::debug!("wrote {} state record(s) to {}", snapshot.len(), self.path.display());
        Ok(())
    }
}

impl StateStore for FileStateStore {
    fn load(&self) -> Result<StateSnapshot, StateError> {
        self.read_snapshot()
    }

    fn commit(&self, batch: &[CommitEntry]) -> Result<(), StateError> {
        let keys: Vec<ResourceId> = batch.iter().map(|e| e.id.clone()).collect();
        let _guard = self.locks.acquire(&keys)?;

        let mut snapshot = self.read_snapshot()?;
        snapshot.apply_batch(batch);
        self.write_snapshot(&snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(value: i64) -> StateRecord {
        StateRecord::new(
            IndexMap::from([("size".to_string(), AttrValue::Int(value))]),
            Vec::new(),
        )
    }

    #[test]
    fn memory_store_round_trips_commits() {
        let store = MemoryStateStore::new();
        let id = ResourceId::new("db_cluster", "main");
        store
            .commit(&[CommitEntry::put(id.clone(), record(1))])
            .unwrap();

        let snapshot = store.load().unwrap();
        assert_eq!(
            snapshot.get(&id).unwrap().attributes.get("size"),
            Some(&AttrValue::Int(1))
        );

        store.commit(&[CommitEntry::delete(id.clone())]).unwrap();
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn lock_table_rejects_overlapping_batches() {
        let table = LockTable::default();
        let a = ResourceId::new("db_cluster", "a");
        let b = ResourceId::new("db_cluster", "b");

        let guard = table.acquire(&[a.clone(), b.clone()]).unwrap();
        let err = table.acquire(&[b.clone()]).unwrap_err();
        assert!(matches!(
            err,
            StateError::ConcurrentModification { id } if id == b
        ));

        drop(guard);
        // Released on drop, including error paths.
        table.acquire(&[a, b]).unwrap();
    }

    #[test]
    fn failed_acquire_takes_no_locks() {
        let table = LockTable::default();
        let a = ResourceId::new("db_cluster", "a");
        let b = ResourceId::new("db_cluster", "b");

        let guard = table.acquire(&[b.clone()]).unwrap();
        // a sorts before b, but the conflict on b must not leave a held
        assert!(table.acquire(&[a.clone(), b.clone()]).is_err());
        drop(guard);
        table.acquire(&[a]).unwrap();
        table.acquire(&[b]).unwrap();
    }

    #[test]
    fn file_store_starts_empty_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path().join("state.toml"));
        assert!(store.load().unwrap().is_empty());

        let id = ResourceId::new("instance", "web");
        let mut rec = record(2);
        rec.depends_on = vec![ResourceId::new("net", "main")];
        store.commit(&[CommitEntry::put(id.clone(), rec)]).unwrap();

        // Fresh store on the same path sees the committed record.
        let reopened = FileStateStore::new(dir.path().join("state.toml"));
        let snapshot = reopened.load().unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(
            snapshot.get(&id).unwrap().depends_on,
            vec![ResourceId::new("net", "main")]
        );
    }

    #[test]
    fn corrupt_state_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.toml");
        std::fs::write(&path, "not [valid").unwrap();
        let err = FileStateStore::new(&path).load().unwrap_err();
        assert!(matches!(err, StateError::Parse(_)));
    }
}
