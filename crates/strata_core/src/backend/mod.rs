//! Storage backend contract and change-set types.
//!
//! # Responsibility
//! - Define the seam between the context hierarchy and durable storage.
//! - Carry pending changes as explicit value sets with optimistic-check
//!   base versions.
//!
//! # Invariants
//! - The backend handle is exclusively owned by the store and only touched
//!   from the master context's concurrency domain.
//! - Conflicts never fail a commit: the fixed merge policy is "incoming
//!   property values win", and conflicts are reported, not raised.

use crate::model::entity::{Entity, EntityId};
use crate::query::fetch::CompiledRequest;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

mod memory;
mod sqlite;

pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;

/// Storage flavor selected at store open time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    /// SQLite file storage; survives process restarts.
    Disk,
    /// In-memory storage for ephemeral and test use.
    Memory,
}

impl StorageKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Disk => "disk",
            Self::Memory => "memory",
        }
    }
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Backend-layer error.
#[derive(Debug)]
pub enum BackendError {
    Sqlite(rusqlite::Error),
    Payload(serde_json::Error),
    InvalidData(String),
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
}

impl Display for BackendError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::Payload(err) => write!(f, "invalid row payload: {err}"),
            Self::InvalidData(message) => write!(f, "invalid persisted row data: {message}"),
            Self::UnsupportedSchemaVersion {
                db_version,
                latest_supported,
            } => write!(
                f,
                "storage schema version {db_version} is newer than supported {latest_supported}"
            ),
        }
    }
}

impl Error for BackendError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::Payload(err) => Some(err),
            Self::InvalidData(_) => None,
            Self::UnsupportedSchemaVersion { .. } => None,
        }
    }
}

impl From<rusqlite::Error> for BackendError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(value: serde_json::Error) -> Self {
        Self::Payload(value)
    }
}

/// One stored row: an entity snapshot plus its optimistic version counter.
#[derive(Debug, Clone)]
pub struct StoredRow {
    pub entity: Entity,
    pub version: u64,
}

/// What happened to one row inside a pending-change set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// One row mutation with the version it was based on.
///
/// `base_version` is `None` when the originating context never observed a
/// committed version, which skips the optimistic check for that row.
#[derive(Debug, Clone)]
pub struct RowChange {
    pub kind: ChangeKind,
    pub entity: Entity,
    pub base_version: Option<u64>,
}

/// Ordered set of row mutations flushed by one context save.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    changes: Vec<RowChange>,
}

impl ChangeSet {
    pub fn push(&mut self, change: RowChange) {
        self.changes.push(change);
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RowChange> {
        self.changes.iter()
    }
}

/// Outcome of one save at one tier.
///
/// Conflicts listed here were already resolved by the incoming-wins policy;
/// they are informational, never fatal.
#[derive(Debug, Clone, Default)]
pub struct SaveReport {
    pub committed: usize,
    pub conflicts: Vec<Uuid>,
    versions: BTreeMap<Uuid, u64>,
}

impl SaveReport {
    pub(crate) fn record(&mut self, uuid: Uuid, version: u64, conflicted: bool) {
        self.committed += 1;
        self.versions.insert(uuid, version);
        if conflicted {
            self.conflicts.push(uuid);
        }
    }

    pub(crate) fn record_delete(&mut self, uuid: Uuid, conflicted: bool) {
        self.committed += 1;
        self.versions.remove(&uuid);
        if conflicted {
            self.conflicts.push(uuid);
        }
    }

    /// Version each row ended up with at the committing tier.
    pub(crate) fn versions(&self) -> &BTreeMap<Uuid, u64> {
        &self.versions
    }

    /// Folds a later tier's report into an aggregate cascade report.
    pub(crate) fn absorb(&mut self, other: SaveReport) {
        self.committed += other.committed;
        self.conflicts.extend(other.conflicts);
    }
}

/// Raw storage primitives behind the master context.
///
/// Implementations only store and version rows; filtering, ordering and
/// paging semantics live in [`CompiledRequest::apply`] so that every tier
/// interprets a request identically.
pub trait Backend: Send {
    fn label(&self) -> &'static str;

    /// All rows of one entity, keyed by uuid.
    fn rows(&self, entity: &str) -> BackendResult<BTreeMap<Uuid, StoredRow>>;

    /// Fetch primitive keyed by a compiled request.
    fn fetch(&self, request: &CompiledRequest) -> BackendResult<Vec<Entity>> {
        let rows = self.rows(request.entity().name())?;
        Ok(request.apply(rows.into_values().map(|row| row.entity).collect()))
    }

    /// Count primitive keyed by a compiled request.
    fn count(&self, request: &CompiledRequest) -> BackendResult<usize> {
        Ok(self.fetch(request)?.len())
    }

    /// Applies one change set atomically with optimistic version checks.
    fn commit(&mut self, changes: &ChangeSet) -> BackendResult<SaveReport>;

    /// Promotes a temporary identifier; the uuid is preserved.
    fn assign_permanent(&mut self, entity: &str, id: EntityId) -> BackendResult<EntityId>;
}

/// Shared commit bookkeeping for a map-shaped row table.
///
/// Used by the memory backend directly and by the sqlite backend after it
/// has materialized the affected rows.
pub(crate) fn apply_change(
    table: &mut BTreeMap<Uuid, StoredRow>,
    change: &RowChange,
    report: &mut SaveReport,
) {
    let uuid = change.entity.id().uuid();
    match change.kind {
        ChangeKind::Insert | ChangeKind::Update => {
            let existing = table.get(&uuid).map(|row| row.version);
            let conflicted = match (existing, change.base_version) {
                (Some(stored), Some(base)) => stored != base,
                (Some(_), None) => change.kind == ChangeKind::Insert,
                (None, _) => false,
            };
            let version = existing.map_or(1, |stored| stored + 1);
            let entity = change.entity.clone().with_id(change.entity.id().promoted());
            table.insert(uuid, StoredRow { entity, version });
            report.record(uuid, version, conflicted);
        }
        ChangeKind::Delete => {
            let conflicted = matches!(
                (table.get(&uuid).map(|row| row.version), change.base_version),
                (Some(stored), Some(base)) if stored != base
            );
            table.remove(&uuid);
            report.record_delete(uuid, conflicted);
        }
    }
}
