//! In-memory storage backend.
//!
//! # Responsibility
//! - Hold versioned rows in process memory for ephemeral and test stores.
//!
//! # Invariants
//! - Commit cannot fail partially: applying a single row change is
//!   infallible, so the whole set always lands.

use super::{apply_change, Backend, BackendResult, ChangeSet, SaveReport, StoredRow};
use crate::model::entity::EntityId;
use log::debug;
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Default)]
pub struct MemoryBackend {
    tables: BTreeMap<String, BTreeMap<Uuid, StoredRow>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Backend for MemoryBackend {
    fn label(&self) -> &'static str {
        "memory"
    }

    fn rows(&self, entity: &str) -> BackendResult<BTreeMap<Uuid, StoredRow>> {
        Ok(self.tables.get(entity).cloned().unwrap_or_default())
    }

    fn commit(&mut self, changes: &ChangeSet) -> BackendResult<SaveReport> {
        let mut report = SaveReport::default();
        for change in changes.iter() {
            let table = self
                .tables
                .entry(change.entity.entity_name().to_string())
                .or_default();
            apply_change(table, change, &mut report);
        }
        debug!(
            "event=backend_commit module=backend status=ok kind=memory changes={} conflicts={}",
            report.committed,
            report.conflicts.len()
        );
        Ok(report)
    }

    fn assign_permanent(&mut self, _entity: &str, id: EntityId) -> BackendResult<EntityId> {
        Ok(id.promoted())
    }
}
