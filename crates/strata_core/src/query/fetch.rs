//! Fetch specifications and their compiled form.
//!
//! # Responsibility
//! - Describe a read declaratively: filter, ordering, paging, batching,
//!   property inclusion.
//! - Compile the description against a schema into a backend-ready request.
//!
//! # Invariants
//! - Building methods never mutate in place; every call returns an
//!   independent value, so query variants can branch from a shared base.
//! - `filtered` ANDs with an existing predicate, `sorted` appends ordering;
//!   neither ever replaces what is already there.
//! - Ordering sequence is tie-break precedence: the first key is primary.

use crate::model::entity::Entity;
use crate::model::schema::{EntityDescriptor, Schema};
use crate::query::predicate::{Field, Predicate};
use crate::store::{StoreError, StoreResult};
use std::cmp::Ordering;

/// Default batch size hint, matching paged materialization defaults.
const DEFAULT_BATCH_SIZE: usize = 20;

/// One ordering criterion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub field: String,
    pub ascending: bool,
}

impl SortKey {
    pub fn ascending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            ascending: true,
        }
    }

    pub fn descending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            ascending: false,
        }
    }
}

impl<T> Field<T> {
    pub fn asc(&self) -> SortKey {
        SortKey::ascending(self.name())
    }

    pub fn desc(&self) -> SortKey {
        SortKey::descending(self.name())
    }
}

/// Declarative description of what to retrieve.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchSpec {
    entity_name: String,
    predicate: Option<Predicate>,
    ordering: Vec<SortKey>,
    offset: usize,
    limit: usize,
    batch_size: usize,
    include_property_values: bool,
}

impl FetchSpec {
    pub fn new(entity_name: impl Into<String>) -> Self {
        Self {
            entity_name: entity_name.into(),
            predicate: None,
            ordering: Vec::new(),
            offset: 0,
            limit: 0,
            batch_size: DEFAULT_BATCH_SIZE,
            include_property_values: true,
        }
    }

    pub fn entity_name(&self) -> &str {
        &self.entity_name
    }

    pub fn predicate(&self) -> Option<&Predicate> {
        self.predicate.as_ref()
    }

    pub fn ordering(&self) -> &[SortKey] {
        &self.ordering
    }

    /// ANDs `predicate` with any existing filter; never replaces it.
    pub fn filtered(&self, predicate: Predicate) -> Self {
        let mut copy = self.clone();
        copy.predicate = Some(match copy.predicate {
            Some(existing) => existing.and(predicate),
            None => predicate,
        });
        copy
    }

    /// Appends sort keys to the existing ordering.
    pub fn sorted(&self, keys: impl IntoIterator<Item = SortKey>) -> Self {
        let mut copy = self.clone();
        copy.ordering.extend(keys);
        copy
    }

    /// Clears the predicate only; ordering and paging are preserved.
    pub fn all(&self) -> Self {
        let mut copy = self.clone();
        copy.predicate = None;
        copy
    }

    /// Rows skipped before the first returned match.
    pub fn with_offset(&self, offset: usize) -> Self {
        let mut copy = self.clone();
        copy.offset = offset;
        copy
    }

    /// Maximum rows returned; 0 means unbounded.
    pub fn with_limit(&self, limit: usize) -> Self {
        let mut copy = self.clone();
        copy.limit = limit;
        copy
    }

    /// Paged-materialization hint; 0 disables batching.
    pub fn with_batch_size(&self, batch_size: usize) -> Self {
        let mut copy = self.clone();
        copy.batch_size = batch_size;
        copy
    }

    /// When false, fetches return id-only shells (used for bulk delete).
    pub fn with_property_values(&self, include: bool) -> Self {
        let mut copy = self.clone();
        copy.include_property_values = include;
        copy
    }

    /// Resolves the logical entity name against the schema.
    ///
    /// An unknown entity name is a contract violation between caller and
    /// schema, surfaced as [`StoreError::QueryCompile`].
    pub fn compile(&self, schema: &Schema) -> StoreResult<CompiledRequest> {
        let entity = schema
            .entity(&self.entity_name)
            .ok_or_else(|| StoreError::QueryCompile {
                entity: self.entity_name.clone(),
                schema: schema.name().to_string(),
            })?;

        // A batch hint larger than the limit can never pay off.
        let batch_size = if self.limit > 0 && self.batch_size > self.limit {
            0
        } else {
            self.batch_size
        };

        Ok(CompiledRequest {
            entity: entity.clone(),
            predicate: self.predicate.clone(),
            ordering: self.ordering.clone(),
            offset: self.offset,
            limit: self.limit,
            batch_size,
            include_property_values: self.include_property_values,
        })
    }
}

/// Backend-ready request: a fetch specification resolved against a schema
/// descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledRequest {
    entity: EntityDescriptor,
    predicate: Option<Predicate>,
    ordering: Vec<SortKey>,
    offset: usize,
    limit: usize,
    batch_size: usize,
    include_property_values: bool,
}

impl CompiledRequest {
    pub fn entity(&self) -> &EntityDescriptor {
        &self.entity
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn include_property_values(&self) -> bool {
        self.include_property_values
    }

    /// Applies filter, ordering and paging to a materialized row set.
    ///
    /// Shared by every backend and by in-memory tier overlays so the same
    /// request semantics hold at each level.
    pub fn apply(&self, mut rows: Vec<Entity>) -> Vec<Entity> {
        if let Some(predicate) = &self.predicate {
            rows.retain(|row| predicate.matches(row));
        }

        if !self.ordering.is_empty() {
            rows.sort_by(|a, b| self.order_rows(a, b));
        }

        let start = self.offset.min(rows.len());
        let end = if self.limit > 0 {
            (start + self.limit).min(rows.len())
        } else {
            rows.len()
        };
        let mut rows: Vec<Entity> = rows.drain(start..end).collect();

        if !self.include_property_values {
            rows = rows.iter().map(Entity::shell).collect();
        }
        rows
    }

    fn order_rows(&self, a: &Entity, b: &Entity) -> Ordering {
        for key in &self.ordering {
            let ordering = a.get(&key.field).sort_cmp(b.get(&key.field));
            let ordering = if key.ascending {
                ordering
            } else {
                ordering.reverse()
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }
}
