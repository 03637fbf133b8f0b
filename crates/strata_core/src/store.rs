//! Store façade and crate-level error type.
//!
//! # Responsibility
//! - Open a storage backend and stand up the fixed master <- view hierarchy
//!   over it.
//! - Expose the view context as the application-facing entry point, plus
//!   temporary-context spawning and block-based save helpers.
//!
//! # Invariants
//! - The master context is never handed out; all application work happens
//!   in the view tier or below.
//! - Opening is the only fallible setup step; a constructed store is ready
//!   for use.

use crate::backend::{
    BackendError, MemoryBackend, SaveReport, SqliteBackend, StorageKind,
};
use crate::context::{Context, SaveTicket, Tier};
use crate::model::entity::EntityId;
use crate::model::schema::{Schema, SchemaBuilder, SchemaError};
use crate::query::Query;
use log::info;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

pub type StoreResult<T> = Result<T, StoreError>;

/// Crate-level error.
#[derive(Debug)]
pub enum StoreError {
    /// The schema description itself is invalid.
    SchemaLoad(SchemaError),
    /// The backend could not be opened or attached.
    BackendAttach(BackendError),
    /// A backend operation failed after open.
    Backend(BackendError),
    /// A fetch specification referenced an entity the schema does not know.
    QueryCompile { entity: String, schema: String },
    /// No visible record carries the identifier.
    EntityNotFound(EntityId),
    /// The entity is not owned by the context it was handed to.
    DetachedEntity(EntityId),
    /// A concurrency-domain failure: spawn, submission or a dropped job.
    Domain(String),
    /// The tier above this context no longer exists.
    StoreClosed,
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SchemaLoad(err) => write!(f, "invalid schema: {err}"),
            Self::BackendAttach(err) => write!(f, "failed to open storage backend: {err}"),
            Self::Backend(err) => write!(f, "{err}"),
            Self::QueryCompile { entity, schema } => {
                write!(f, "entity `{entity}` is not part of schema `{schema}`")
            }
            Self::EntityNotFound(id) => write!(f, "no visible entity with id {id}"),
            Self::DetachedEntity(id) => {
                write!(f, "entity {id} is not owned by this context")
            }
            Self::Domain(message) => write!(f, "{message}"),
            Self::StoreClosed => write!(f, "parent context is gone; the store was closed"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::SchemaLoad(err) => Some(err),
            Self::BackendAttach(err) | Self::Backend(err) => Some(err),
            _ => None,
        }
    }
}

impl From<BackendError> for StoreError {
    fn from(value: BackendError) -> Self {
        Self::Backend(value)
    }
}

impl From<SchemaError> for StoreError {
    fn from(value: SchemaError) -> Self {
        Self::SchemaLoad(value)
    }
}

/// One opened store: a backend plus its master <- view context pair.
///
/// Cheap to clone; clones share the same hierarchy.
#[derive(Clone)]
pub struct Store {
    schema: Arc<Schema>,
    kind: StorageKind,
    // Keeps the master tier alive; children hold only weak parent links.
    master: Context,
    view: Context,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl Store {
    /// Validates the schema and opens durable disk storage at `path`.
    pub fn open(schema: SchemaBuilder, path: impl AsRef<Path>) -> StoreResult<Self> {
        let backend = SqliteBackend::open(path).map_err(StoreError::BackendAttach)?;
        Self::attach(schema, StorageKind::Disk, Box::new(backend))
    }

    /// Opens an ephemeral in-memory store, mostly for tests and scratch use.
    pub fn open_in_memory(schema: SchemaBuilder) -> StoreResult<Self> {
        Self::attach(
            schema,
            StorageKind::Memory,
            Box::new(MemoryBackend::default()),
        )
    }

    fn attach(
        schema: SchemaBuilder,
        kind: StorageKind,
        backend: Box<dyn crate::backend::Backend>,
    ) -> StoreResult<Self> {
        let started_at = Instant::now();
        let schema = Arc::new(schema.build()?);
        let master = Context::new_master(Arc::clone(&schema), backend)?;
        let view = Context::new_child(Tier::View, &master)?;
        info!(
            "event=store_open module=store status=ok kind={} schema={} entities={} duration_ms={}",
            kind.label(),
            schema.name(),
            schema.entity_names().count(),
            started_at.elapsed().as_millis()
        );
        Ok(Self {
            schema,
            kind,
            master,
            view,
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn kind(&self) -> StorageKind {
        self.kind
    }

    /// The shared main-tier context.
    pub fn view_context(&self) -> &Context {
        &self.view
    }

    /// Spawns an isolated scratch context below the view tier.
    ///
    /// Its changes become visible to the view tier only when it saves, and
    /// durable only after the cascade reaches master.
    pub fn new_temporary_context(&self) -> StoreResult<Context> {
        Context::new_child(Tier::Temporary, &self.view)
    }

    /// Query over the view context.
    pub fn query(&self, entity_name: impl Into<String>) -> Query {
        Query::new(&self.view, entity_name)
    }

    /// Runs `block` in a fresh temporary context, then cascades its changes
    /// down to durable storage. Blocks until the cascade finished.
    pub fn save_sync<F>(&self, block: F) -> StoreResult<SaveReport>
    where
        F: FnOnce(&Context) -> StoreResult<()> + Send + 'static,
    {
        let scratch = self.new_temporary_context()?;
        scratch.perform_sync(move |ctx| block(ctx))??;
        scratch.save_cascade()
    }

    /// Like [`Store::save_sync`] but returns immediately; the ticket resolves
    /// once the cascade finished.
    pub fn save_async<F>(&self, block: F) -> StoreResult<SaveTicket>
    where
        F: FnOnce(&Context) -> StoreResult<()> + Send + 'static,
    {
        let scratch = self.new_temporary_context()?;
        scratch.perform_sync(move |ctx| block(ctx))??;
        scratch.save_cascade_async()
    }

    /// Deletes every row of one entity and commits the deletion through to
    /// durable storage.
    pub fn clear_all(&self, entity_name: &str) -> StoreResult<usize> {
        let removed = self.query(entity_name).delete_all()?;
        self.view.save_cascade()?;
        info!("event=store_clear module=store status=ok entity={entity_name} removed={removed}");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::{Store, StoreError};
    use crate::backend::{
        Backend, BackendError, BackendResult, ChangeSet, MemoryBackend, SaveReport, StorageKind,
        StoredRow,
    };
    use crate::model::entity::EntityId;
    use crate::model::schema::{FieldDescriptor, Schema, SchemaBuilder};
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use uuid::Uuid;

    /// Memory backend whose next `fail_remaining` commits fail, so save
    /// failures at the durable tier can be observed from the outside.
    struct FlakyBackend {
        inner: MemoryBackend,
        fail_remaining: Arc<AtomicUsize>,
        commits: Arc<AtomicUsize>,
    }

    impl Backend for FlakyBackend {
        fn label(&self) -> &'static str {
            "flaky"
        }

        fn rows(&self, entity: &str) -> BackendResult<BTreeMap<Uuid, StoredRow>> {
            self.inner.rows(entity)
        }

        fn commit(&mut self, changes: &ChangeSet) -> BackendResult<SaveReport> {
            if self.fail_remaining.load(Ordering::SeqCst) > 0 {
                self.fail_remaining.fetch_sub(1, Ordering::SeqCst);
                return Err(BackendError::InvalidData("storage unavailable".to_string()));
            }
            let report = self.inner.commit(changes)?;
            self.commits.fetch_add(1, Ordering::SeqCst);
            Ok(report)
        }

        fn assign_permanent(&mut self, entity: &str, id: EntityId) -> BackendResult<EntityId> {
            self.inner.assign_permanent(entity, id)
        }
    }

    fn schema() -> SchemaBuilder {
        Schema::builder("TestDB").entity("Note", [FieldDescriptor::text("name")])
    }

    #[test]
    fn invalid_schema_is_rejected_at_open() {
        let error = Store::open_in_memory(
            Schema::builder("TestDB")
                .entity("Note", [FieldDescriptor::text("name")])
                .entity("Note", [FieldDescriptor::text("name")]),
        )
        .expect_err("duplicate entity must be rejected");
        assert!(matches!(error, StoreError::SchemaLoad(_)));
    }

    #[test]
    fn failed_tier_keeps_its_pending_set_for_retry() {
        let fail_remaining = Arc::new(AtomicUsize::new(1));
        let commits = Arc::new(AtomicUsize::new(0));
        let backend = FlakyBackend {
            inner: MemoryBackend::new(),
            fail_remaining: Arc::clone(&fail_remaining),
            commits: Arc::clone(&commits),
        };
        let store = Store::attach(schema(), StorageKind::Memory, Box::new(backend))
            .expect("store should open");

        let scratch = store.new_temporary_context().expect("context should spawn");
        let mut note = scratch.insert("Note").expect("insert should succeed");
        note.set("name", "survivor");
        scratch.update(&note).expect("update should succeed");

        // The in-memory tiers flush fine; the master commit to storage
        // fails and aborts the cascade.
        let error = scratch.save_cascade().expect_err("durable flush must fail");
        assert!(matches!(error, StoreError::Backend(_)));
        assert_eq!(commits.load(Ordering::SeqCst), 0);
        assert_eq!(fail_remaining.load(Ordering::SeqCst), 0);

        // The failed tier kept its pending change; it is still visible as
        // an overlay even though nothing is durable yet.
        assert_eq!(store.query("Note").count().expect("count should succeed"), 1);

        // The retry commits exactly what did not land, once.
        let report = scratch.save_cascade().expect("retry should succeed");
        assert_eq!(report.committed, 1);
        assert_eq!(commits.load(Ordering::SeqCst), 1);

        let again = scratch.save_cascade().expect("noop cascade should succeed");
        assert_eq!(again.committed, 0);
        assert_eq!(store.query("Note").count().expect("count should succeed"), 1);
    }
}
