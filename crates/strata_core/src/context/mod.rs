//! Unit-of-work contexts and the tier merge protocol.
//!
//! # Responsibility
//! - Track pending inserts/updates/deletes per context.
//! - Flush pending changes one tier up (parent graph, or the durable
//!   backend at master) with incoming-wins conflict resolution.
//! - Confine every state access to the context's own execution domain.
//!
//! # Invariants
//! - A context's pending set is cleared only after its tier save succeeded;
//!   after a failed cascade it reflects exactly what did not commit.
//! - Row versions use the durable tier's numbering at every tier: a pending
//!   change exposes `base + 1`, so a base captured at any tier stays valid
//!   at the tier that finally commits.
//! - Parent links are non-owning; dropping a context discards uncommitted
//!   changes without any implicit flush.
//! - Entities cross context boundaries only through `materialize`, as
//!   defensive value copies.

use crate::backend::{Backend, ChangeKind, ChangeSet, RowChange, SaveReport, StoredRow};
use crate::model::entity::{ContextId, Entity, EntityId};
use crate::model::schema::Schema;
use crate::query::fetch::FetchSpec;
use crate::store::{StoreError, StoreResult};
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::sync::mpsc::{channel, Receiver};
use std::sync::{Arc, Mutex, Weak};
use std::time::Instant;
use uuid::Uuid;

mod domain;

pub(crate) use domain::ExecutionDomain;

/// Position of a context inside the fixed three-tier hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Tier {
    Master,
    View,
    Temporary,
}

impl Tier {
    fn label(self) -> &'static str {
        match self {
            Self::Master => "master",
            Self::View => "view",
            Self::Temporary => "temporary",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingState {
    Inserted,
    Updated,
    Deleted,
}

/// One pending row at one tier.
///
/// `base_version` is the durable version this change was based on, `None`
/// for rows the durable tier has never seen. It is carried unchanged while
/// the change moves up, so the backend's optimistic check compares against
/// the version the original writer actually observed.
#[derive(Debug, Clone)]
struct PendingChange {
    state: PendingState,
    entity: Entity,
    base_version: Option<u64>,
}

impl PendingChange {
    /// The version children observe for this row.
    ///
    /// Derived as `base + 1`: the number the row will carry once the change
    /// lands cleanly at the durable tier. Keeping every tier in the durable
    /// tier's numbering is what makes a base captured at one tier valid at
    /// the tier that finally commits.
    fn version(&self) -> u64 {
        self.base_version.map_or(1, |base| base + 1)
    }
}

#[derive(Default)]
struct ContextState {
    pending: BTreeMap<Uuid, PendingChange>,
    /// Row versions observed at fetch/registration time.
    base_versions: BTreeMap<Uuid, u64>,
}

struct ContextInner {
    id: ContextId,
    tier: Tier,
    schema: Arc<Schema>,
    domain: ExecutionDomain,
    parent: Option<Weak<ContextInner>>,
    /// Present on master only; exclusively touched from master's domain.
    backend: Option<Mutex<Box<dyn Backend>>>,
    state: Mutex<ContextState>,
}

impl Drop for ContextInner {
    fn drop(&mut self) {
        if let Ok(state) = self.state.lock() {
            if !state.pending.is_empty() {
                debug!(
                    "event=context_drop module=context tier={} discarded_changes={}",
                    self.tier.label(),
                    state.pending.len()
                );
            }
        }
    }
}

/// Cloneable handle to one unit-of-work context.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

/// Completion handle for an asynchronous cascade save.
pub struct SaveTicket {
    receiver: Receiver<StoreResult<SaveReport>>,
}

impl SaveTicket {
    /// Blocks until the full cascade committed or failed.
    pub fn wait(self) -> StoreResult<SaveReport> {
        match self.receiver.recv() {
            Ok(result) => result,
            Err(_) => Err(StoreError::Domain(
                "save cascade dropped its completion channel".to_string(),
            )),
        }
    }
}

impl Context {
    pub(crate) fn new_master(
        schema: Arc<Schema>,
        backend: Box<dyn Backend>,
    ) -> StoreResult<Self> {
        Self::build(Tier::Master, schema, None, Some(backend))
    }

    pub(crate) fn new_child(tier: Tier, parent: &Context) -> StoreResult<Self> {
        Self::build(
            tier,
            Arc::clone(&parent.inner.schema),
            Some(Arc::downgrade(&parent.inner)),
            None,
        )
    }

    fn build(
        tier: Tier,
        schema: Arc<Schema>,
        parent: Option<Weak<ContextInner>>,
        backend: Option<Box<dyn Backend>>,
    ) -> StoreResult<Self> {
        let id = Uuid::new_v4();
        let domain = ExecutionDomain::spawn(tier.label())?;
        debug!(
            "event=context_create module=context tier={} context_id={id}",
            tier.label()
        );
        Ok(Self {
            inner: Arc::new(ContextInner {
                id,
                tier,
                schema,
                domain,
                parent,
                backend: backend.map(Mutex::new),
                state: Mutex::new(ContextState::default()),
            }),
        })
    }

    pub fn id(&self) -> ContextId {
        self.inner.id
    }

    pub(crate) fn tier_label(&self) -> &'static str {
        self.inner.tier.label()
    }

    /// Upgrades the non-owning parent link, if the parent is still alive.
    pub fn parent(&self) -> Option<Context> {
        self.inner
            .parent
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|inner| Context { inner })
    }

    // ---- perform -----------------------------------------------------------

    /// Runs `block` on this context's domain and blocks until it returns.
    pub fn perform_sync<T, F>(&self, block: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Context) -> T + Send + 'static,
    {
        let ctx = self.clone();
        self.inner.domain.run_sync(move || block(&ctx))
    }

    /// Schedules `block` on this context's domain and returns immediately.
    ///
    /// Blocks scheduled on the same context run in FIFO submission order.
    pub fn perform_async<F>(&self, block: F) -> StoreResult<()>
    where
        F: FnOnce(&Context) + Send + 'static,
    {
        let ctx = self.clone();
        self.inner.domain.run_async(move || block(&ctx))
    }

    fn on_domain<T, F>(&self, job: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&ContextInner) -> T + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        self.inner.domain.run_sync(move || job(&inner))
    }

    fn lock_state(inner: &ContextInner) -> StoreResult<std::sync::MutexGuard<'_, ContextState>> {
        inner
            .state
            .lock()
            .map_err(|_| StoreError::Domain("context state poisoned".to_string()))
    }

    // ---- mutations ---------------------------------------------------------

    /// Allocates a new entity with a temporary identifier and registers it
    /// as pending-insert. No backend I/O happens here.
    pub fn insert(&self, entity_name: &str) -> StoreResult<Entity> {
        if self.inner.schema.entity(entity_name).is_none() {
            return Err(StoreError::QueryCompile {
                entity: entity_name.to_string(),
                schema: self.inner.schema.name().to_string(),
            });
        }

        let entity = Entity::new(entity_name, EntityId::temporary(), self.id());
        let snapshot = entity.clone();
        self.on_domain(move |inner| -> StoreResult<()> {
            let mut state = Self::lock_state(inner)?;
            state.pending.insert(
                snapshot.id().uuid(),
                PendingChange {
                    state: PendingState::Inserted,
                    entity: snapshot,
                    base_version: None,
                },
            );
            Ok(())
        })??;
        Ok(entity)
    }

    /// Registers the entity snapshot as a pending change.
    ///
    /// An entity still pending-insert keeps that state with the refreshed
    /// payload; an entity pending-delete can no longer be updated.
    pub fn update(&self, entity: &Entity) -> StoreResult<()> {
        self.check_owned(entity)?;
        let snapshot = entity.clone();
        self.on_domain(move |inner| -> StoreResult<()> {
            let mut state = Self::lock_state(inner)?;
            let uuid = snapshot.id().uuid();
            let next = match state.pending.get(&uuid) {
                Some(change) if change.state == PendingState::Inserted => PendingChange {
                    state: PendingState::Inserted,
                    entity: snapshot,
                    base_version: None,
                },
                Some(change) if change.state == PendingState::Deleted => {
                    return Err(StoreError::EntityNotFound(snapshot.id()));
                }
                _ => PendingChange {
                    state: PendingState::Updated,
                    entity: snapshot,
                    base_version: state.base_versions.get(&uuid).copied(),
                },
            };
            state.pending.insert(uuid, next);
            Ok(())
        })?
    }

    /// Marks the entity as pending-delete.
    ///
    /// A pending-insert entity is simply forgotten, since no tier above has
    /// ever seen it.
    pub fn delete(&self, entity: &Entity) -> StoreResult<()> {
        self.check_owned(entity)?;
        let snapshot = entity.shell();
        self.on_domain(move |inner| -> StoreResult<()> {
            let mut state = Self::lock_state(inner)?;
            let uuid = snapshot.id().uuid();
            if matches!(
                state.pending.get(&uuid).map(|change| change.state),
                Some(PendingState::Inserted)
            ) {
                state.pending.remove(&uuid);
                return Ok(());
            }
            let base = state.base_versions.get(&uuid).copied();
            state.pending.insert(
                uuid,
                PendingChange {
                    state: PendingState::Deleted,
                    entity: snapshot,
                    base_version: base,
                },
            );
            Ok(())
        })?
    }

    fn check_owned(&self, entity: &Entity) -> StoreResult<()> {
        match entity.owner() {
            Some(owner) if owner == self.id() => Ok(()),
            _ => Err(StoreError::DetachedEntity(entity.id())),
        }
    }

    // ---- save --------------------------------------------------------------

    /// Flushes pending changes to the immediate tier above: the parent's
    /// in-memory graph, or the durable backend at master.
    ///
    /// Saving with nothing pending is a no-op. The pending set is cleared
    /// only on success, so a failed save can be retried without
    /// double-applying changes.
    pub fn save(&self) -> StoreResult<SaveReport> {
        let ctx = self.clone();
        self.on_domain(move |inner| -> StoreResult<SaveReport> {
            let (set, flushed): (ChangeSet, Vec<Uuid>) = {
                let state = Self::lock_state(inner)?;
                let mut set = ChangeSet::default();
                let mut flushed = Vec::with_capacity(state.pending.len());
                for (uuid, change) in &state.pending {
                    set.push(RowChange {
                        kind: match change.state {
                            PendingState::Inserted => ChangeKind::Insert,
                            PendingState::Updated => ChangeKind::Update,
                            PendingState::Deleted => ChangeKind::Delete,
                        },
                        entity: change.entity.clone(),
                        base_version: change.base_version,
                    });
                    flushed.push(*uuid);
                }
                (set, flushed)
            };

            if set.is_empty() {
                debug!(
                    "event=context_save module=context tier={} status=noop",
                    inner.tier.label()
                );
                return Ok(SaveReport::default());
            }

            let report = match &inner.backend {
                Some(backend) => {
                    let mut backend = backend
                        .lock()
                        .map_err(|_| StoreError::Domain("backend handle poisoned".to_string()))?;
                    backend.commit(&set)?
                }
                None => {
                    let parent = ctx.parent().ok_or(StoreError::StoreClosed)?;
                    parent.merge_from_child(set)?
                }
            };

            // Success: the flushed changes now live one tier up. Re-base on
            // the versions that tier assigned so a follow-up save does not
            // conflict with our own write.
            let mut state = Self::lock_state(inner)?;
            for uuid in flushed {
                state.pending.remove(&uuid);
                match report.versions().get(&uuid) {
                    Some(version) => {
                        state.base_versions.insert(uuid, *version);
                    }
                    None => {
                        state.base_versions.remove(&uuid);
                    }
                }
            }
            info!(
                "event=context_save module=context tier={} status=ok changes={} conflicts={}",
                inner.tier.label(),
                report.committed,
                report.conflicts.len()
            );
            Ok(report)
        })?
    }

    /// Absorbs a child's flushed changes into this tier's pending set.
    ///
    /// Runs on this context's domain; the child's domain blocks for the
    /// duration of the hop. Conflicts with changes another child already
    /// saved at this tier resolve as "incoming values win".
    fn merge_from_child(&self, set: ChangeSet) -> StoreResult<SaveReport> {
        self.on_domain(move |inner| -> StoreResult<SaveReport> {
            let mut state = Self::lock_state(inner)?;
            let mut report = SaveReport::default();

            for change in set.iter() {
                let uuid = change.entity.id().uuid();
                let existing = state.pending.get(&uuid);

                // The version this tier currently holds for the row: its
                // own pending change, or what it last observed from above.
                let current = existing
                    .map(PendingChange::version)
                    .or_else(|| state.base_versions.get(&uuid).copied());
                let conflicted = match (current, change.base_version) {
                    (Some(current), Some(base)) => current != base,
                    (Some(_), None) => change.kind == ChangeKind::Insert,
                    (None, _) => false,
                };
                if conflicted {
                    warn!(
                        "event=merge_conflict module=context tier={} uuid={uuid} resolution=incoming_wins",
                        inner.tier.label()
                    );
                }

                // The absorbed change keeps the base this tier already
                // holds (first writer, or this tier's own observation), so
                // the flush upward compares against the right version.
                let base_version = match existing {
                    Some(pending) => pending.base_version,
                    None => state
                        .base_versions
                        .get(&uuid)
                        .copied()
                        .or(change.base_version),
                };

                match change.kind {
                    ChangeKind::Insert | ChangeKind::Update => {
                        let still_inserted = matches!(
                            existing.map(|pending| pending.state),
                            Some(PendingState::Inserted)
                        ) || change.kind == ChangeKind::Insert && existing.is_none();
                        let entry = PendingChange {
                            state: if still_inserted {
                                PendingState::Inserted
                            } else {
                                PendingState::Updated
                            },
                            entity: change.entity.clone().with_owner(inner.id),
                            base_version,
                        };
                        let version = entry.version();
                        state.pending.insert(uuid, entry);
                        report.record(uuid, version, conflicted);
                    }
                    ChangeKind::Delete => {
                        if matches!(
                            existing.map(|pending| pending.state),
                            Some(PendingState::Inserted)
                        ) {
                            // The row never left this tier; cancel it.
                            state.pending.remove(&uuid);
                            report.record_delete(uuid, conflicted);
                            continue;
                        }
                        let entry = PendingChange {
                            state: PendingState::Deleted,
                            entity: change.entity.shell().with_owner(inner.id),
                            base_version,
                        };
                        let version = entry.version();
                        state.pending.insert(uuid, entry);
                        report.record(uuid, version, conflicted);
                    }
                }
            }

            Ok(report)
        })?
    }

    /// Saves this context and then each ancestor in turn, on the ancestor's
    /// own domain, up to the durable master tier.
    ///
    /// The first failing tier aborts the chain and is the single error the
    /// caller sees; tiers above it stay untouched. There is no mid-cascade
    /// cancellation, and no timeout: a hung backend call hangs the chain.
    pub fn save_cascade(&self) -> StoreResult<SaveReport> {
        let started_at = Instant::now();
        let mut aggregate = SaveReport::default();
        let mut current = Some(self.clone());
        while let Some(ctx) = current {
            let report = ctx.save().map_err(|err| {
                warn!(
                    "event=save_cascade module=context status=error tier={} error={err}",
                    ctx.tier_label()
                );
                err
            })?;
            aggregate.absorb(report);
            current = ctx.parent();
        }
        info!(
            "event=save_cascade module=context status=ok origin={} changes={} conflicts={} duration_ms={}",
            self.tier_label(),
            aggregate.committed,
            aggregate.conflicts.len(),
            started_at.elapsed().as_millis()
        );
        Ok(aggregate)
    }

    /// Cascade save that returns immediately with a completion ticket.
    pub fn save_cascade_async(&self) -> StoreResult<SaveTicket> {
        let (sender, receiver) = channel();
        let ctx = self.clone();
        self.inner.domain.run_async(move || {
            let _ = sender.send(ctx.save_cascade());
        })?;
        Ok(SaveTicket { receiver })
    }

    // ---- reads -------------------------------------------------------------

    /// Executes a fetch specification against this context's view of the
    /// data: everything visible one tier up, overlaid with this context's
    /// own pending changes.
    pub fn fetch(&self, spec: &FetchSpec) -> StoreResult<Vec<Entity>> {
        let request = spec.compile(&self.inner.schema)?;
        let rows = self.visible_rows(spec.entity_name())?;

        let entities: Vec<Entity> = rows.values().map(|row| row.entity.clone()).collect();
        let mut result = request.apply(entities);

        // Register observed versions so later updates carry a base for the
        // optimistic check, and hand out copies owned by this context.
        let versions: Vec<(Uuid, u64)> = result
            .iter()
            .filter_map(|entity| {
                let uuid = entity.id().uuid();
                rows.get(&uuid).map(|row| (uuid, row.version))
            })
            .collect();
        self.on_domain(move |inner| -> StoreResult<()> {
            let mut state = Self::lock_state(inner)?;
            for (uuid, version) in versions {
                state.base_versions.insert(uuid, version);
            }
            Ok(())
        })??;

        for entity in &mut result {
            *entity = entity.clone().with_owner(self.id());
        }
        Ok(result)
    }

    /// Number of rows a fetch specification would return, honoring its
    /// offset and limit.
    pub fn count(&self, spec: &FetchSpec) -> StoreResult<usize> {
        let request = spec.compile(&self.inner.schema)?;
        let rows = self.visible_rows(spec.entity_name())?;
        let entities: Vec<Entity> = rows.values().map(|row| row.entity.clone()).collect();
        Ok(request.apply(entities).len())
    }

    /// The rows visible at this tier: the parent's visible rows (or the
    /// backend's at master) overlaid with this context's pending set.
    fn visible_rows(&self, entity_name: &str) -> StoreResult<BTreeMap<Uuid, StoredRow>> {
        let ctx = self.clone();
        let entity_name = entity_name.to_string();
        self.on_domain(move |inner| -> StoreResult<BTreeMap<Uuid, StoredRow>> {
            let mut rows = match &inner.backend {
                Some(backend) => {
                    let backend = backend
                        .lock()
                        .map_err(|_| StoreError::Domain("backend handle poisoned".to_string()))?;
                    backend.rows(&entity_name)?
                }
                None => {
                    let parent = ctx.parent().ok_or(StoreError::StoreClosed)?;
                    parent.visible_rows(&entity_name)?
                }
            };

            let state = Self::lock_state(inner)?;
            for (uuid, change) in &state.pending {
                if change.entity.entity_name() != entity_name {
                    continue;
                }
                match change.state {
                    PendingState::Deleted => {
                        rows.remove(uuid);
                    }
                    PendingState::Inserted | PendingState::Updated => {
                        rows.insert(
                            *uuid,
                            StoredRow {
                                entity: change.entity.clone(),
                                version: change.version(),
                            },
                        );
                    }
                }
            }
            Ok(rows)
        })?
    }

    // ---- cross-context -----------------------------------------------------

    /// Resolves an entity owned by another context to this context's own
    /// copy of the same record.
    ///
    /// A still-temporary identifier is first promoted through the backend
    /// (a round trip to the master domain). Returns `EntityNotFound` when
    /// no visible record carries the identifier, for example after a
    /// concurrent delete.
    pub fn materialize(&self, entity: &Entity) -> StoreResult<Entity> {
        let mut id = entity.id();
        if !id.is_permanent() {
            let root = self.root();
            let entity_name = entity.entity_name().to_string();
            id = root.on_domain(move |inner| -> StoreResult<EntityId> {
                let mut backend = inner
                    .backend
                    .as_ref()
                    .ok_or(StoreError::StoreClosed)?
                    .lock()
                    .map_err(|_| StoreError::Domain("backend handle poisoned".to_string()))?;
                Ok(backend.assign_permanent(&entity_name, id)?)
            })??;
            debug!(
                "event=materialize module=context tier={} id={id} promoted=true",
                self.tier_label()
            );
        }

        let rows = self.visible_rows(entity.entity_name())?;
        let row = rows
            .get(&id.uuid())
            .ok_or(StoreError::EntityNotFound(id))?;

        let version = row.version;
        let uuid = id.uuid();
        self.on_domain(move |inner| -> StoreResult<()> {
            let mut state = Self::lock_state(inner)?;
            state.base_versions.insert(uuid, version);
            Ok(())
        })??;

        Ok(row.entity.clone().with_id(id).with_owner(self.id()))
    }

    fn root(&self) -> Context {
        let mut current = self.clone();
        while let Some(parent) = current.parent() {
            current = parent;
        }
        current
    }
}
