//! Declarative read and bulk-mutation API.
//!
//! # Responsibility
//! - Pair a fetch specification with the context it will run against.
//! - Provide the convenience operations built on top of fetch: first/last,
//!   find-by, find-or-create, bulk delete.
//!
//! # Invariants
//! - A query is a plain value; building never touches the context.
//! - Every read goes through `Context::fetch`, so queries observe exactly
//!   the tier-overlaid state the context itself would.

use crate::context::Context;
use crate::model::entity::Entity;
use crate::model::value::Value;
use crate::store::StoreResult;

pub mod fetch;
pub mod predicate;

use fetch::{FetchSpec, SortKey};
use predicate::{Field, Predicate};

/// A fetch specification bound to one context.
///
/// Building methods return independent values, mirroring [`FetchSpec`]:
/// a base query can branch into narrowed variants without interference.
#[derive(Clone)]
pub struct Query {
    context: Context,
    spec: FetchSpec,
}

impl Query {
    pub fn new(context: &Context, entity_name: impl Into<String>) -> Self {
        Self {
            context: context.clone(),
            spec: FetchSpec::new(entity_name),
        }
    }

    pub fn spec(&self) -> &FetchSpec {
        &self.spec
    }

    fn with_spec(&self, spec: FetchSpec) -> Self {
        Self {
            context: self.context.clone(),
            spec,
        }
    }

    /// ANDs `predicate` with the current filter.
    pub fn filtered(&self, predicate: Predicate) -> Self {
        self.with_spec(self.spec.filtered(predicate))
    }

    /// Alias for [`Query::filtered`], reading better in chained call sites.
    pub fn where_(&self, predicate: Predicate) -> Self {
        self.filtered(predicate)
    }

    /// Appends ordering keys; earlier keys take precedence.
    pub fn order_by(&self, keys: impl IntoIterator<Item = SortKey>) -> Self {
        self.with_spec(self.spec.sorted(keys))
    }

    /// Drops the filter, keeping ordering and paging.
    pub fn all(&self) -> Self {
        self.with_spec(self.spec.all())
    }

    pub fn with_offset(&self, offset: usize) -> Self {
        self.with_spec(self.spec.with_offset(offset))
    }

    pub fn with_limit(&self, limit: usize) -> Self {
        self.with_spec(self.spec.with_limit(limit))
    }

    pub fn with_batch_size(&self, batch_size: usize) -> Self {
        self.with_spec(self.spec.with_batch_size(batch_size))
    }

    // ---- reads -------------------------------------------------------------

    /// Runs the query and returns the matching entities.
    pub fn execute(&self) -> StoreResult<Vec<Entity>> {
        self.context.fetch(&self.spec)
    }

    /// Runs the query on the context's domain and hands the result to
    /// `completion` there.
    pub fn execute_async<F>(&self, completion: F) -> StoreResult<()>
    where
        F: FnOnce(StoreResult<Vec<Entity>>) + Send + 'static,
    {
        let spec = self.spec.clone();
        self.context
            .perform_async(move |ctx| completion(ctx.fetch(&spec)))
    }

    /// Number of matching rows, honoring offset and limit.
    pub fn count(&self) -> StoreResult<usize> {
        self.context.count(&self.spec)
    }

    /// First match under the current ordering.
    pub fn first(&self) -> StoreResult<Option<Entity>> {
        let rows = self.with_spec(self.spec.with_limit(1)).execute()?;
        Ok(rows.into_iter().next())
    }

    /// Last match of the query as executed: the final row of the
    /// offset/limit window under the current ordering, so it always agrees
    /// with the tail of [`Query::execute`].
    pub fn last(&self) -> StoreResult<Option<Entity>> {
        let rows = self.execute()?;
        Ok(rows.into_iter().last())
    }

    /// Single match by field equality.
    pub fn find_by<T: Into<Value>>(
        &self,
        field: Field<T>,
        value: impl Into<Option<T>>,
    ) -> StoreResult<Option<Entity>> {
        self.filtered(field.equals(value)).first()
    }

    // ---- mutations ---------------------------------------------------------

    /// Registers a fresh pending-insert entity in the bound context.
    pub fn create(&self) -> StoreResult<Entity> {
        self.context.insert(self.spec.entity_name())
    }

    /// First match of `predicate`, or a fresh pending-insert entity when
    /// nothing matches. The caller fills in the distinguishing fields.
    pub fn find_or_create(&self, predicate: Predicate) -> StoreResult<Entity> {
        match self.filtered(predicate).first()? {
            Some(found) => Ok(found),
            None => self.create(),
        }
    }

    /// Deletes every entity matching the current filter; returns how many.
    ///
    /// Deletions are pending like any other change and only take effect on
    /// save.
    pub fn delete_matching(&self, predicate: Predicate) -> StoreResult<usize> {
        self.filtered(predicate).delete_all()
    }

    /// Deletes every match of the query as it stands.
    pub fn delete_all(&self) -> StoreResult<usize> {
        // Shells suffice; delete only needs identity.
        let rows = self
            .with_spec(self.spec.with_property_values(false))
            .execute()?;
        let count = rows.len();
        for row in &rows {
            self.context.delete(row)?;
        }
        Ok(count)
    }
}
