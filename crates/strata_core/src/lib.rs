//! Tiered persistence-context toolkit.
//!
//! `strata_core` provides an isolated unit-of-work abstraction over a
//! schema-described record store: a fixed three-tier context hierarchy
//! (master <- view <- temporary), a cascading save protocol that pushes
//! changes up to durable storage tier by tier, and a typed predicate /
//! fetch-specification builder for reads.

pub mod backend;
pub mod config;
pub mod context;
pub mod logging;
pub mod model;
pub mod query;
pub mod store;

pub use backend::{Backend, BackendError, SaveReport, StorageKind};
pub use config::{init_text_comparison, text_comparison_defaults};
pub use context::{Context, SaveTicket};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::entity::{ContextId, Entity, EntityId};
pub use model::schema::{
    EntityDescriptor, FieldDescriptor, FieldKind, Schema, SchemaBuilder, SchemaError,
};
pub use model::value::Value;
pub use query::fetch::{FetchSpec, SortKey};
pub use query::predicate::{CompareOp, Field, Predicate, TextOptions};
pub use query::Query;
pub use store::{Store, StoreError, StoreResult};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
