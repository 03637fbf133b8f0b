//! Entity identity and record snapshots.
//!
//! # Responsibility
//! - Provide stable entity identifiers with a temporary -> permanent
//!   lifecycle.
//! - Represent one entity as a detached, clonable value snapshot owned by
//!   exactly one context at a time.
//!
//! # Invariants
//! - The uuid inside an identifier never changes; promotion only flips the
//!   permanence flag.
//! - Identifier equality ignores permanence, so a promoted id still equals
//!   its temporary form.

use crate::model::value::Value;
use crate::query::predicate::Field;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Identifies one context instance inside a store.
pub type ContextId = Uuid;

/// Opaque entity identifier.
///
/// Starts temporary (valid only within the originating context tree) and
/// becomes permanent once the entity reaches durable storage or is promoted
/// explicitly during cross-context materialization.
#[derive(Debug, Clone, Copy)]
pub struct EntityId {
    uuid: Uuid,
    permanent: bool,
}

impl EntityId {
    pub(crate) fn temporary() -> Self {
        Self {
            uuid: Uuid::new_v4(),
            permanent: false,
        }
    }

    pub(crate) fn permanent(uuid: Uuid) -> Self {
        Self {
            uuid,
            permanent: true,
        }
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn is_permanent(&self) -> bool {
        self.permanent
    }

    pub(crate) fn promoted(self) -> Self {
        Self {
            permanent: true,
            ..self
        }
    }
}

impl PartialEq for EntityId {
    fn eq(&self, other: &Self) -> bool {
        self.uuid == other.uuid
    }
}

impl Eq for EntityId {}

impl std::hash::Hash for EntityId {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.uuid.hash(state);
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}",
            if self.permanent { "perm" } else { "temp" },
            self.uuid
        )
    }
}

/// A schema-described record snapshot.
///
/// Entities are plain values: mutating one has no effect until the snapshot
/// is handed back to its owning context via `Context::update`. Passing an
/// entity to a different context requires `Context::materialize`.
#[derive(Debug, Clone)]
pub struct Entity {
    id: EntityId,
    entity_name: String,
    values: BTreeMap<String, Value>,
    owner: Option<ContextId>,
}

impl Entity {
    pub(crate) fn new(entity_name: impl Into<String>, id: EntityId, owner: ContextId) -> Self {
        Self {
            id,
            entity_name: entity_name.into(),
            values: BTreeMap::new(),
            owner: Some(owner),
        }
    }

    pub(crate) fn detached(
        entity_name: impl Into<String>,
        id: EntityId,
        values: BTreeMap<String, Value>,
    ) -> Self {
        Self {
            id,
            entity_name: entity_name.into(),
            values,
            owner: None,
        }
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn entity_name(&self) -> &str {
        &self.entity_name
    }

    pub fn owner(&self) -> Option<ContextId> {
        self.owner
    }

    /// Returns the value of a field, `Value::Null` for unset fields.
    pub fn get(&self, field: &str) -> &Value {
        self.values.get(field).unwrap_or(&Value::Null)
    }

    /// Typed accessor through a static field token.
    pub fn get_field<T>(&self, field: &Field<T>) -> &Value {
        self.get(field.name())
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(field.into(), value.into());
    }

    /// Typed setter through a static field token.
    pub fn set_field<T: Into<Value>>(&mut self, field: &Field<T>, value: impl Into<Option<T>>) {
        let value = value.into().map_or(Value::Null, Into::into);
        self.values.insert(field.name().to_string(), value);
    }

    pub(crate) fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    pub(crate) fn with_owner(mut self, owner: ContextId) -> Self {
        self.owner = Some(owner);
        self
    }

    pub(crate) fn with_id(mut self, id: EntityId) -> Self {
        self.id = id;
        self
    }

    /// Id-only shell used for property-less fetches and bulk deletes.
    pub(crate) fn shell(&self) -> Self {
        Self {
            id: self.id,
            entity_name: self.entity_name.clone(),
            values: BTreeMap::new(),
            owner: self.owner,
        }
    }
}

/// Field-for-field equality: identity, entity name and values. Ownership and
/// id permanence are context-local bookkeeping and do not participate.
impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.entity_name == other.entity_name && self.values == other.values
    }
}

#[cfg(test)]
mod tests {
    use super::{Entity, EntityId};
    use crate::model::value::Value;
    use uuid::Uuid;

    #[test]
    fn promotion_keeps_identity_equal() {
        let id = EntityId::temporary();
        let promoted = id.promoted();
        assert!(!id.is_permanent());
        assert!(promoted.is_permanent());
        assert_eq!(id, promoted);
        assert_eq!(id.uuid(), promoted.uuid());
    }

    #[test]
    fn unset_fields_read_as_null() {
        let owner = Uuid::new_v4();
        let mut entity = Entity::new("Person", EntityId::temporary(), owner);
        assert!(entity.get("name").is_null());

        entity.set("name", "alice");
        assert_eq!(entity.get("name"), &Value::Text("alice".into()));
    }

    #[test]
    fn shell_keeps_identity_and_drops_values() {
        let owner = Uuid::new_v4();
        let mut entity = Entity::new("Person", EntityId::temporary(), owner);
        entity.set("name", "alice");

        let shell = entity.shell();
        assert_eq!(shell.id(), entity.id());
        assert!(shell.get("name").is_null());
    }
}
