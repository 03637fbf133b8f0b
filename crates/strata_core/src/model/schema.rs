//! Schema descriptors for the record model.
//!
//! # Responsibility
//! - Describe which entities exist and which fields each entity carries.
//! - Validate descriptor sets once, at store construction time.
//!
//! # Invariants
//! - A schema is read-only after construction and safe to share across
//!   concurrency domains without locking.
//! - Entity and field names are unique within their scope.

use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Storable field type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Integer,
    Real,
    Text,
    Bool,
}

/// Describes one field of an entity. All fields are nullable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: String,
    pub kind: FieldKind,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Integer)
    }

    pub fn real(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Real)
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Text)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Bool)
    }
}

/// Describes one entity: a named record shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDescriptor {
    name: String,
    fields: Vec<FieldDescriptor>,
}

impl EntityDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|field| field.name == name)
    }
}

/// Validation error raised while building a schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    EmptySchemaName,
    EmptyEntityName,
    DuplicateEntity(String),
    DuplicateField { entity: String, field: String },
}

impl Display for SchemaError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptySchemaName => write!(f, "schema name cannot be empty"),
            Self::EmptyEntityName => write!(f, "entity name cannot be empty"),
            Self::DuplicateEntity(name) => write!(f, "duplicate entity `{name}` in schema"),
            Self::DuplicateField { entity, field } => {
                write!(f, "duplicate field `{field}` in entity `{entity}`")
            }
        }
    }
}

impl Error for SchemaError {}

/// Immutable set of entity descriptors for one opened store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    name: String,
    entities: BTreeMap<String, EntityDescriptor>,
}

impl Schema {
    pub fn builder(name: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder {
            name: name.into(),
            entities: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Looks up an entity descriptor by logical name.
    pub fn entity(&self, name: &str) -> Option<&EntityDescriptor> {
        self.entities.get(name)
    }

    pub fn entity_names(&self) -> impl Iterator<Item = &str> {
        self.entities.keys().map(String::as_str)
    }
}

/// Collects entity descriptors and validates them into a [`Schema`].
pub struct SchemaBuilder {
    name: String,
    entities: Vec<EntityDescriptor>,
}

impl SchemaBuilder {
    pub fn entity(
        mut self,
        name: impl Into<String>,
        fields: impl IntoIterator<Item = FieldDescriptor>,
    ) -> Self {
        self.entities.push(EntityDescriptor {
            name: name.into(),
            fields: fields.into_iter().collect(),
        });
        self
    }

    pub fn build(self) -> Result<Schema, SchemaError> {
        if self.name.trim().is_empty() {
            return Err(SchemaError::EmptySchemaName);
        }

        let mut entities = BTreeMap::new();
        for descriptor in self.entities {
            if descriptor.name.trim().is_empty() {
                return Err(SchemaError::EmptyEntityName);
            }
            let mut seen = Vec::with_capacity(descriptor.fields.len());
            for field in &descriptor.fields {
                if seen.contains(&field.name.as_str()) {
                    return Err(SchemaError::DuplicateField {
                        entity: descriptor.name.clone(),
                        field: field.name.clone(),
                    });
                }
                seen.push(field.name.as_str());
            }
            let entity_name = descriptor.name.clone();
            if entities.insert(entity_name.clone(), descriptor).is_some() {
                return Err(SchemaError::DuplicateEntity(entity_name));
            }
        }

        Ok(Schema {
            name: self.name,
            entities,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{FieldDescriptor, Schema, SchemaError};

    #[test]
    fn builder_collects_entities_and_fields() {
        let schema = Schema::builder("TestDB")
            .entity(
                "Person",
                [
                    FieldDescriptor::integer("id"),
                    FieldDescriptor::text("name"),
                ],
            )
            .build()
            .expect("schema should build");

        let person = schema.entity("Person").expect("entity should exist");
        assert_eq!(person.name(), "Person");
        assert!(person.field("name").is_some());
        assert!(person.field("missing").is_none());
        assert!(schema.entity("Ghost").is_none());
    }

    #[test]
    fn duplicate_entity_is_rejected() {
        let error = Schema::builder("TestDB")
            .entity("Person", [FieldDescriptor::integer("id")])
            .entity("Person", [FieldDescriptor::integer("id")])
            .build()
            .expect_err("duplicate entity must be rejected");
        assert!(matches!(error, SchemaError::DuplicateEntity(_)));
    }

    #[test]
    fn duplicate_field_is_rejected() {
        let error = Schema::builder("TestDB")
            .entity(
                "Person",
                [
                    FieldDescriptor::integer("id"),
                    FieldDescriptor::text("id"),
                ],
            )
            .build()
            .expect_err("duplicate field must be rejected");
        assert!(matches!(error, SchemaError::DuplicateField { .. }));
    }
}
