//! Typed predicate builder.
//!
//! # Responsibility
//! - Build comparison and conjunction trees over typed entity fields.
//! - Evaluate predicates against entity snapshots with SQL-style
//!   three-valued null semantics.
//!
//! # Invariants
//! - Building is pure and infallible; equal inputs produce structurally
//!   equal trees.
//! - Text sensitivity options are captured at build time and applied only
//!   to text operands.
//! - `and` is order-preserving: the left operand precedes the right in the
//!   rendered expression.

use crate::config;
use crate::model::entity::Entity;
use crate::model::value::Value;
use std::cmp::Ordering;
use std::fmt::{Display, Formatter};
use std::marker::PhantomData;

/// Comparison operator for field predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl CompareOp {
    fn symbol(self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Eq => "==",
            Self::Ne => "!=",
        }
    }

    fn admits(self, ordering: Ordering) -> bool {
        match self {
            Self::Lt => ordering == Ordering::Less,
            Self::Le => ordering != Ordering::Greater,
            Self::Gt => ordering == Ordering::Greater,
            Self::Ge => ordering != Ordering::Less,
            Self::Eq => ordering == Ordering::Equal,
            Self::Ne => ordering != Ordering::Equal,
        }
    }
}

/// Case/diacritic sensitivity for text comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextOptions {
    pub case_insensitive: bool,
    pub diacritic_insensitive: bool,
}

impl TextOptions {
    /// Both folds enabled (the process-wide default).
    pub fn insensitive() -> Self {
        Self {
            case_insensitive: true,
            diacritic_insensitive: true,
        }
    }

    /// Byte-exact comparison, also used for all non-text operands.
    pub fn exact() -> Self {
        Self {
            case_insensitive: false,
            diacritic_insensitive: false,
        }
    }
}

/// Immutable predicate expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Compare {
        field: String,
        op: CompareOp,
        value: Value,
        text: TextOptions,
    },
    And(Box<Predicate>, Box<Predicate>),
}

impl Predicate {
    /// Builds a comparison, capturing the process-wide text defaults when
    /// the operand is text.
    pub fn compare(field: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        let value = value.into();
        let text = if value.is_text() {
            config::text_comparison_defaults()
        } else {
            TextOptions::exact()
        };
        Self::Compare {
            field: field.into(),
            op,
            value,
            text,
        }
    }

    /// Builds a comparison with explicit text sensitivity, overriding the
    /// process-wide defaults. Ignored for non-text operands at evaluation.
    pub fn compare_with(
        field: impl Into<String>,
        op: CompareOp,
        value: impl Into<Value>,
        text: TextOptions,
    ) -> Self {
        Self::Compare {
            field: field.into(),
            op,
            value: value.into(),
            text,
        }
    }

    /// Conjunction; `self` is the left operand.
    pub fn and(self, other: Predicate) -> Self {
        Self::And(Box::new(self), Box::new(other))
    }

    /// Evaluates the predicate against one entity snapshot.
    ///
    /// Null semantics: `== null` is an is-null test, `!= null` is an
    /// is-not-null test; every other comparison involving a null operand is
    /// unknown and therefore not satisfied.
    pub fn matches(&self, entity: &Entity) -> bool {
        match self {
            Self::And(left, right) => left.matches(entity) && right.matches(entity),
            Self::Compare {
                field,
                op,
                value,
                text,
            } => {
                let actual = entity.get(field);
                if value.is_null() {
                    return match op {
                        CompareOp::Eq => actual.is_null(),
                        CompareOp::Ne => !actual.is_null(),
                        _ => false,
                    };
                }
                match actual.compare(value, *text) {
                    Some(ordering) => op.admits(ordering),
                    None => false,
                }
            }
        }
    }
}

impl Display for Predicate {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Compare {
                field, op, value, ..
            } => write!(f, "{field} {} {value}", op.symbol()),
            Self::And(left, right) => write!(f, "({left} AND {right})"),
        }
    }
}

/// Static typed field token.
///
/// Declared once per entity field, usually as a `const`:
///
/// ```
/// use strata_core::Field;
/// const ID: Field<i64> = Field::new("id");
/// let predicate = ID.lt(4);
/// ```
pub struct Field<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Field<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for Field<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Field<T> {}

impl<T: Into<Value>> Field<T> {
    /// Generic comparison; `None` compares against null.
    pub fn compare(&self, op: CompareOp, value: impl Into<Option<T>>) -> Predicate {
        Predicate::compare(self.name, op, Value::from(value.into()))
    }

    /// Comparison with explicit text sensitivity.
    pub fn compare_with(
        &self,
        op: CompareOp,
        value: impl Into<Option<T>>,
        text: TextOptions,
    ) -> Predicate {
        Predicate::compare_with(self.name, op, Value::from(value.into()), text)
    }

    pub fn lt(&self, value: impl Into<Option<T>>) -> Predicate {
        self.compare(CompareOp::Lt, value)
    }

    pub fn le(&self, value: impl Into<Option<T>>) -> Predicate {
        self.compare(CompareOp::Le, value)
    }

    pub fn gt(&self, value: impl Into<Option<T>>) -> Predicate {
        self.compare(CompareOp::Gt, value)
    }

    pub fn ge(&self, value: impl Into<Option<T>>) -> Predicate {
        self.compare(CompareOp::Ge, value)
    }

    pub fn equals(&self, value: impl Into<Option<T>>) -> Predicate {
        self.compare(CompareOp::Eq, value)
    }

    pub fn not_equals(&self, value: impl Into<Option<T>>) -> Predicate {
        self.compare(CompareOp::Ne, value)
    }
}

#[cfg(test)]
mod tests {
    use super::{CompareOp, Field, Predicate, TextOptions};
    use crate::model::entity::{Entity, EntityId};
    use uuid::Uuid;

    const ID: Field<i64> = Field::new("id");
    const NAME: Field<&'static str> = Field::new("name");

    fn person(id: i64, name: Option<&str>) -> Entity {
        let mut entity = Entity::new("Person", EntityId::temporary(), Uuid::new_v4());
        entity.set("id", id);
        entity.set("name", name);
        entity
    }

    #[test]
    fn building_is_referentially_transparent() {
        assert_eq!(ID.lt(4), ID.lt(4));
        assert_eq!(ID.lt(4).and(NAME.equals("a")), ID.lt(4).and(NAME.equals("a")));
    }

    #[test]
    fn comparison_operators_match_expected_rows() {
        let row = person(3, Some("alice"));
        assert!(ID.lt(4).matches(&row));
        assert!(ID.le(3).matches(&row));
        assert!(ID.gt(2).matches(&row));
        assert!(ID.ge(3).matches(&row));
        assert!(ID.equals(3).matches(&row));
        assert!(ID.not_equals(5).matches(&row));
        assert!(!ID.not_equals(3).matches(&row));
    }

    #[test]
    fn null_equality_is_an_is_null_test() {
        let unnamed = person(1, None);
        let named = person(2, Some("bob"));

        assert!(NAME.equals(None).matches(&unnamed));
        assert!(!NAME.equals(None).matches(&named));
        assert!(NAME.not_equals(None).matches(&named));
        // Ordered comparison against null is unknown, never satisfied.
        assert!(!NAME.lt(None).matches(&named));
        // Null field against a concrete value is unknown as well.
        assert!(!NAME.equals("bob").matches(&unnamed));
        assert!(!NAME.not_equals("bob").matches(&unnamed));
    }

    #[test]
    fn text_comparison_defaults_fold_case_and_diacritics() {
        let row = person(1, Some("Álice"));
        assert!(NAME.equals("alice").matches(&row));

        let exact = NAME.compare_with(CompareOp::Eq, "alice", TextOptions::exact());
        assert!(!exact.matches(&row));
    }

    #[test]
    fn numeric_operands_never_carry_text_options() {
        match ID.equals(1) {
            Predicate::Compare { text, .. } => assert_eq!(text, TextOptions::exact()),
            other => panic!("unexpected predicate shape: {other:?}"),
        }
    }

    #[test]
    fn and_renders_left_before_right() {
        let predicate = ID.not_equals(5).and(NAME.equals("test"));
        assert_eq!(predicate.to_string(), "(id != 5 AND name == \"test\")");
    }
}
