//! Dynamic field values with SQL-style comparison semantics.
//!
//! # Responsibility
//! - Represent every storable field value as one tagged variant.
//! - Provide three-valued comparison: null or mismatched operands compare
//!   to "unknown" (`None`), never to a boolean.
//!
//! # Invariants
//! - Text folding is applied only when both operands are text.
//! - Sorting uses a total order so result ordering stays deterministic.

use crate::query::predicate::TextOptions;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A single field value inside an entity record.
///
/// The untagged representation maps directly onto JSON payloads used by the
/// storage backends (`null`, booleans, numbers, strings).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Real(f64),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn is_text(&self) -> bool {
        matches!(self, Self::Text(_))
    }

    /// Three-valued comparison between two operands.
    ///
    /// Returns `None` ("unknown") when either side is null or the types are
    /// incomparable. Integers and reals compare numerically across variants.
    /// Text comparison honors the provided fold options.
    pub fn compare(&self, other: &Self, text: TextOptions) -> Option<Ordering> {
        match (self, other) {
            (Self::Null, _) | (_, Self::Null) => None,
            (Self::Bool(a), Self::Bool(b)) => Some(a.cmp(b)),
            (Self::Integer(a), Self::Integer(b)) => Some(a.cmp(b)),
            (Self::Real(a), Self::Real(b)) => a.partial_cmp(b),
            (Self::Integer(a), Self::Real(b)) => (*a as f64).partial_cmp(b),
            (Self::Real(a), Self::Integer(b)) => a.partial_cmp(&(*b as f64)),
            (Self::Text(a), Self::Text(b)) => {
                Some(fold_text(a, text).cmp(&fold_text(b, text)))
            }
            _ => None,
        }
    }

    /// Total order used for sort keys: null first, then booleans, numbers,
    /// text. Unlike [`Value::compare`] this never returns "unknown".
    pub fn sort_cmp(&self, other: &Self) -> Ordering {
        match self.compare(other, TextOptions::exact()) {
            Some(ordering) => ordering,
            None => self.rank().cmp(&other.rank()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Bool(_) => 1,
            Self::Integer(_) | Self::Real(_) => 2,
            Self::Text(_) => 3,
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(value) => write!(f, "{value}"),
            Self::Integer(value) => write!(f, "{value}"),
            Self::Real(value) => write!(f, "{value}"),
            Self::Text(value) => write!(f, "\"{value}\""),
        }
    }
}

/// Applies the configured case/diacritic folds to a text operand.
pub(crate) fn fold_text(input: &str, options: TextOptions) -> String {
    let mut folded = String::with_capacity(input.len());
    for ch in input.chars() {
        let ch = if options.diacritic_insensitive {
            strip_diacritic(ch)
        } else {
            ch
        };
        if options.case_insensitive {
            folded.extend(ch.to_lowercase());
        } else {
            folded.push(ch);
        }
    }
    folded
}

// Covers the Latin-1 accent block; characters outside it pass through.
fn strip_diacritic(ch: char) -> char {
    match ch {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' => 'a',
        'À' | 'Á' | 'Â' | 'Ã' | 'Ä' | 'Å' => 'A',
        'ç' => 'c',
        'Ç' => 'C',
        'è' | 'é' | 'ê' | 'ë' => 'e',
        'È' | 'É' | 'Ê' | 'Ë' => 'E',
        'ì' | 'í' | 'î' | 'ï' => 'i',
        'Ì' | 'Í' | 'Î' | 'Ï' => 'I',
        'ñ' => 'n',
        'Ñ' => 'N',
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' => 'o',
        'Ò' | 'Ó' | 'Ô' | 'Õ' | 'Ö' => 'O',
        'ù' | 'ú' | 'û' | 'ü' => 'u',
        'Ù' | 'Ú' | 'Û' | 'Ü' => 'U',
        'ý' | 'ÿ' => 'y',
        'Ý' => 'Y',
        other => other,
    }
}
