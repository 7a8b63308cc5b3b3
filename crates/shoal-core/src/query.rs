//! Predicate grammar and evaluator for `find`.
//!
//! Predicates are evaluated on documents decoded from their stored bytes
//! with the same codec used on the wire. The grammar is a tagged sum of
//! `AND`/`OR` groups over field conditions; conditions are a
//! struct-of-options, every present operator must hold.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A boolean predicate over a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Where {
    And {
        #[serde(rename = "AND")]
        clauses: Vec<Where>,
    },
    Or {
        #[serde(rename = "OR")]
        clauses: Vec<Where>,
    },
    Cond(Condition),
}

/// A single-field condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub op: Ops,
}

/// Operator set applied to one field. Every operator present must hold.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ops {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eq: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gt: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lt: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gte: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lte: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#in: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nin: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contains: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overlap: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not: Option<Box<Ops>>,
}

impl Where {
    /// Evaluate this predicate against a decoded document.
    pub fn eval(&self, doc: &Value) -> bool {
        match self {
            Where::And { clauses } => clauses.iter().all(|clause| clause.eval(doc)),
            Where::Or { clauses } => clauses.iter().any(|clause| clause.eval(doc)),
            Where::Cond(cond) => cond.op.eval(resolve_field(doc, &cond.field)),
        }
    }
}

impl Ops {
    fn eval(&self, value: &Value) -> bool {
        if let Some(expected) = &self.eq {
            if compare_values(value, expected) != Some(Ordering::Equal) {
                return false;
            }
        }
        if let Some(bound) = &self.gt {
            if compare_values(value, bound) != Some(Ordering::Greater) {
                return false;
            }
        }
        if let Some(bound) = &self.lt {
            if compare_values(value, bound) != Some(Ordering::Less) {
                return false;
            }
        }
        if let Some(bound) = &self.gte {
            if !matches!(
                compare_values(value, bound),
                Some(Ordering::Greater | Ordering::Equal)
            ) {
                return false;
            }
        }
        if let Some(bound) = &self.lte {
            if !matches!(
                compare_values(value, bound),
                Some(Ordering::Less | Ordering::Equal)
            ) {
                return false;
            }
        }
        if let Some(allowed) = &self.r#in {
            if !allowed.contains(value) {
                return false;
            }
        }
        if let Some(excluded) = &self.nin {
            if excluded.contains(value) {
                return false;
            }
        }
        if let Some(needle) = &self.contains {
            if !contains(value, needle) {
                return false;
            }
        }
        if let Some(other) = &self.overlap {
            if !overlaps(value, other) {
                return false;
            }
        }
        if let Some(inner) = &self.not {
            if inner.eval(value) {
                return false;
            }
        }
        true
    }
}

/// Look up a named field on a document. Dot-separated paths descend into
/// nested maps; any missing segment resolves to null.
pub fn resolve_field<'a>(doc: &'a Value, path: &str) -> &'a Value {
    let mut current = doc;
    for segment in path.split('.') {
        match current.get(segment) {
            Some(v) => current = v,
            None => return &Value::Null,
        }
    }
    current
}

/// Substring match for strings, element membership for lists.
fn contains(value: &Value, needle: &Value) -> bool {
    match (value, needle) {
        (Value::String(s), Value::String(sub)) => s.contains(sub.as_str()),
        (Value::Array(items), item) => items.contains(item),
        _ => false,
    }
}

/// Non-empty intersection over list-valued fields.
fn overlaps(value: &Value, other: &[Value]) -> bool {
    match value {
        Value::Array(items) => items.iter().any(|item| other.contains(item)),
        _ => false,
    }
}

/// Compare two values, returning an ordering if the types are comparable.
///
/// Numbers compare as f64, strings lexicographically, booleans false < true,
/// null equals null. Mismatched types return `None`.
pub fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Number(a), Value::Number(b)) => {
            let fa = a.as_f64()?;
            let fb = b.as_f64()?;
            fa.partial_cmp(&fb)
        }
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Convenience constructors
// ---------------------------------------------------------------------------

impl Where {
    pub fn and(clauses: Vec<Where>) -> Self {
        Where::And { clauses }
    }

    pub fn or(clauses: Vec<Where>) -> Self {
        Where::Or { clauses }
    }

    pub fn cond(field: impl Into<String>, op: Ops) -> Self {
        Where::Cond(Condition {
            field: field.into(),
            op,
        })
    }

    pub fn field_eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::cond(
            field,
            Ops {
                eq: Some(value.into()),
                ..Ops::default()
            },
        )
    }
}
