mod ops;

pub use ops::{binary, convert, equals, negate, not, sort_order};

use crate::entity::Entity;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// A value produced by evaluating a computed expression.
///
/// `Value` is totally ordered (floats via `total_cmp`) so that materialized collections can be kept in
/// `BTreeSet`/`BTreeMap`. Equality follows the order: `I64(1)` and `F64(1.0)` are different values.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    I64(i64),
    F64(f64),
    String(String),
    Entity(Entity),
    List(Vec<Value>),
    Set(BTreeSet<Value>),
    /// A dictionary entry
    Pair(Box<Value>, Box<Value>),
    /// A grouping: key and elements
    Group(Box<Value>, Vec<Value>),
    Map(BTreeMap<Value, Value>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    Null,
    Bool,
    I64,
    F64,
    String,
    Entity,
    List,
    Set,
    Pair,
    Group,
    Map,
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Null => ValueType::Null,
            Value::Bool(_) => ValueType::Bool,
            Value::I64(_) => ValueType::I64,
            Value::F64(_) => ValueType::F64,
            Value::String(_) => ValueType::String,
            Value::Entity(_) => ValueType::Entity,
            Value::List(_) => ValueType::List,
            Value::Set(_) => ValueType::Set,
            Value::Pair(_, _) => ValueType::Pair,
            Value::Group(_, _) => ValueType::Group,
            Value::Map(_) => ValueType::Map,
        }
    }

    pub fn is_null(&self) -> bool { matches!(self, Value::Null) }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_entity(&self) -> Option<Entity> {
        match self {
            Value::Entity(e) => Some(*e),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::I64(i) => Some(*i as f64),
            Value::F64(x) => Some(*x),
            _ => None,
        }
    }

    pub fn is_number(&self) -> bool { matches!(self, Value::I64(_) | Value::F64(_)) }

    /// Elements of a collection-like value. Groups yield their elements and maps their entries as pairs.
    pub fn elements(&self) -> Option<Vec<Value>> {
        match self {
            Value::List(items) => Some(items.clone()),
            Value::Set(items) => Some(items.iter().cloned().collect()),
            Value::Group(_, items) => Some(items.clone()),
            Value::Map(entries) => {
                Some(entries.iter().map(|(k, v)| Value::Pair(Box::new(k.clone()), Box::new(v.clone()))).collect())
            }
            _ => None,
        }
    }

    /// Entities contained in this value, if it is an entity or a collection of entities
    pub fn entities(&self) -> BTreeSet<Entity> {
        match self {
            Value::Entity(e) => BTreeSet::from([*e]),
            Value::List(items) => items.iter().filter_map(Value::as_entity).collect(),
            Value::Set(items) => items.iter().filter_map(Value::as_entity).collect(),
            _ => BTreeSet::new(),
        }
    }

    /// Order-insensitive form of the value: lists become sets, recursively. Multiplicity is not kept,
    /// so `[1, 1]` and `[1]` materialize to the same value and a change that only adds a duplicate
    /// element is a no-op.
    pub fn materialize(self) -> Value {
        match self {
            Value::List(items) => Value::Set(items.into_iter().map(Value::materialize).collect()),
            Value::Set(items) => Value::Set(items.into_iter().map(Value::materialize).collect()),
            Value::Pair(k, v) => Value::Pair(Box::new(k.materialize()), Box::new(v.materialize())),
            Value::Group(k, items) => {
                let mut items: Vec<Value> = items.into_iter().map(Value::materialize).collect();
                items.sort();
                Value::Group(Box::new(k.materialize()), items)
            }
            Value::Map(entries) => Value::Map(entries.into_iter().map(|(k, v)| (k.materialize(), v.materialize())).collect()),
            scalar => scalar,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::I64(_) => 2,
            Value::F64(_) => 3,
            Value::String(_) => 4,
            Value::Entity(_) => 5,
            Value::List(_) => 6,
            Value::Set(_) => 7,
            Value::Pair(_, _) => 8,
            Value::Group(_, _) => 9,
            Value::Map(_) => 10,
        }
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::I64(a), Value::I64(b)) => a.cmp(b),
            (Value::F64(a), Value::F64(b)) => a.total_cmp(b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Entity(a), Value::Entity(b)) => a.cmp(b),
            (Value::List(a), Value::List(b)) => a.cmp(b),
            (Value::Set(a), Value::Set(b)) => a.cmp(b),
            (Value::Pair(ak, av), Value::Pair(bk, bv)) => ak.cmp(bk).then_with(|| av.cmp(bv)),
            (Value::Group(ak, av), Value::Group(bk, bv)) => ak.cmp(bk).then_with(|| av.cmp(bv)),
            (Value::Map(a), Value::Map(b)) => a.cmp(b),
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> { Some(self.cmp(other)) }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool { self.cmp(other) == Ordering::Equal }
}

impl Eq for Value {}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn join<'a>(f: &mut fmt::Formatter<'_>, items: impl Iterator<Item = &'a Value>) -> fmt::Result {
            for (i, item) in items.enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", item)?;
            }
            Ok(())
        }
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::I64(i) => write!(f, "{}", i),
            Value::F64(x) => write!(f, "{}", x),
            Value::String(s) => write!(f, "{}", s),
            Value::Entity(e) => write!(f, "{}", e),
            Value::List(items) => {
                write!(f, "[")?;
                join(f, items.iter())?;
                write!(f, "]")
            }
            Value::Set(items) => {
                write!(f, "{{")?;
                join(f, items.iter())?;
                write!(f, "}}")
            }
            Value::Pair(k, v) => write!(f, "({}, {})", k, v),
            Value::Group(k, items) => {
                write!(f, "{}: [", k)?;
                join(f, items.iter())?;
                write!(f, "]")
            }
            Value::Map(entries) => {
                write!(f, "{{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self { Value::Bool(value) }
}
impl From<i64> for Value {
    fn from(value: i64) -> Self { Value::I64(value) }
}
impl From<i32> for Value {
    fn from(value: i32) -> Self { Value::I64(value as i64) }
}
impl From<f64> for Value {
    fn from(value: f64) -> Self { Value::F64(value) }
}
impl From<&str> for Value {
    fn from(value: &str) -> Self { Value::String(value.to_string()) }
}
impl From<String> for Value {
    fn from(value: String) -> Self { Value::String(value) }
}
impl From<Entity> for Value {
    fn from(value: Entity) -> Self { Value::Entity(value) }
}
impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self { value.map(Into::into).unwrap_or(Value::Null) }
}

impl From<&rollup_expr::Literal> for Value {
    fn from(literal: &rollup_expr::Literal) -> Self {
        use rollup_expr::Literal;
        match literal {
            Literal::Null => Value::Null,
            Literal::Boolean(b) => Value::Bool(*b),
            Literal::Integer(i) => Value::I64(*i),
            Literal::Float(x) => Value::F64(*x),
            Literal::String(s) => Value::String(s.clone()),
        }
    }
}
