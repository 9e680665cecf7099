//! Change calculation strategies: how a pair of evaluated values becomes a reported change.

use std::collections::BTreeSet;
use std::fmt::Debug;

use rollup_expr::BinaryOperator;
use serde::{Deserialize, Serialize};

use crate::changeset::navigation_delta;
use crate::error::EvaluationError;
use crate::value::{self, Value};

/// Values of the expression for one entity. A side is `None` when the entity does not exist on it or
/// does not pass the filter there.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvaluatedValues {
    pub original: Option<Value>,
    pub current: Option<Value>,
}

pub trait ChangeCalculation: Send + Sync + 'static {
    type Change: Clone + Debug + PartialEq + Send + Sync + 'static;

    /// Whether the change can be computed from partially loaded navigations
    fn is_incremental(&self) -> bool;

    /// Whether evaluation reads whole values, making bulk prefetching worthwhile
    fn preload_entities(&self) -> bool;

    fn requires_original(&self) -> bool { true }

    /// Whether the change collapses equal elements. Such a change is only sound incrementally when the
    /// value is exact.
    fn deduplicates(&self) -> bool { false }

    fn get_change(&self, values: EvaluatedValues) -> Result<Self::Change, EvaluationError>;

    fn is_no_change(&self, change: &Self::Change) -> bool;

    /// The change leading from an already reported change to a newer total over the same base
    fn delta_change(&self, previous: &Self::Change, total: &Self::Change) -> Result<Self::Change, EvaluationError>;

    /// The stored value after applying `change` to it
    fn apply_change(&self, stored: &Value, change: &Self::Change) -> Result<Value, EvaluationError>;
}

/// Reports which entities are affected, nothing more
#[derive(Debug, Clone, Copy, Default)]
pub struct VoidCalculation;

impl ChangeCalculation for VoidCalculation {
    type Change = ();

    fn is_incremental(&self) -> bool { false }

    fn preload_entities(&self) -> bool { false }

    fn requires_original(&self) -> bool { false }

    fn get_change(&self, _values: EvaluatedValues) -> Result<(), EvaluationError> { Ok(()) }

    fn is_no_change(&self, _change: &()) -> bool { false }

    fn delta_change(&self, _previous: &(), _total: &()) -> Result<(), EvaluationError> { Ok(()) }

    fn apply_change(&self, stored: &Value, _change: &()) -> Result<Value, EvaluationError> { Ok(stored.clone()) }
}

/// The current value, `Null` when the entity is gone or filtered out
#[derive(Debug, Clone, Copy, Default)]
pub struct CurrentValueCalculation;

impl ChangeCalculation for CurrentValueCalculation {
    type Change = Value;

    fn is_incremental(&self) -> bool { false }

    fn preload_entities(&self) -> bool { true }

    fn requires_original(&self) -> bool { false }

    fn get_change(&self, values: EvaluatedValues) -> Result<Value, EvaluationError> { Ok(values.current.unwrap_or(Value::Null)) }

    fn is_no_change(&self, _change: &Value) -> bool { false }

    fn delta_change(&self, _previous: &Value, total: &Value) -> Result<Value, EvaluationError> { Ok(total.clone()) }

    fn apply_change(&self, _stored: &Value, change: &Value) -> Result<Value, EvaluationError> { Ok(change.clone()) }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueChange {
    pub original: Value,
    pub current: Value,
}

/// Both values; a no-op when they are equal
#[derive(Debug, Clone, Copy, Default)]
pub struct ValueChangeCalculation;

impl ChangeCalculation for ValueChangeCalculation {
    type Change = ValueChange;

    fn is_incremental(&self) -> bool { false }

    fn preload_entities(&self) -> bool { true }

    fn get_change(&self, values: EvaluatedValues) -> Result<ValueChange, EvaluationError> {
        Ok(ValueChange { original: values.original.unwrap_or(Value::Null), current: values.current.unwrap_or(Value::Null) })
    }

    fn is_no_change(&self, change: &ValueChange) -> bool { change.original == change.current }

    fn delta_change(&self, previous: &ValueChange, total: &ValueChange) -> Result<ValueChange, EvaluationError> {
        Ok(ValueChange { original: previous.current.clone(), current: total.current.clone() })
    }

    fn apply_change(&self, _stored: &Value, change: &ValueChange) -> Result<Value, EvaluationError> { Ok(change.current.clone()) }
}

/// `current - original` of a numeric expression, a missing side counting as zero
#[derive(Debug, Clone, Copy, Default)]
pub struct NumberDeltaCalculation;

impl ChangeCalculation for NumberDeltaCalculation {
    type Change = Value;

    fn is_incremental(&self) -> bool { true }

    fn preload_entities(&self) -> bool { false }

    fn get_change(&self, values: EvaluatedValues) -> Result<Value, EvaluationError> {
        subtract(&values.current.unwrap_or(Value::Null), &values.original.unwrap_or(Value::Null))
    }

    fn is_no_change(&self, change: &Value) -> bool { value::equals(change, &Value::I64(0)) }

    fn delta_change(&self, previous: &Value, total: &Value) -> Result<Value, EvaluationError> { subtract(total, previous) }

    fn apply_change(&self, stored: &Value, change: &Value) -> Result<Value, EvaluationError> {
        value::binary(BinaryOperator::Add, &zero_if_null(stored), &zero_if_null(change))
    }
}

fn zero_if_null(value: &Value) -> Value {
    match value {
        Value::Null => Value::I64(0),
        other => other.clone(),
    }
}

fn subtract(left: &Value, right: &Value) -> Result<Value, EvaluationError> {
    value::binary(BinaryOperator::Subtract, &zero_if_null(left), &zero_if_null(right))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SetChange {
    pub added: BTreeSet<Value>,
    pub removed: BTreeSet<Value>,
}

/// Elements added to and removed from a collection-valued expression
#[derive(Debug, Clone, Copy, Default)]
pub struct SetDeltaCalculation;

impl ChangeCalculation for SetDeltaCalculation {
    type Change = SetChange;

    fn is_incremental(&self) -> bool { true }

    fn preload_entities(&self) -> bool { false }

    fn deduplicates(&self) -> bool { true }

    fn get_change(&self, values: EvaluatedValues) -> Result<SetChange, EvaluationError> {
        let original = elements(values.original.as_ref())?;
        let current = elements(values.current.as_ref())?;
        Ok(SetChange { added: current.difference(&original).cloned().collect(), removed: original.difference(&current).cloned().collect() })
    }

    fn is_no_change(&self, change: &SetChange) -> bool { change.added.is_empty() && change.removed.is_empty() }

    fn delta_change(&self, previous: &SetChange, total: &SetChange) -> Result<SetChange, EvaluationError> {
        let (added, removed) = navigation_delta((&previous.added, &previous.removed), (&total.added, &total.removed));
        Ok(SetChange { added, removed })
    }

    fn apply_change(&self, stored: &Value, change: &SetChange) -> Result<Value, EvaluationError> {
        let mut set = elements(Some(stored))?;
        set.retain(|v| !change.removed.contains(v));
        set.extend(change.added.iter().cloned());
        Ok(Value::Set(set))
    }
}

fn elements(value: Option<&Value>) -> Result<BTreeSet<Value>, EvaluationError> {
    match value {
        None | Some(Value::Null) => Ok(BTreeSet::new()),
        Some(value) => match value.elements() {
            Some(items) => Ok(items.into_iter().collect()),
            None => Err(EvaluationError::TypeMismatch { operation: "set delta", found: value.value_type() }),
        },
    }
}
