use super::{Value, ValueType};
use crate::error::EvaluationError;
use rollup_expr::{BinaryOperator, Conversion};
use std::cmp::Ordering;

/// Apply a strict binary operator. `&&`, `||` and `??` short-circuit and are evaluated by the caller.
pub fn binary(operator: BinaryOperator, left: &Value, right: &Value) -> Result<Value, EvaluationError> {
    match operator {
        BinaryOperator::Add => add(left, right),
        BinaryOperator::Subtract => arithmetic("subtract", left, right, i64::checked_sub, |a, b| a - b),
        BinaryOperator::Multiply => arithmetic("multiply", left, right, i64::checked_mul, |a, b| a * b),
        BinaryOperator::Divide => arithmetic("divide", left, right, i64::checked_div, |a, b| a / b),
        BinaryOperator::Modulo => arithmetic("modulo", left, right, i64::checked_rem, |a, b| a % b),
        BinaryOperator::Equal => Ok(Value::Bool(equals(left, right))),
        BinaryOperator::NotEqual => Ok(Value::Bool(!equals(left, right))),
        BinaryOperator::GreaterThan => Ok(Value::Bool(compare(left, right) == Some(Ordering::Greater))),
        BinaryOperator::GreaterThanOrEqual => Ok(Value::Bool(matches!(compare(left, right), Some(Ordering::Greater | Ordering::Equal)))),
        BinaryOperator::LessThan => Ok(Value::Bool(compare(left, right) == Some(Ordering::Less))),
        BinaryOperator::LessThanOrEqual => Ok(Value::Bool(matches!(compare(left, right), Some(Ordering::Less | Ordering::Equal)))),
        BinaryOperator::And | BinaryOperator::Or => {
            match (left.as_bool(), right.as_bool()) {
                (Some(a), Some(b)) => Ok(Value::Bool(if operator == BinaryOperator::And { a && b } else { a || b })),
                (None, _) => Err(EvaluationError::TypeMismatch { operation: "logical operator", found: left.value_type() }),
                (_, None) => Err(EvaluationError::TypeMismatch { operation: "logical operator", found: right.value_type() }),
            }
        }
        BinaryOperator::Coalesce => Ok(if left.is_null() { right.clone() } else { left.clone() }),
    }
}

/// Expression equality: numbers compare by value across `I64`/`F64`, and a list equals a set (such as
/// a stored collection) when both materialize to the same set
pub fn equals(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::I64(a), Value::F64(b)) | (Value::F64(b), Value::I64(a)) => (*a as f64) == *b,
        (Value::List(_), Value::Set(_)) | (Value::Set(_), Value::List(_)) => left.clone().materialize() == right.clone().materialize(),
        _ => left == right,
    }
}

/// Ordering used by comparison operators. Comparisons involving null, or values of unrelated types, are false.
fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Null, _) | (_, Value::Null) => None,
        (a, b) if a.is_number() && b.is_number() => match (a, b) {
            (Value::I64(a), Value::I64(b)) => Some(a.cmp(b)),
            _ => a.as_f64()?.partial_cmp(&b.as_f64()?),
        },
        (a, b) if a.value_type() == b.value_type() => Some(a.cmp(b)),
        _ => None,
    }
}

/// Total order used for sorting and for min/max: numbers by value, everything else by [`Value`]'s own order
pub fn sort_order(left: &Value, right: &Value) -> Ordering {
    if left.is_number() && right.is_number() {
        if let (Value::I64(a), Value::I64(b)) = (left, right) {
            return a.cmp(b);
        }
        if let (Some(a), Some(b)) = (left.as_f64(), right.as_f64()) {
            return a.total_cmp(&b);
        }
    }
    left.cmp(right)
}

fn add(left: &Value, right: &Value) -> Result<Value, EvaluationError> {
    match (left, right) {
        (Value::String(a), b) if !b.is_null() => Ok(Value::String(format!("{}{}", a, b))),
        (a, Value::String(b)) if !a.is_null() => Ok(Value::String(format!("{}{}", a, b))),
        _ => arithmetic("add", left, right, i64::checked_add, |a, b| a + b),
    }
}

fn arithmetic(
    operation: &'static str,
    left: &Value,
    right: &Value,
    int: fn(i64, i64) -> Option<i64>,
    float: fn(f64, f64) -> f64,
) -> Result<Value, EvaluationError> {
    match (left, right) {
        (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
        (Value::I64(a), Value::I64(b)) => {
            int(*a, *b).map(Value::I64).ok_or_else(|| EvaluationError::InvalidOperation(format!("integer overflow or division by zero in {}", operation)))
        }
        (a, b) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => Ok(Value::F64(float(a, b))),
            (None, _) => Err(EvaluationError::TypeMismatch { operation, found: left.value_type() }),
            (_, None) => Err(EvaluationError::TypeMismatch { operation, found: right.value_type() }),
        },
    }
}

pub fn negate(value: &Value) -> Result<Value, EvaluationError> {
    match value {
        Value::Null => Ok(Value::Null),
        Value::I64(i) => i.checked_neg().map(Value::I64).ok_or_else(|| EvaluationError::InvalidOperation("integer overflow in negate".into())),
        Value::F64(x) => Ok(Value::F64(-x)),
        other => Err(EvaluationError::TypeMismatch { operation: "negate", found: other.value_type() }),
    }
}

pub fn not(value: &Value) -> Result<Value, EvaluationError> {
    match value {
        Value::Null => Ok(Value::Null),
        Value::Bool(b) => Ok(Value::Bool(!b)),
        other => Err(EvaluationError::TypeMismatch { operation: "not", found: other.value_type() }),
    }
}

pub fn convert(value: Value, to: Conversion) -> Result<Value, EvaluationError> {
    let mismatch = |found: ValueType| EvaluationError::TypeMismatch { operation: "conversion", found };
    match (to, value) {
        (_, Value::Null) => Ok(Value::Null),
        (Conversion::Integer, Value::I64(i)) => Ok(Value::I64(i)),
        (Conversion::Integer, Value::F64(x)) => Ok(Value::I64(x.trunc() as i64)),
        (Conversion::Integer, Value::Bool(b)) => Ok(Value::I64(b as i64)),
        (Conversion::Integer, Value::String(s)) => {
            s.trim().parse().map(Value::I64).map_err(|_| EvaluationError::InvalidOperation(format!("'{}' is not an integer", s)))
        }
        (Conversion::Float, Value::F64(x)) => Ok(Value::F64(x)),
        (Conversion::Float, Value::I64(i)) => Ok(Value::F64(i as f64)),
        (Conversion::Float, Value::String(s)) => {
            s.trim().parse().map(Value::F64).map_err(|_| EvaluationError::InvalidOperation(format!("'{}' is not a number", s)))
        }
        (Conversion::Boolean, Value::Bool(b)) => Ok(Value::Bool(b)),
        (Conversion::Boolean, Value::I64(i)) => Ok(Value::Bool(i != 0)),
        (Conversion::Boolean, Value::String(s)) => match s.as_str() {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            _ => Err(EvaluationError::InvalidOperation(format!("'{}' is not a boolean", s))),
        },
        (Conversion::String, value) => Ok(Value::String(value.to_string())),
        (_, other) => Err(mismatch(other.value_type())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arithmetic() {
        assert_eq!(binary(BinaryOperator::Add, &Value::I64(2), &Value::I64(3)).unwrap(), Value::I64(5));
        assert_eq!(binary(BinaryOperator::Subtract, &Value::I64(2), &Value::F64(0.5)).unwrap(), Value::F64(1.5));
        assert_eq!(binary(BinaryOperator::Add, &Value::from("n"), &Value::I64(1)).unwrap(), Value::from("n1"));
        assert_eq!(binary(BinaryOperator::Multiply, &Value::Null, &Value::I64(3)).unwrap(), Value::Null);
        assert!(binary(BinaryOperator::Divide, &Value::I64(1), &Value::I64(0)).is_err());
        assert!(matches!(
            binary(BinaryOperator::Subtract, &Value::Bool(true), &Value::I64(1)),
            Err(EvaluationError::TypeMismatch { found: ValueType::Bool, .. })
        ));
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(binary(BinaryOperator::Equal, &Value::I64(1), &Value::F64(1.0)).unwrap(), Value::Bool(true));
        assert_eq!(binary(BinaryOperator::LessThan, &Value::I64(1), &Value::F64(1.5)).unwrap(), Value::Bool(true));
        assert_eq!(binary(BinaryOperator::GreaterThan, &Value::Null, &Value::I64(0)).unwrap(), Value::Bool(false));
        assert_eq!(binary(BinaryOperator::NotEqual, &Value::Null, &Value::I64(0)).unwrap(), Value::Bool(true));
        let names = Value::List(vec![Value::from("b"), Value::from("a"), Value::from("b")]);
        let stored = Value::Set([Value::from("a"), Value::from("b")].into());
        assert!(equals(&names, &stored));
        assert!(!equals(&names, &Value::List(vec![Value::from("a"), Value::from("b")])));
        assert_eq!(binary(BinaryOperator::GreaterThanOrEqual, &Value::from("b"), &Value::from("a")).unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_conversions() {
        assert_eq!(convert(Value::F64(2.9), Conversion::Integer).unwrap(), Value::I64(2));
        assert_eq!(convert(Value::from(" 7 "), Conversion::Integer).unwrap(), Value::I64(7));
        assert_eq!(convert(Value::I64(7), Conversion::String).unwrap(), Value::from("7"));
        assert_eq!(convert(Value::Null, Conversion::Float).unwrap(), Value::Null);
        assert!(convert(Value::from("x"), Conversion::Boolean).is_err());
    }
}
