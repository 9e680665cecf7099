use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use rollup_expr::{BinaryOperator, Method};

use super::{truthy, Env, Evaluator};
use crate::analysis::Node;
use crate::error::EvaluationError;
use crate::value::{self, Value};

impl<'a> Evaluator<'a> {
    pub(super) async fn call(&self, receiver: &Node, method: Method, args: &[Node], env: &mut Env) -> Result<Value, EvaluationError> {
        use Method::*;

        if matches!(method, OrderBy | OrderByDescending | ThenBy | ThenByDescending) {
            return self.order(receiver, method, args, env).await;
        }

        let source = self.eval(receiver, env).await?;
        let Some(items) = sequence(source, method)? else {
            return Ok(Value::Null);
        };
        match method {
            Where => Ok(Value::List(self.filter(items, args.first(), env).await?)),
            Select => {
                let selector = arg(args, 0, method)?;
                let mut selected = Vec::with_capacity(items.len());
                for item in items {
                    selected.push(self.apply(selector, vec![item], env).await?);
                }
                Ok(Value::List(selected))
            }
            SelectMany => {
                let selector = arg(args, 0, method)?;
                let mut selected = Vec::new();
                for item in items {
                    if let Some(inner) = sequence(self.apply(selector, vec![item], env).await?, method)? {
                        selected.extend(inner);
                    }
                }
                Ok(Value::List(selected))
            }
            Reverse => Ok(Value::List(items.into_iter().rev().collect())),
            Skip | Take => {
                let count = match self.eval(arg(args, 0, method)?, env).await? {
                    Value::I64(n) => n.max(0) as usize,
                    other => return Err(EvaluationError::TypeMismatch { operation: method.name(), found: other.value_type() }),
                };
                Ok(Value::List(if method == Skip { items.into_iter().skip(count).collect() } else { items.into_iter().take(count).collect() }))
            }
            ToList | ToArray | AsEnumerable => Ok(Value::List(items)),
            ToSet => Ok(Value::Set(items.into_iter().map(Value::materialize).collect())),
            Any => Ok(Value::Bool(!self.filter(items, args.first(), env).await?.is_empty())),
            All => {
                let predicate = arg(args, 0, method)?;
                for item in items {
                    if !truthy(&self.apply(predicate, vec![item], env).await?, "all")? {
                        return Ok(Value::Bool(false));
                    }
                }
                Ok(Value::Bool(true))
            }
            Contains => {
                let needle = self.eval(arg(args, 0, method)?, env).await?;
                Ok(Value::Bool(items.iter().any(|item| value::equals(item, &needle))))
            }
            Count => Ok(Value::I64(self.filter(items, args.first(), env).await?.len() as i64)),
            Sum => {
                let mut total = Value::I64(0);
                for item in self.project(items, args.first(), env).await? {
                    if !item.is_null() {
                        total = value::binary(BinaryOperator::Add, &total, &item)?;
                    }
                }
                Ok(total)
            }
            Min | Max => {
                let values = self.project(items, args.first(), env).await?.into_iter().filter(|v| !v.is_null());
                let extreme =
                    if method == Min { values.min_by(value::sort_order) } else { values.max_by(value::sort_order) };
                Ok(extreme.unwrap_or(Value::Null))
            }
            Average => {
                let mut numbers = Vec::new();
                for item in self.project(items, args.first(), env).await? {
                    match item {
                        Value::Null => {}
                        item => numbers.push(item.as_f64().ok_or(EvaluationError::TypeMismatch { operation: "average", found: item.value_type() })?),
                    }
                }
                if numbers.is_empty() {
                    return Ok(Value::Null);
                }
                Ok(Value::F64(numbers.iter().sum::<f64>() / numbers.len() as f64))
            }
            First | FirstOrDefault | Last | LastOrDefault => {
                let mut matching = self.filter(items, args.first(), env).await?;
                let found = if matches!(method, First | FirstOrDefault) { matching.into_iter().next() } else { matching.pop() };
                match found {
                    Some(found) => Ok(found),
                    None if matches!(method, FirstOrDefault | LastOrDefault) => Ok(Value::Null),
                    None => Err(EvaluationError::InvalidOperation(format!("{} of an empty sequence", method.name()))),
                }
            }
            Concat | Union | Except | Intersect => {
                let other = sequence(self.eval(arg(args, 0, method)?, env).await?, method)?.unwrap_or_default();
                Ok(Value::List(match method {
                    Concat => items.into_iter().chain(other).collect(),
                    Union => distinct(items.into_iter().chain(other)),
                    Except => distinct(items.into_iter().filter(|i| !other.contains(i))),
                    _ => distinct(items.into_iter().filter(|i| other.contains(i))),
                }))
            }
            Distinct => Ok(Value::List(distinct(items))),
            GroupBy | ToLookup => {
                let key_selector = arg(args, 0, method)?;
                let mut groups: Vec<(Value, Vec<Value>)> = Vec::new();
                let mut positions: BTreeMap<Value, usize> = BTreeMap::new();
                for item in items {
                    let key = self.apply(key_selector, vec![item.clone()], env).await?;
                    let element = match args.get(1) {
                        Some(selector) => self.apply(selector, vec![item], env).await?,
                        None => item,
                    };
                    match positions.get(&key) {
                        Some(position) => groups[*position].1.push(element),
                        None => {
                            positions.insert(key.clone(), groups.len());
                            groups.push((key, vec![element]));
                        }
                    }
                }
                Ok(Value::List(groups.into_iter().map(|(key, elements)| Value::Group(Box::new(key), elements)).collect()))
            }
            ToDictionary => {
                let key_selector = arg(args, 0, method)?;
                let mut entries = BTreeMap::new();
                for item in items {
                    let key = self.apply(key_selector, vec![item.clone()], env).await?;
                    let value = match args.get(1) {
                        Some(selector) => self.apply(selector, vec![item], env).await?,
                        None => item,
                    };
                    entries.insert(key, value);
                }
                Ok(Value::Map(entries))
            }
            OrderBy | OrderByDescending | ThenBy | ThenByDescending => unreachable!("ordering is handled above"),
        }
    }

    /// Items matching `predicate`, or all of them without one
    async fn filter(&self, items: Vec<Value>, predicate: Option<&Node>, env: &mut Env) -> Result<Vec<Value>, EvaluationError> {
        let Some(predicate) = predicate else {
            return Ok(items);
        };
        let mut matching = Vec::new();
        for item in items {
            if truthy(&self.apply(predicate, vec![item.clone()], env).await?, "predicate")? {
                matching.push(item);
            }
        }
        Ok(matching)
    }

    async fn project(&self, items: Vec<Value>, selector: Option<&Node>, env: &mut Env) -> Result<Vec<Value>, EvaluationError> {
        let Some(selector) = selector else {
            return Ok(items);
        };
        let mut projected = Vec::with_capacity(items.len());
        for item in items {
            projected.push(self.apply(selector, vec![item], env).await?);
        }
        Ok(projected)
    }

    /// `order_by(...).then_by(...)...`: the whole chain is evaluated as one stable sort on composite keys
    async fn order(&self, receiver: &Node, method: Method, args: &[Node], env: &mut Env) -> Result<Value, EvaluationError> {
        let mut keys = vec![(arg(args, 0, method)?, descending(method))];
        let mut source = receiver;
        if matches!(method, Method::ThenBy | Method::ThenByDescending) {
            loop {
                match source {
                    Node::Call { receiver, method, args } if is_ordering(*method) => {
                        keys.push((arg(args, 0, *method)?, descending(*method)));
                        source = receiver.as_ref();
                        if matches!(method, Method::OrderBy | Method::OrderByDescending) {
                            break;
                        }
                    }
                    _ => return Err(EvaluationError::InvalidOperation(format!("{} must follow an ordering", method.name()))),
                }
            }
        }
        keys.reverse();

        let Some(items) = sequence(self.eval(source, env).await?, method)? else {
            return Ok(Value::Null);
        };
        let mut keyed = Vec::with_capacity(items.len());
        for item in items {
            let mut item_keys = Vec::with_capacity(keys.len());
            for (selector, _) in &keys {
                item_keys.push(self.apply(selector, vec![item.clone()], env).await?);
            }
            keyed.push((item_keys, item));
        }
        keyed.sort_by(|(a, _), (b, _)| {
            for (i, (_, descending)) in keys.iter().enumerate() {
                let ordering = value::sort_order(&a[i], &b[i]);
                let ordering = if *descending { ordering.reverse() } else { ordering };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });
        Ok(Value::List(keyed.into_iter().map(|(_, item)| item).collect()))
    }
}

fn is_ordering(method: Method) -> bool { matches!(method, Method::OrderBy | Method::OrderByDescending | Method::ThenBy | Method::ThenByDescending) }

fn descending(method: Method) -> bool { matches!(method, Method::OrderByDescending | Method::ThenByDescending) }

fn arg(args: &[Node], index: usize, method: Method) -> Result<&Node, EvaluationError> {
    args.get(index).ok_or_else(|| EvaluationError::InvalidOperation(format!("{} is missing argument {}", method.name(), index + 1)))
}

/// The items of a sequence value; `None` for null, which propagates through sequence methods
fn sequence(value: Value, method: Method) -> Result<Option<Vec<Value>>, EvaluationError> {
    if value.is_null() {
        return Ok(None);
    }
    match value.elements() {
        Some(items) => Ok(Some(items)),
        None => Err(EvaluationError::TypeMismatch { operation: method.name(), found: value.value_type() }),
    }
}

fn distinct(items: impl IntoIterator<Item = Value>) -> Vec<Value> {
    let mut seen = BTreeSet::new();
    items.into_iter().filter(|item| seen.insert(item.clone())).collect()
}
