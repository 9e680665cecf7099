//! Interpreter for compiled expressions.
//!
//! An [`Evaluator`] reads one side of a mutation batch. In incremental mode, collection navigations
//! that are neither eager nor owned by a load-all entity only yield the related entities recorded in
//! the [`IncrementalContext`], each checked for membership through the inverse navigation.

mod methods;

use futures::future::{BoxFuture, FutureExt};
use rollup_expr::{BinaryOperator, UnaryOperator};
use tracing::trace;

use crate::analysis::{CompiledExpression, Node};
use crate::cache::NavigationCache;
use crate::context::ContextId;
use crate::entity::{Entity, ValueSide};
use crate::error::EvaluationError;
use crate::incremental::IncrementalContext;
use crate::input::MutationInput;
use crate::model::MemberId;
use crate::value::{self, Value};

type Env = Vec<Value>;

pub struct Evaluator<'a> {
    compiled: &'a CompiledExpression,
    input: &'a dyn MutationInput,
    cache: &'a NavigationCache,
    side: ValueSide,
    incremental: Option<&'a IncrementalContext>,
}

impl<'a> Evaluator<'a> {
    pub fn new(compiled: &'a CompiledExpression, input: &'a dyn MutationInput, cache: &'a NavigationCache, side: ValueSide) -> Self {
        Self { compiled, input, cache, side, incremental: None }
    }

    /// Switch to incremental mode
    pub fn incremental(mut self, incremental: &'a IncrementalContext) -> Self {
        self.incremental = Some(incremental);
        self
    }

    pub fn side(&self) -> ValueSide { self.side }

    /// The materialized value of the expression for `entity`
    pub async fn value(&self, entity: Entity) -> Result<Value, EvaluationError> {
        Ok(self.run(&self.compiled.value, entity).await?.materialize())
    }

    /// Whether `entity` passes the filter. Always true without one.
    pub async fn passes_filter(&self, entity: Entity) -> Result<bool, EvaluationError> {
        let Some(filter) = &self.compiled.filter_node else {
            return Ok(true);
        };
        match self.run(filter, entity).await? {
            Value::Bool(passes) => Ok(passes),
            Value::Null => Ok(false),
            other => Err(EvaluationError::TypeMismatch { operation: "filter", found: other.value_type() }),
        }
    }

    async fn run(&self, lambda: &Node, entity: Entity) -> Result<Value, EvaluationError> {
        if !self.input.state(entity).exists_on(self.side) {
            return Err(EvaluationError::InvalidState { entity, side: self.side });
        }
        let mut env: Env = vec![Value::Null; self.compiled.slots];
        self.apply(lambda, vec![Value::Entity(entity)], &mut env).await
    }

    async fn apply(&self, lambda: &Node, args: Vec<Value>, env: &mut Env) -> Result<Value, EvaluationError> {
        let Node::Lambda { slots, body } = lambda else {
            return Err(EvaluationError::InvalidOperation("expected a lambda".into()));
        };
        for (slot, arg) in slots.iter().zip(args) {
            env[*slot] = arg;
        }
        self.eval(body, env).await
    }

    fn eval<'s>(&'s self, node: &'s Node, env: &'s mut Env) -> BoxFuture<'s, Result<Value, EvaluationError>> {
        async move {
            match node {
                Node::Literal(value) => Ok(value.clone()),
                Node::Param(slot) => Ok(env[*slot].clone()),
                Node::Property { receiver, property } => match self.eval(receiver, env).await? {
                    Value::Null => Ok(Value::Null),
                    Value::Entity(entity) => Ok(self.input.load_property(entity, *property, self.side).await?),
                    other => Err(EvaluationError::TypeMismatch { operation: "property read", found: other.value_type() }),
                },
                Node::Navigation { receiver, navigation, context, collection } => match self.eval(receiver, env).await? {
                    Value::Null => Ok(Value::Null),
                    Value::Entity(entity) if *collection => self.collection(entity, *navigation, *context).await,
                    Value::Entity(entity) => {
                        let related = self.cache.load_one(self.input, entity, *navigation, self.side).await?;
                        Ok(related.first().map(|e| Value::Entity(*e)).unwrap_or(Value::Null))
                    }
                    other => Err(EvaluationError::TypeMismatch { operation: "navigation", found: other.value_type() }),
                },
                Node::PairKey(inner) => match self.eval(inner, env).await? {
                    Value::Pair(key, _) | Value::Group(key, _) => Ok(*key),
                    Value::Null => Ok(Value::Null),
                    other => Err(EvaluationError::TypeMismatch { operation: "key", found: other.value_type() }),
                },
                Node::PairValue(inner) => match self.eval(inner, env).await? {
                    Value::Pair(_, value) => Ok(*value),
                    Value::Group(_, items) => Ok(Value::List(items)),
                    Value::Null => Ok(Value::Null),
                    other => Err(EvaluationError::TypeMismatch { operation: "value", found: other.value_type() }),
                },
                Node::Unary { operator, operand } => {
                    let operand = self.eval(operand, env).await?;
                    match operator {
                        UnaryOperator::Not => value::not(&operand),
                        UnaryOperator::Negate => value::negate(&operand),
                    }
                }
                Node::Binary { left, operator, right } => {
                    let left = self.eval(left, env).await?;
                    match operator {
                        BinaryOperator::And | BinaryOperator::Or => {
                            let left = truthy(&left, operator.symbol())?;
                            if left == (*operator == BinaryOperator::Or) {
                                return Ok(Value::Bool(left));
                            }
                            let right = self.eval(right, env).await?;
                            Ok(Value::Bool(truthy(&right, operator.symbol())?))
                        }
                        BinaryOperator::Coalesce if !left.is_null() => Ok(left),
                        BinaryOperator::Coalesce => self.eval(right, env).await,
                        _ => {
                            let right = self.eval(right, env).await?;
                            value::binary(*operator, &left, &right)
                        }
                    }
                }
                Node::Conditional { test, if_true, if_false } => {
                    let test = self.eval(test, env).await?;
                    if truthy(&test, "conditional")? {
                        self.eval(if_true, env).await
                    } else {
                        self.eval(if_false, env).await
                    }
                }
                Node::List(items) => {
                    let mut values = Vec::with_capacity(items.len());
                    for item in items {
                        values.push(self.eval(item, env).await?);
                    }
                    Ok(Value::List(values))
                }
                Node::Convert { operand, to } => value::convert(self.eval(operand, env).await?, *to),
                Node::Call { receiver, method, args } => self.call(receiver, *method, args, env).await,
                Node::Lambda { .. } => Err(EvaluationError::InvalidOperation("lambda used as a value".into())),
            }
        }
        .boxed()
    }

    /// Entities of `entity.navigation` on the evaluated side
    async fn collection(&self, entity: Entity, navigation: MemberId, context: ContextId) -> Result<Value, EvaluationError> {
        let model = self.input.model();
        let incremental = match (self.incremental, model.inverse(navigation)) {
            (Some(incremental), Some(inverse)) if !self.compiled.graph.node(context).is_eager() && !incremental.is_load_all(entity) => {
                Some((incremental, inverse))
            }
            _ => None,
        };
        let Some((incremental, inverse)) = incremental else {
            let related = self.cache.load_one(self.input, entity, navigation, self.side).await?;
            return Ok(Value::List(related.into_iter().map(Value::Entity).collect()));
        };

        let candidates: Vec<Entity> =
            incremental.related(entity, navigation).into_iter().filter(|r| self.input.state(*r).exists_on(self.side)).collect();
        if candidates.is_empty() {
            return Ok(Value::List(Vec::new()));
        }
        let owners = self.cache.load(self.input, &candidates, inverse, self.side).await?;
        let members: Vec<Value> =
            candidates.into_iter().filter(|r| owners.get(r).is_some_and(|o| o.contains(&entity))).map(Value::Entity).collect();
        trace!("{} {}: {} of the recorded related entities are members", entity, self.side, members.len());
        Ok(Value::List(members))
    }
}

fn truthy(value: &Value, operation: &'static str) -> Result<bool, EvaluationError> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Null => Ok(false),
        other => Err(EvaluationError::TypeMismatch { operation, found: other.value_type() }),
    }
}

impl CompiledExpression {
    pub async fn original_value(&self, input: &dyn MutationInput, cache: &NavigationCache, entity: Entity) -> Result<Value, EvaluationError> {
        Evaluator::new(self, input, cache, ValueSide::Original).value(entity).await
    }

    pub async fn current_value(&self, input: &dyn MutationInput, cache: &NavigationCache, entity: Entity) -> Result<Value, EvaluationError> {
        Evaluator::new(self, input, cache, ValueSide::Current).value(entity).await
    }

    pub async fn incremental_original_value(
        &self,
        input: &dyn MutationInput,
        cache: &NavigationCache,
        incremental: &IncrementalContext,
        entity: Entity,
    ) -> Result<Value, EvaluationError> {
        Evaluator::new(self, input, cache, ValueSide::Original).incremental(incremental).value(entity).await
    }

    pub async fn incremental_current_value(
        &self,
        input: &dyn MutationInput,
        cache: &NavigationCache,
        incremental: &IncrementalContext,
        entity: Entity,
    ) -> Result<Value, EvaluationError> {
        Evaluator::new(self, input, cache, ValueSide::Current).incremental(incremental).value(entity).await
    }
}
