use std::collections::{BTreeMap, BTreeSet};

use rollup_expr::{BinaryOperator, Expr, Method, UnaryOperator};

use super::node::Node;
use crate::context::{ContextGraph, ContextId, ContextKey, KeyPart};
use crate::error::ConfigurationError;
use crate::model::{Cardinality, EntityTypeId, MemberKind, Model};
use crate::value::Value;

/// What the value of a sub-expression carries: the entity contexts found at each position inside
/// the value, and the collection navigations the value is only a partial result over when the
/// navigations are loaded incrementally.
#[derive(Debug, Clone, Default)]
pub(crate) struct Flow {
    contexts: BTreeMap<ContextKey, Vec<ContextId>>,
    pub(crate) partial: BTreeSet<ContextId>,
}

impl Flow {
    fn entity(context: ContextId) -> Self {
        let mut flow = Flow::default();
        flow.add(ContextKey::NONE, [context]);
        flow
    }

    fn add(&mut self, key: ContextKey, contexts: impl IntoIterator<Item = ContextId>) {
        let entry = self.contexts.entry(key).or_default();
        for context in contexts {
            if !entry.contains(&context) {
                entry.push(context);
            }
        }
    }

    fn at(&self, key: &ContextKey) -> &[ContextId] { self.contexts.get(key).map(Vec::as_slice).unwrap_or(&[]) }

    fn all(&self) -> BTreeSet<ContextId> { self.contexts.values().flatten().copied().collect() }

    /// Contexts moved under `part`. The partial set is dropped.
    fn prefixed(&self, part: KeyPart) -> Flow {
        let mut flow = Flow::default();
        for (key, contexts) in &self.contexts {
            flow.add(key.prefixed(part), contexts.iter().copied());
        }
        flow
    }

    /// Contexts found under `part`, with `part` removed. The partial set is dropped.
    fn stripped(&self, part: KeyPart) -> Flow {
        let mut flow = Flow::default();
        for (key, contexts) in &self.contexts {
            if let Some(key) = key.strip(part) {
                flow.add(key, contexts.iter().copied());
            }
        }
        flow
    }

    /// Element contexts only
    fn elements(&self) -> Flow { self.stripped(KeyPart::Element).prefixed(KeyPart::Element) }

    fn merge(&mut self, other: Flow) {
        for (key, contexts) in other.contexts {
            self.add(key, contexts);
        }
        self.partial.extend(other.partial);
    }

    fn with_partial(mut self, partial: impl IntoIterator<Item = ContextId>) -> Self {
        self.partial.extend(partial);
        self
    }

    fn without_partial(mut self) -> Self {
        self.partial.clear();
        self
    }
}

pub(crate) struct Walked {
    pub(crate) node: Node,
    pub(crate) flow: Flow,
}

impl Walked {
    fn value(node: Node) -> Self { Walked { node, flow: Flow::default() } }
}

struct Binding {
    name: String,
    slot: usize,
    flow: Flow,
}

/// Walks an expression, building the context graph and the IR in one pass
pub(crate) struct Analyzer<'m> {
    model: &'m Model,
    pub(crate) graph: ContextGraph,
    pub(crate) slots: usize,
    scopes: Vec<Binding>,
    /// Every context a member was read from, in walk order
    touched: Vec<ContextId>,
    /// Off while walking a filter: filters are always evaluated eagerly
    pub(crate) marking: bool,
}

impl<'m> Analyzer<'m> {
    pub(crate) fn new(model: &'m Model, entity_type: EntityTypeId) -> Self {
        Self { model, graph: ContextGraph::new(entity_type), slots: 0, scopes: Vec::new(), touched: Vec::new(), marking: true }
    }

    /// Walk a one-parameter lambda whose parameter is the root entity
    pub(crate) fn root_lambda(&mut self, expr: &Expr) -> Result<Walked, ConfigurationError> {
        match expr.as_lambda() {
            Some(lambda) if lambda.params.len() == 1 => {}
            _ => return Err(ConfigurationError::Unsupported(format!("expected a one-parameter lambda, found {}", expr))),
        }
        let root = Flow::entity(self.graph.root());
        self.lambda(expr, vec![root])
    }

    fn lambda(&mut self, expr: &Expr, params: Vec<Flow>) -> Result<Walked, ConfigurationError> {
        let Some(lambda) = expr.as_lambda() else {
            return Err(ConfigurationError::Unsupported(format!("expected a lambda, found {}", expr)));
        };
        if lambda.params.len() != params.len() {
            return Err(ConfigurationError::Unsupported(format!(
                "lambda {} takes {} parameters, expected {}",
                expr,
                lambda.params.len(),
                params.len()
            )));
        }
        let depth = self.scopes.len();
        let mut slots = Vec::with_capacity(params.len());
        for (name, flow) in lambda.params.iter().zip(params) {
            let slot = self.slots;
            self.slots += 1;
            slots.push(slot);
            self.scopes.push(Binding { name: name.clone(), slot, flow });
        }
        let body = self.walk(&lambda.body);
        self.scopes.truncate(depth);
        let body = body?;
        Ok(Walked { node: Node::Lambda { slots, body: Box::new(body.node) }, flow: body.flow })
    }

    /// Walk a lambda applied to each element of `source`
    fn element_lambda(&mut self, expr: &Expr, source: &Flow, method: Method) -> Result<Walked, ConfigurationError> {
        if expr.as_lambda().map(|l| l.params.len()) != Some(1) {
            return Err(ConfigurationError::Unsupported(format!("{} expects a one-parameter lambda, found {}", method.name(), expr)));
        }
        let param = self.element_flow(source);
        self.lambda(expr, vec![param])
    }

    /// The flow of a lambda parameter bound to the elements of `source`. Entity elements get a fresh
    /// scoped context; an element that carries no entity at all is bound to the empty context.
    fn element_flow(&mut self, source: &Flow) -> Flow {
        let mut flow = Flow::default();
        for (key, contexts) in source.stripped(KeyPart::Element).contexts {
            if key.is_none() {
                let scoped: Vec<ContextId> = contexts.iter().map(|c| self.graph.scoped(*c)).collect();
                flow.add(key, scoped);
            } else {
                flow.add(key, contexts);
            }
        }
        if flow.contexts.is_empty() {
            let empty = self.graph.empty();
            flow.add(ContextKey::NONE, [empty]);
        }
        flow
    }

    fn mark(&mut self, contexts: &BTreeSet<ContextId>) {
        if self.marking {
            for context in contexts {
                self.graph.mark_load_all(*context);
            }
        }
    }

    /// Mark the partial set and every context carried by `flow`
    fn mark_all(&mut self, flow: &Flow) {
        let mut contexts = flow.all();
        contexts.extend(flow.partial.iter().copied());
        self.mark(&contexts);
    }

    fn walk(&mut self, expr: &Expr) -> Result<Walked, ConfigurationError> {
        match expr {
            Expr::Literal(literal) => Ok(Walked::value(Node::Literal(Value::from(literal)))),
            Expr::Parameter(name) => {
                let binding =
                    self.scopes.iter().rev().find(|b| &b.name == name).ok_or_else(|| ConfigurationError::UnknownParameter(name.clone()))?;
                Ok(Walked { node: Node::Param(binding.slot), flow: binding.flow.clone() })
            }
            Expr::Member { receiver, name } => self.member(receiver, name),
            Expr::Call { receiver, method, args } => self.call(receiver, *method, args),
            Expr::Lambda(_) => Err(ConfigurationError::Unsupported(format!("lambda {} outside of a method argument", expr))),
            Expr::Unary { operator, operand } => {
                let operand = self.walk(operand)?;
                let partial = match operator {
                    UnaryOperator::Negate => operand.flow.partial,
                    UnaryOperator::Not => {
                        self.mark(&operand.flow.partial);
                        BTreeSet::new()
                    }
                };
                let node = Node::Unary { operator: *operator, operand: Box::new(operand.node) };
                Ok(Walked { node, flow: Flow::default().with_partial(partial) })
            }
            Expr::Binary { left, operator, right } => self.binary(left, *operator, right),
            Expr::Conditional { test, if_true, if_false } => self.conditional(test, if_true, if_false),
            Expr::List(items) => {
                let mut nodes = Vec::with_capacity(items.len());
                let mut flow = Flow::default();
                for item in items {
                    let item = self.walk(item)?;
                    flow.merge(item.flow.prefixed(KeyPart::Element).with_partial(item.flow.partial));
                    nodes.push(item.node);
                }
                Ok(Walked { node: Node::List(nodes), flow })
            }
            Expr::Convert { operand, to } => {
                // truncation and parsing do not distribute over partial sums
                let operand = self.walk(operand)?;
                self.mark(&operand.flow.partial);
                let node = Node::Convert { operand: Box::new(operand.node), to: *to };
                Ok(Walked::value(node))
            }
            Expr::TrackChanges { operand, tracked } => self.track_changes(operand, *tracked),
        }
    }

    fn member(&mut self, receiver: &Expr, name: &str) -> Result<Walked, ConfigurationError> {
        let model = self.model;
        let receiver = self.walk(receiver)?;
        let contexts = receiver.flow.at(&ContextKey::NONE).to_vec();

        if contexts.is_empty() && (name == "key" || name == "value") {
            self.mark(&receiver.flow.partial);
            let receiver_node = Box::new(receiver.node);
            let (node, part) = if name == "key" {
                (Node::PairKey(receiver_node), KeyPart::Key)
            } else {
                (Node::PairValue(receiver_node), KeyPart::Value)
            };
            return Ok(Walked { node, flow: receiver.flow.stripped(part) });
        }
        if contexts.is_empty() {
            return Err(ConfigurationError::Unsupported(format!("member {} read on a value that is not an entity", name)));
        }

        self.mark(&receiver.flow.partial);
        let context = self.graph.composite(&contexts, model)?;
        let (entity_type, tracking) = {
            let node = self.graph.node(context);
            (node.entity_type, node.tracking)
        };
        let Some(entity_type) = entity_type else {
            return Err(ConfigurationError::Unsupported(format!("member {} read on a value that is not an entity", name)));
        };
        let def = model.member_by_name(entity_type, name).ok_or_else(|| ConfigurationError::UnknownMember {
            entity_type: model.entity_type_by_id(entity_type).name.clone(),
            member: name.to_string(),
        })?;
        self.touched.push(context);
        if tracking {
            self.graph.observe(context, def.observed());
        }

        let receiver_node = Box::new(receiver.node);
        match &def.kind {
            MemberKind::Property => Ok(Walked::value(Node::Property { receiver: receiver_node, property: def.id })),
            MemberKind::Navigation(navigation) => {
                let target = self.graph.navigation(context, def.id, navigation.target);
                let collection = navigation.cardinality == Cardinality::Many;
                let mut flow = Flow::default();
                if collection {
                    flow.add(ContextKey::element(), [target]);
                    if tracking {
                        flow.partial.insert(target);
                    }
                } else {
                    flow.add(ContextKey::NONE, [target]);
                }
                let node = Node::Navigation { receiver: receiver_node, navigation: def.id, context: target, collection };
                Ok(Walked { node, flow })
            }
        }
    }

    fn binary(&mut self, left: &Expr, operator: BinaryOperator, right: &Expr) -> Result<Walked, ConfigurationError> {
        let left = self.walk(left)?;
        let right = self.walk(right)?;
        let mut flow = Flow::default();
        let partial: BTreeSet<ContextId> = match operator {
            BinaryOperator::Add | BinaryOperator::Subtract => left.flow.partial.union(&right.flow.partial).copied().collect(),
            BinaryOperator::Multiply if right.node.is_constant() => left.flow.partial.clone(),
            BinaryOperator::Multiply if left.node.is_constant() => right.flow.partial.clone(),
            // integer division truncates
            BinaryOperator::Divide if matches!(right.node, Node::Literal(Value::F64(_))) => left.flow.partial.clone(),
            _ => {
                self.mark(&left.flow.partial);
                self.mark(&right.flow.partial);
                BTreeSet::new()
            }
        };
        if operator == BinaryOperator::Coalesce {
            flow.merge(left.flow.without_partial());
            flow.merge(right.flow.without_partial());
        }
        flow.partial = partial;
        Ok(Walked { node: Node::Binary { left: Box::new(left.node), operator, right: Box::new(right.node) }, flow })
    }

    fn conditional(&mut self, test: &Expr, if_true: &Expr, if_false: &Expr) -> Result<Walked, ConfigurationError> {
        let start = self.touched.len();
        let test = self.walk(test)?;
        let read_by_test: BTreeSet<ContextId> = self.touched[start..].iter().copied().collect();
        self.mark(&read_by_test);
        self.mark(&test.flow.partial);

        let if_true = self.walk(if_true)?;
        let if_false = self.walk(if_false)?;
        self.mark(&if_true.flow.partial);
        self.mark(&if_false.flow.partial);
        let mut flow = if_true.flow.without_partial();
        flow.merge(if_false.flow.without_partial());
        let node = Node::Conditional { test: Box::new(test.node), if_true: Box::new(if_true.node), if_false: Box::new(if_false.node) };
        Ok(Walked { node, flow })
    }

    /// `tracked(x)` / `untracked(x)`: every parameter visible inside `x`, and the result, is seen
    /// through a change-tracking wrapper
    fn track_changes(&mut self, operand: &Expr, tracked: bool) -> Result<Walked, ConfigurationError> {
        let mut visible: Vec<(String, usize, Flow)> = Vec::new();
        for binding in self.scopes.iter().rev() {
            if !visible.iter().any(|(name, _, _)| name == &binding.name) {
                visible.push((binding.name.clone(), binding.slot, binding.flow.clone()));
            }
        }
        let depth = self.scopes.len();
        for (name, slot, flow) in visible {
            let flow = self.wrap_tracking(&flow, tracked);
            self.scopes.push(Binding { name, slot, flow });
        }
        let inner = self.walk(operand);
        self.scopes.truncate(depth);
        let inner = inner?;
        let flow = self.wrap_tracking(&inner.flow, tracked);
        Ok(Walked { node: inner.node, flow })
    }

    fn wrap_tracking(&mut self, flow: &Flow, tracked: bool) -> Flow {
        let mut wrapped = Flow::default().with_partial(flow.partial.iter().copied());
        for (key, contexts) in &flow.contexts {
            let contexts: Vec<ContextId> = contexts.iter().map(|c| self.graph.change_tracking(*c, tracked)).collect();
            wrapped.add(key.clone(), contexts);
        }
        wrapped
    }

    fn distinct(&mut self, source: &Flow) -> Flow {
        let mut flow = Flow::default();
        for (key, contexts) in source.stripped(KeyPart::Element).contexts {
            let contexts: Vec<ContextId> = if key.is_none() { contexts.iter().map(|c| self.graph.distinct(*c)).collect() } else { contexts };
            flow.add(key.prefixed(KeyPart::Element), contexts);
        }
        flow
    }

    fn call(&mut self, receiver: &Expr, method: Method, args: &[Expr]) -> Result<Walked, ConfigurationError> {
        use Method::*;

        let source = self.walk(receiver)?;
        let src = &source.flow;
        let mut nodes = Vec::with_capacity(args.len());
        let flow = match method {
            Where | OrderBy | OrderByDescending | ThenBy | ThenByDescending => {
                arity(method, args, 1, 1)?;
                let lambda = self.element_lambda(&args[0], src, method)?;
                self.mark(&lambda.flow.partial);
                nodes.push(lambda.node);
                src.elements().with_partial(src.partial.iter().copied())
            }
            Reverse | ToList | ToArray | AsEnumerable => {
                arity(method, args, 0, 0)?;
                src.elements().with_partial(src.partial.iter().copied())
            }
            ToSet => {
                arity(method, args, 0, 0)?;
                self.mark(&src.partial);
                src.elements()
            }
            Distinct => {
                arity(method, args, 0, 0)?;
                self.mark(&src.partial);
                self.distinct(src)
            }
            Skip | Take => {
                arity(method, args, 1, 1)?;
                let count = self.walk(&args[0])?;
                self.mark(&count.flow.partial);
                self.mark(&src.partial);
                nodes.push(count.node);
                src.elements()
            }
            Any | All | Contains => {
                arity(method, args, if method == Any { 0 } else { 1 }, 1)?;
                self.mark_all(src);
                if let Some(arg) = args.first() {
                    let walked = if method == Contains { self.walk(arg)? } else { self.element_lambda(arg, src, method)? };
                    self.mark_all(&walked.flow);
                    nodes.push(walked.node);
                }
                Flow::default()
            }
            Count | Sum => {
                arity(method, args, 0, 1)?;
                let mut partial = src.partial.clone();
                if let Some(arg) = args.first() {
                    let lambda = self.element_lambda(arg, src, method)?;
                    if method == Count {
                        self.mark(&lambda.flow.partial);
                    } else {
                        partial.extend(lambda.flow.partial.iter().copied());
                    }
                    nodes.push(lambda.node);
                }
                Flow::default().with_partial(partial)
            }
            Min | Max | Average => {
                arity(method, args, 0, 1)?;
                self.mark(&src.partial);
                let mut flow = if method == Average { Flow::default() } else { src.stripped(KeyPart::Element) };
                if let Some(arg) = args.first() {
                    let lambda = self.element_lambda(arg, src, method)?;
                    self.mark(&lambda.flow.partial);
                    if method != Average {
                        flow = lambda.flow.without_partial();
                    }
                    nodes.push(lambda.node);
                }
                flow
            }
            First | FirstOrDefault | Last | LastOrDefault => {
                arity(method, args, 0, 1)?;
                self.mark(&src.partial);
                if let Some(arg) = args.first() {
                    let lambda = self.element_lambda(arg, src, method)?;
                    self.mark(&lambda.flow.partial);
                    nodes.push(lambda.node);
                }
                src.stripped(KeyPart::Element)
            }
            Concat => {
                arity(method, args, 1, 1)?;
                let other = self.walk(&args[0])?;
                let mut flow = src.elements().with_partial(src.partial.iter().copied());
                flow.merge(other.flow.elements().with_partial(other.flow.partial.iter().copied()));
                nodes.push(other.node);
                flow
            }
            Union | Except | Intersect => {
                arity(method, args, 1, 1)?;
                let other = self.walk(&args[0])?;
                self.mark(&src.partial);
                self.mark(&other.flow.partial);
                let mut flow = src.elements();
                if method == Union {
                    flow.merge(other.flow.elements());
                }
                nodes.push(other.node);
                flow
            }
            Select => {
                arity(method, args, 1, 1)?;
                let lambda = self.element_lambda(&args[0], src, method)?;
                let flow = lambda.flow.prefixed(KeyPart::Element).with_partial(src.partial.union(&lambda.flow.partial).copied());
                nodes.push(lambda.node);
                flow
            }
            SelectMany => {
                arity(method, args, 1, 1)?;
                let lambda = self.element_lambda(&args[0], src, method)?;
                let flow = lambda.flow.elements().with_partial(src.partial.union(&lambda.flow.partial).copied());
                nodes.push(lambda.node);
                flow
            }
            GroupBy | ToLookup | ToDictionary => {
                arity(method, args, 1, 2)?;
                self.mark(&src.partial);
                let key = self.element_lambda(&args[0], src, method)?;
                self.mark(&key.flow.partial);
                let mut flow = key.flow.prefixed(KeyPart::Key).prefixed(KeyPart::Element);
                nodes.push(key.node);
                let part = if method == ToDictionary { KeyPart::Value } else { KeyPart::Element };
                let elements = match args.get(1) {
                    Some(arg) => {
                        let element = self.element_lambda(arg, src, method)?;
                        self.mark(&element.flow.partial);
                        nodes.push(element.node);
                        element.flow.without_partial()
                    }
                    None => src.stripped(KeyPart::Element),
                };
                flow.merge(elements.prefixed(part).prefixed(KeyPart::Element));
                flow
            }
        };
        Ok(Walked { node: Node::Call { receiver: Box::new(source.node), method, args: nodes }, flow })
    }
}

fn arity(method: Method, args: &[Expr], min: usize, max: usize) -> Result<(), ConfigurationError> {
    if args.len() < min || args.len() > max {
        let expected = if min == max { min.to_string() } else { format!("{} to {}", min, max) };
        return Err(ConfigurationError::Unsupported(format!("{} takes {} arguments, got {}", method.name(), expected, args.len())));
    }
    Ok(())
}
