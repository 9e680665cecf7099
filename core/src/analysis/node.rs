use rollup_expr::{BinaryOperator, Conversion, Method, UnaryOperator};

use crate::context::ContextId;
use crate::model::MemberId;
use crate::value::Value;

/// Compiled form of an expression: member names resolved, parameters turned into environment slots
/// and every navigation tied to the context it produces.
#[derive(Debug, Clone)]
pub enum Node {
    Literal(Value),
    Param(usize),
    Property { receiver: Box<Node>, property: MemberId },
    Navigation { receiver: Box<Node>, navigation: MemberId, context: ContextId, collection: bool },
    PairKey(Box<Node>),
    PairValue(Box<Node>),
    Unary { operator: UnaryOperator, operand: Box<Node> },
    Binary { left: Box<Node>, operator: BinaryOperator, right: Box<Node> },
    Conditional { test: Box<Node>, if_true: Box<Node>, if_false: Box<Node> },
    List(Vec<Node>),
    Call { receiver: Box<Node>, method: Method, args: Vec<Node> },
    Lambda { slots: Vec<usize>, body: Box<Node> },
    Convert { operand: Box<Node>, to: Conversion },
}

impl Node {
    /// True when the value does not depend on any parameter
    pub fn is_constant(&self) -> bool {
        match self {
            Node::Literal(_) => true,
            Node::Param(_) => false,
            Node::Property { receiver, .. } | Node::Navigation { receiver, .. } => receiver.is_constant(),
            Node::PairKey(inner) | Node::PairValue(inner) => inner.is_constant(),
            Node::Unary { operand, .. } | Node::Convert { operand, .. } => operand.is_constant(),
            Node::Binary { left, right, .. } => left.is_constant() && right.is_constant(),
            Node::Conditional { test, if_true, if_false } => test.is_constant() && if_true.is_constant() && if_false.is_constant(),
            Node::List(items) => items.iter().all(Node::is_constant),
            Node::Call { receiver, args, .. } => receiver.is_constant() && args.iter().all(Node::is_constant),
            Node::Lambda { body, .. } => body.is_constant(),
        }
    }
}
