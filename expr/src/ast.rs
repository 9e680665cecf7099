use serde::{Deserialize, Serialize};
use std::fmt;

/// A node of a computed expression.
///
/// Member reads are kept unresolved (`Member { name }`); whether `name` is a property, a navigation
/// or a pair accessor is decided when the expression is analyzed against a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Literal(Literal),
    Parameter(String),
    Member { receiver: Box<Expr>, name: String },
    Call { receiver: Box<Expr>, method: Method, args: Vec<Expr> },
    Lambda(Lambda),
    Unary { operator: UnaryOperator, operand: Box<Expr> },
    Binary { left: Box<Expr>, operator: BinaryOperator, right: Box<Expr> },
    Conditional { test: Box<Expr>, if_true: Box<Expr>, if_false: Box<Expr> },
    List(Vec<Expr>),
    Convert { operand: Box<Expr>, to: Conversion },
    /// `tracked(x)` / `untracked(x)`: starts or stops treating mutations beneath `x` as relevant
    TrackChanges { operand: Box<Expr>, tracked: bool },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lambda {
    pub params: Vec<String>,
    pub body: Box<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOperator {
    Not,    // !
    Negate, // -
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOperator {
    Add,                // +
    Subtract,           // -
    Multiply,           // *
    Divide,             // /
    Modulo,             // %
    Equal,              // ==
    NotEqual,           // !=
    GreaterThan,        // >
    GreaterThanOrEqual, // >=
    LessThan,           // <
    LessThanOrEqual,    // <=
    And,                // &&
    Or,                 // ||
    Coalesce,           // ??
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Conversion {
    Integer,
    Float,
    String,
    Boolean,
}

/// Sequence methods understood by the analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    Where,
    Select,
    SelectMany,
    OrderBy,
    OrderByDescending,
    ThenBy,
    ThenByDescending,
    Reverse,
    Skip,
    Take,
    ToList,
    ToArray,
    ToSet,
    AsEnumerable,
    Any,
    All,
    Contains,
    Count,
    Sum,
    Min,
    Max,
    Average,
    First,
    FirstOrDefault,
    Last,
    LastOrDefault,
    Concat,
    Union,
    Except,
    Intersect,
    Distinct,
    GroupBy,
    ToDictionary,
    ToLookup,
}

const METHOD_NAMES: &[(Method, &str)] = &[
    (Method::Where, "where"),
    (Method::Select, "select"),
    (Method::SelectMany, "select_many"),
    (Method::OrderBy, "order_by"),
    (Method::OrderByDescending, "order_by_descending"),
    (Method::ThenBy, "then_by"),
    (Method::ThenByDescending, "then_by_descending"),
    (Method::Reverse, "reverse"),
    (Method::Skip, "skip"),
    (Method::Take, "take"),
    (Method::ToList, "to_list"),
    (Method::ToArray, "to_array"),
    (Method::ToSet, "to_set"),
    (Method::AsEnumerable, "as_enumerable"),
    (Method::Any, "any"),
    (Method::All, "all"),
    (Method::Contains, "contains"),
    (Method::Count, "count"),
    (Method::Sum, "sum"),
    (Method::Min, "min"),
    (Method::Max, "max"),
    (Method::Average, "average"),
    (Method::First, "first"),
    (Method::FirstOrDefault, "first_or_default"),
    (Method::Last, "last"),
    (Method::LastOrDefault, "last_or_default"),
    (Method::Concat, "concat"),
    (Method::Union, "union"),
    (Method::Except, "except"),
    (Method::Intersect, "intersect"),
    (Method::Distinct, "distinct"),
    (Method::GroupBy, "group_by"),
    (Method::ToDictionary, "to_dictionary"),
    (Method::ToLookup, "to_lookup"),
];

impl Method {
    pub fn name(&self) -> &'static str {
        METHOD_NAMES.iter().find(|(m, _)| m == self).map(|(_, n)| *n).unwrap_or("?")
    }

    pub fn from_name(name: &str) -> Option<Method> { METHOD_NAMES.iter().find(|(_, n)| *n == name).map(|(m, _)| *m) }
}

impl Conversion {
    pub fn name(&self) -> &'static str {
        match self {
            Conversion::Integer => "int",
            Conversion::Float => "float",
            Conversion::String => "string",
            Conversion::Boolean => "bool",
        }
    }

    pub fn from_name(name: &str) -> Option<Conversion> {
        match name {
            "int" => Some(Conversion::Integer),
            "float" => Some(Conversion::Float),
            "string" => Some(Conversion::String),
            "bool" => Some(Conversion::Boolean),
            _ => None,
        }
    }
}

impl BinaryOperator {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOperator::Add => "+",
            BinaryOperator::Subtract => "-",
            BinaryOperator::Multiply => "*",
            BinaryOperator::Divide => "/",
            BinaryOperator::Modulo => "%",
            BinaryOperator::Equal => "==",
            BinaryOperator::NotEqual => "!=",
            BinaryOperator::GreaterThan => ">",
            BinaryOperator::GreaterThanOrEqual => ">=",
            BinaryOperator::LessThan => "<",
            BinaryOperator::LessThanOrEqual => "<=",
            BinaryOperator::And => "&&",
            BinaryOperator::Or => "||",
            BinaryOperator::Coalesce => "??",
        }
    }

    pub fn from_symbol(symbol: &str) -> Option<BinaryOperator> {
        Some(match symbol {
            "+" => BinaryOperator::Add,
            "-" => BinaryOperator::Subtract,
            "*" => BinaryOperator::Multiply,
            "/" => BinaryOperator::Divide,
            "%" => BinaryOperator::Modulo,
            "==" => BinaryOperator::Equal,
            "!=" => BinaryOperator::NotEqual,
            ">" => BinaryOperator::GreaterThan,
            ">=" => BinaryOperator::GreaterThanOrEqual,
            "<" => BinaryOperator::LessThan,
            "<=" => BinaryOperator::LessThanOrEqual,
            "&&" => BinaryOperator::And,
            "||" => BinaryOperator::Or,
            "??" => BinaryOperator::Coalesce,
            _ => return None,
        })
    }

    /// True for operators whose result is a boolean
    pub fn is_predicate(&self) -> bool {
        matches!(
            self,
            BinaryOperator::Equal
                | BinaryOperator::NotEqual
                | BinaryOperator::GreaterThan
                | BinaryOperator::GreaterThanOrEqual
                | BinaryOperator::LessThan
                | BinaryOperator::LessThanOrEqual
                | BinaryOperator::And
                | BinaryOperator::Or
        )
    }
}

// Builders. These are used by code that synthesizes expressions, e.g. consistency predicates.
impl Expr {
    pub fn parameter(name: impl Into<String>) -> Expr { Expr::Parameter(name.into()) }

    pub fn literal(literal: impl Into<Literal>) -> Expr { Expr::Literal(literal.into()) }

    pub fn lambda<S: Into<String>>(params: impl IntoIterator<Item = S>, body: Expr) -> Expr {
        Expr::Lambda(Lambda { params: params.into_iter().map(Into::into).collect(), body: Box::new(body) })
    }

    pub fn member(self, name: impl Into<String>) -> Expr { Expr::Member { receiver: Box::new(self), name: name.into() } }

    pub fn call(self, method: Method, args: Vec<Expr>) -> Expr { Expr::Call { receiver: Box::new(self), method, args } }

    pub fn binary(self, operator: BinaryOperator, right: Expr) -> Expr {
        Expr::Binary { left: Box::new(self), operator, right: Box::new(right) }
    }

    pub fn equal(self, right: Expr) -> Expr { self.binary(BinaryOperator::Equal, right) }

    pub fn and(self, right: Expr) -> Expr { self.binary(BinaryOperator::And, right) }

    pub fn not(self) -> Expr { Expr::Unary { operator: UnaryOperator::Not, operand: Box::new(self) } }

    pub fn conditional(test: Expr, if_true: Expr, if_false: Expr) -> Expr {
        Expr::Conditional { test: Box::new(test), if_true: Box::new(if_true), if_false: Box::new(if_false) }
    }

    pub fn tracked(self, tracked: bool) -> Expr { Expr::TrackChanges { operand: Box::new(self), tracked } }

    pub fn as_lambda(&self) -> Option<&Lambda> {
        match self {
            Expr::Lambda(lambda) => Some(lambda),
            _ => None,
        }
    }

    /// A copy of this expression with every `tracked(..)`/`untracked(..)` marker removed.
    pub fn without_change_tracking(&self) -> Expr {
        self.rewrite(&|expr| match expr {
            Expr::TrackChanges { operand, .. } => Some(operand.without_change_tracking()),
            _ => None,
        })
    }

    /// Replace free occurrences of parameter `name` with `replacement`. Lambdas that rebind `name` shadow it.
    pub fn substitute(&self, name: &str, replacement: &Expr) -> Expr {
        match self {
            Expr::Parameter(p) if p == name => replacement.clone(),
            Expr::Lambda(lambda) if lambda.params.iter().any(|p| p == name) => self.clone(),
            _ => self.map_children(&|child| child.substitute(name, replacement)),
        }
    }

    /// Bottom-up rewrite: `f` may replace a node; children of replaced nodes are not visited again.
    pub fn rewrite(&self, f: &dyn Fn(&Expr) -> Option<Expr>) -> Expr {
        match f(self) {
            Some(replaced) => replaced,
            None => self.map_children(&|child| child.rewrite(f)),
        }
    }

    fn map_children(&self, f: &dyn Fn(&Expr) -> Expr) -> Expr {
        let boxed = |e: &Expr| Box::new(f(e));
        match self {
            Expr::Literal(_) | Expr::Parameter(_) => self.clone(),
            Expr::Member { receiver, name } => Expr::Member { receiver: boxed(receiver), name: name.clone() },
            Expr::Call { receiver, method, args } => {
                Expr::Call { receiver: boxed(receiver), method: *method, args: args.iter().map(f).collect() }
            }
            Expr::Lambda(lambda) => Expr::Lambda(Lambda { params: lambda.params.clone(), body: boxed(&lambda.body) }),
            Expr::Unary { operator, operand } => Expr::Unary { operator: *operator, operand: boxed(operand) },
            Expr::Binary { left, operator, right } => Expr::Binary { left: boxed(left), operator: *operator, right: boxed(right) },
            Expr::Conditional { test, if_true, if_false } => {
                Expr::Conditional { test: boxed(test), if_true: boxed(if_true), if_false: boxed(if_false) }
            }
            Expr::List(items) => Expr::List(items.iter().map(f).collect()),
            Expr::Convert { operand, to } => Expr::Convert { operand: boxed(operand), to: *to },
            Expr::TrackChanges { operand, tracked } => Expr::TrackChanges { operand: boxed(operand), tracked: *tracked },
        }
    }
}

impl From<bool> for Literal {
    fn from(value: bool) -> Self { Literal::Boolean(value) }
}

impl From<i64> for Literal {
    fn from(value: i64) -> Self { Literal::Integer(value) }
}

impl From<f64> for Literal {
    fn from(value: f64) -> Self { Literal::Float(value) }
}

impl From<&str> for Literal {
    fn from(value: &str) -> Self { Literal::String(value.to_string()) }
}

impl From<String> for Literal {
    fn from(value: String) -> Self { Literal::String(value) }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Null => write!(f, "null"),
            Literal::Boolean(b) => write!(f, "{}", b),
            Literal::Integer(i) => write!(f, "{}", i),
            Literal::Float(x) => write!(f, "{:?}", x),
            Literal::String(s) if s.contains('\'') => write!(f, "\"{}\"", s),
            Literal::String(s) => write!(f, "'{}'", s),
        }
    }
}

impl fmt::Display for Lambda {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.params.as_slice() {
            [single] => write!(f, "{} => {}", single, self.body),
            params => write!(f, "({}) => {}", params.join(", "), self.body),
        }
    }
}

/// Renders the expression back to source form. The output parses to an equivalent expression.
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(literal) => write!(f, "{}", literal),
            Expr::Parameter(name) => write!(f, "{}", name),
            Expr::Member { receiver, name } => write!(f, "{}.{}", receiver, name),
            Expr::Call { receiver, method, args } => {
                write!(f, "{}.{}(", receiver, method.name())?;
                write_list(f, args)?;
                write!(f, ")")
            }
            Expr::Lambda(lambda) => write!(f, "{}", lambda),
            Expr::Unary { operator: UnaryOperator::Not, operand } => write!(f, "!({})", operand),
            Expr::Unary { operator: UnaryOperator::Negate, operand } => write!(f, "-({})", operand),
            Expr::Binary { left, operator, right } => write!(f, "({} {} {})", left, operator.symbol(), right),
            Expr::Conditional { test, if_true, if_false } => write!(f, "({} ? {} : {})", test, if_true, if_false),
            Expr::List(items) => {
                write!(f, "[")?;
                write_list(f, items)?;
                write!(f, "]")
            }
            Expr::Convert { operand, to } => write!(f, "{}({})", to.name(), operand),
            Expr::TrackChanges { operand, tracked: true } => write!(f, "tracked({})", operand),
            Expr::TrackChanges { operand, tracked: false } => write!(f, "untracked({})", operand),
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, items: &[Expr]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}
