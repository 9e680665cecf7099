//! The rollup expression language.
//!
//! Computed members are written as single-parameter lambdas over an entity, e.g.
//! `p => p.pets.where(x => x.kind == 'Cat').count()`. This crate only knows about syntax;
//! member names are resolved against a model by `rollup-core`.

pub mod ast;
pub mod conversion;
pub mod error;
pub mod grammar;
pub mod parser;

pub use ast::{BinaryOperator, Conversion, Expr, Lambda, Literal, Method, UnaryOperator};
pub use error::ParseError;
pub use parser::{parse_expression, parse_lambda, parse_standalone};
