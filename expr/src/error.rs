use crate::grammar;
use thiserror::Error;

/// Errors raised while turning source text into an [`crate::ast::Expr`]
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Syntax error: {0}")]
    SyntaxError(String),
    #[error("Empty expression")]
    EmptyExpression,
    #[error("Expected {expected}, got {got:?}")]
    UnexpectedRule { expected: &'static str, got: grammar::Rule },
    #[error("Unknown method: {0}")]
    UnknownMethod(String),
    #[error("Unknown function: {0}")]
    UnknownFunction(String),
    #[error("Invalid literal: {0}")]
    InvalidLiteral(String),
    #[error("Missing {0} operand")]
    MissingOperand(&'static str),
    #[error("{function} takes {expected} argument(s), got {got}")]
    Arity { function: String, expected: usize, got: usize },
    #[error("Expression is not a lambda")]
    NotALambda,
}

impl From<pest::error::Error<grammar::Rule>> for ParseError {
    fn from(error: pest::error::Error<grammar::Rule>) -> Self { ParseError::SyntaxError(error.to_string()) }
}
