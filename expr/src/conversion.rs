use crate::ast::{Expr, Lambda};
use crate::error::ParseError;
use crate::parser;
use std::convert::TryFrom;

impl<'a> TryFrom<&'a str> for Expr {
    type Error = ParseError;

    fn try_from(value: &'a str) -> Result<Self, Self::Error> { parser::parse_expression(value) }
}
impl TryFrom<String> for Expr {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> { parser::parse_expression(&value) }
}
impl<'a> TryFrom<&'a str> for Lambda {
    type Error = ParseError;

    fn try_from(value: &'a str) -> Result<Self, Self::Error> { parser::parse_lambda(value) }
}

impl TryFrom<Expr> for Lambda {
    type Error = ParseError;

    fn try_from(value: Expr) -> Result<Self, Self::Error> {
        match value {
            Expr::Lambda(lambda) => Ok(lambda),
            _ => Err(ParseError::NotALambda),
        }
    }
}
